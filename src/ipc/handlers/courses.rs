use crate::grading::{effective_scale, GradeScale};
use crate::ipc::handlers::setup::grading_defaults;
use crate::ipc::helpers::{
    get_optional_f64, get_optional_str, get_required_trimmed, insert_err, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Value};
use uuid::Uuid;

/// Grading parameters of one course, as needed to classify its grades.
#[derive(Debug, Clone)]
pub struct CourseGrading {
    pub passing_threshold: f64,
    pub grade_scale: Option<GradeScale>,
}

impl CourseGrading {
    pub fn scale(&self) -> GradeScale {
        effective_scale(self.passing_threshold, self.grade_scale)
    }
}

/// Outer `None` means the key was absent; `Some(None)` is an explicit `inferred`.
pub(crate) fn parse_scale_param(
    params: &Value,
) -> Result<Option<Option<GradeScale>>, HandlerErr> {
    let Some(raw) = get_optional_str(params, "gradeScale")? else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "inferred" => Ok(Some(None)),
        s => GradeScale::parse(s).map(|g| Some(Some(g))).ok_or_else(|| {
            HandlerErr::bad_params("gradeScale must be one of: inferred, twenty, hundred")
        }),
    }
}

fn course_json(row: &Row<'_>) -> rusqlite::Result<Value> {
    let threshold: f64 = row.get(3)?;
    let stored: Option<String> = row.get(4)?;
    let scale = stored.as_deref().and_then(GradeScale::parse);
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "code": row.get::<_, String>(1)?,
        "title": row.get::<_, String>(2)?,
        "passingThreshold": threshold,
        "gradeScale": scale,
        "effectiveScale": effective_scale(threshold, scale),
    }))
}

pub fn load_course_grading(
    conn: &Connection,
    course_id: &str,
) -> Result<Option<CourseGrading>, HandlerErr> {
    let found = conn
        .query_row(
            "SELECT passing_threshold, grade_scale FROM courses WHERE id = ?",
            [course_id],
            |r| Ok((r.get::<_, f64>(0)?, r.get::<_, Option<String>>(1)?)),
        )
        .optional()?;
    Ok(found.map(|(passing_threshold, stored)| CourseGrading {
        passing_threshold,
        grade_scale: stored.as_deref().and_then(GradeScale::parse),
    }))
}

fn courses_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let code = get_required_trimmed(params, "code")?;
    let title = get_required_trimmed(params, "title")?;
    let defaults =
        grading_defaults(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let passing_threshold =
        get_optional_f64(params, "passingThreshold")?.unwrap_or(defaults.passing_threshold);
    let grade_scale = parse_scale_param(params)?.unwrap_or(defaults.grade_scale);

    let scale = effective_scale(passing_threshold, grade_scale);
    if passing_threshold <= 0.0 || passing_threshold > scale.max() {
        return Err(HandlerErr::bad_params(format!(
            "passingThreshold must be in (0, {}]",
            scale.max()
        ))
        .with_details(json!({ "passingThreshold": passing_threshold })));
    }

    let course_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, code, title, passing_threshold, grade_scale)
         VALUES(?, ?, ?, ?, ?)",
        (
            &course_id,
            &code,
            &title,
            passing_threshold,
            grade_scale.map(|s| s.as_str()),
        ),
    )
    .map_err(|e| insert_err(e, "courses"))?;

    Ok(json!({
        "id": course_id,
        "code": code,
        "title": title,
        "passingThreshold": passing_threshold,
        "gradeScale": grade_scale,
        "effectiveScale": scale,
    }))
}

fn courses_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, code, title, passing_threshold, grade_scale FROM courses ORDER BY code",
    )?;
    let courses = stmt
        .query_map([], course_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "courses": courses }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "courses.create" => Some(with_db(state, req, courses_create)),
        "courses.list" => Some(with_db(state, req, courses_list)),
        _ => None,
    }
}
