use crate::grading::{classify, effective_scale, GradeScale, GradeStatus};
use crate::ipc::error::ok;
use crate::ipc::handlers::courses::{load_course_grading, parse_scale_param, CourseGrading};
use crate::ipc::helpers::{get_optional_f64, get_required_f64, get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Session {
    Normal,
    Retake,
}

impl Session {
    fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Retake => "retake",
        }
    }
}

#[derive(Debug, Clone)]
struct GradeRow {
    id: String,
    enrollment_id: String,
    session: String,
    value: Option<f64>,
    active: bool,
    recorded_at: Option<String>,
}

const GRADE_COLUMNS: &str = "id, enrollment_id, session, value, active, recorded_at";

fn grade_from_row(row: &Row<'_>) -> rusqlite::Result<GradeRow> {
    Ok(GradeRow {
        id: row.get(0)?,
        enrollment_id: row.get(1)?,
        session: row.get(2)?,
        value: row.get(3)?,
        active: row.get::<_, i64>(4)? != 0,
        recorded_at: row.get(5)?,
    })
}

fn status_of(value: Option<f64>, grading: &CourseGrading) -> Option<GradeStatus> {
    classify(value, grading.passing_threshold, grading.grade_scale)
}

fn status_json(status: Option<GradeStatus>) -> Value {
    match status {
        Some(s) => Value::String(s.as_str().to_string()),
        None => Value::Null,
    }
}

fn grade_json(g: &GradeRow, grading: &CourseGrading) -> Value {
    json!({
        "id": g.id,
        "enrollmentId": g.enrollment_id,
        "session": g.session,
        "value": g.value,
        "active": g.active,
        "recordedAt": g.recorded_at,
        "status": status_json(status_of(g.value, grading)),
    })
}

fn enrollment_grading(
    conn: &Connection,
    enrollment_id: &str,
) -> Result<CourseGrading, HandlerErr> {
    let course_id: Option<String> = conn
        .query_row(
            "SELECT course_id FROM enrollments WHERE id = ?",
            [enrollment_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(course_id) = course_id else {
        return Err(HandlerErr::new("not_found", "enrollment not found"));
    };
    load_course_grading(conn, &course_id)?
        .ok_or_else(|| HandlerErr::new("not_found", "course not found"))
}

fn session_grade(
    conn: &Connection,
    enrollment_id: &str,
    session: Session,
) -> Result<Option<GradeRow>, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM grades WHERE enrollment_id = ? AND session = ? ORDER BY rowid DESC LIMIT 1",
        GRADE_COLUMNS
    );
    Ok(conn
        .query_row(&sql, (enrollment_id, session.as_str()), grade_from_row)
        .optional()?)
}

fn grade_by_id(conn: &Connection, id: &str) -> Result<GradeRow, HandlerErr> {
    let sql = format!("SELECT {} FROM grades WHERE id = ?", GRADE_COLUMNS);
    Ok(conn.query_row(&sql, [id], grade_from_row)?)
}

/// `value` is required but may be null; null and 0 record "not graded yet".
fn parse_grade_value(params: &Value, scale: GradeScale) -> Result<Option<f64>, HandlerErr> {
    if params.get("value").is_none() {
        return Err(HandlerErr::bad_params("missing value"));
    }
    let Some(v) = get_optional_f64(params, "value")? else {
        return Ok(None);
    };
    if !(0.0..=scale.max()).contains(&v) {
        return Err(HandlerErr::bad_params(format!(
            "value must be in 0..={} for the {} scale",
            scale.max(),
            scale.as_str()
        )));
    }
    Ok(Some(v))
}

/// Writes the single grade of `session` for an enrollment. A re-record in the
/// same session may not take a validated grade below validation.
fn write_session_grade(
    conn: &Connection,
    enrollment_id: &str,
    session: Session,
    value: Option<f64>,
    grading: &CourseGrading,
) -> Result<GradeRow, HandlerErr> {
    let new_status = status_of(value, grading);
    let id = match session_grade(conn, enrollment_id, session)? {
        Some(existing) if !existing.active => {
            return Err(HandlerErr::new(
                "grade_superseded",
                format!("the {} grade was superseded by a retake", session.as_str()),
            )
            .with_details(json!({ "gradeId": existing.id })));
        }
        Some(existing) => {
            let old_status = status_of(existing.value, grading);
            if old_status == Some(GradeStatus::Validated) && new_status < old_status {
                return Err(HandlerErr::new(
                    "grade_locked",
                    "a validated grade cannot be lowered in the same session",
                )
                .with_details(json!({
                    "gradeId": existing.id,
                    "currentValue": existing.value,
                    "attemptedValue": value,
                })));
            }
            conn.execute(
                "UPDATE grades SET value = ?, recorded_at = datetime('now') WHERE id = ?",
                (value, &existing.id),
            )?;
            existing.id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO grades(id, enrollment_id, session, value, active, recorded_at)
                 VALUES(?, ?, ?, ?, 1, datetime('now'))",
                (&id, enrollment_id, session.as_str(), value),
            )?;
            id
        }
    };
    grade_by_id(conn, &id)
}

fn grades_record(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let enrollment_id = get_required_str(params, "enrollmentId")?;
    let grading = enrollment_grading(conn, &enrollment_id)?;
    let value = parse_grade_value(params, grading.scale())?;

    let tx = conn.unchecked_transaction()?;
    let grade = write_session_grade(&tx, &enrollment_id, Session::Normal, value, &grading)?;
    tx.commit()?;
    Ok(json!({ "grade": grade_json(&grade, &grading) }))
}

fn grades_retake(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let enrollment_id = get_required_str(params, "enrollmentId")?;
    let grading = enrollment_grading(conn, &enrollment_id)?;
    let value = parse_grade_value(params, grading.scale())?;

    let tx = conn.unchecked_transaction()?;
    if session_grade(&tx, &enrollment_id, Session::Retake)?.is_none() {
        let normal = session_grade(&tx, &enrollment_id, Session::Normal)?;
        let normal_status = normal
            .as_ref()
            .filter(|g| g.active)
            .and_then(|g| status_of(g.value, &grading));
        let Some(normal) = normal.filter(|_| normal_status == Some(GradeStatus::RetakeEligible))
        else {
            return Err(HandlerErr::new(
                "retake_not_allowed",
                "a retake requires a normal-session grade in the retake band",
            )
            .with_details(json!({ "status": status_json(normal_status) })));
        };
        // History is kept: the failing attempt stays, only inactive.
        tx.execute("UPDATE grades SET active = 0 WHERE id = ?", [&normal.id])?;
        info!(enrollment = %enrollment_id, grade = %normal.id, "retake opened");
    }
    let grade = write_session_grade(&tx, &enrollment_id, Session::Retake, value, &grading)?;
    tx.commit()?;
    Ok(json!({ "grade": grade_json(&grade, &grading) }))
}

fn grades_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let enrollment_id = get_required_str(params, "enrollmentId")?;
    let grading = enrollment_grading(conn, &enrollment_id)?;

    let sql = format!(
        "SELECT {} FROM grades WHERE enrollment_id = ? ORDER BY rowid",
        GRADE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([&enrollment_id], grade_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    // The active retake, when present, decides the outcome.
    let decisive = rows
        .iter()
        .filter(|g| g.active)
        .max_by_key(|g| g.session == Session::Retake.as_str());
    let outcome = decisive.and_then(|g| status_of(g.value, &grading));

    Ok(json!({
        "enrollmentId": enrollment_id,
        "passingThreshold": grading.passing_threshold,
        "scale": grading.scale(),
        "outcome": status_json(outcome),
        "grades": rows.iter().map(|g| grade_json(g, &grading)).collect::<Vec<_>>(),
    }))
}

fn grades_evaluate(params: &Value) -> Result<Value, HandlerErr> {
    let threshold = get_required_f64(params, "passingThreshold")?;
    let grade = get_optional_f64(params, "grade")?;
    let explicit = parse_scale_param(params)?.flatten();
    let scale = effective_scale(threshold, explicit);
    if threshold <= 0.0 || threshold > scale.max() {
        return Err(HandlerErr::bad_params(format!(
            "passingThreshold must be in (0, {}]",
            scale.max()
        )));
    }
    if let Some(g) = grade {
        if !(0.0..=scale.max()).contains(&g) {
            return Err(HandlerErr::bad_params(format!(
                "grade must be in 0..={} for the {} scale",
                scale.max(),
                scale.as_str()
            ))
            .with_details(json!({ "grade": g })));
        }
    }
    let status = classify(grade, threshold, explicit);
    Ok(json!({
        "status": status_json(status),
        "ungraded": status.is_none(),
        "scale": scale,
        "retakeBand": scale.retake_band(),
    }))
}

fn handle_grades_evaluate(req: &Request) -> Value {
    match grades_evaluate(&req.params) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "grades.evaluate" => Some(handle_grades_evaluate(req)),
        "grades.record" => Some(with_db(state, req, grades_record)),
        "grades.retake" => Some(with_db(state, req, grades_retake)),
        "grades.list" => Some(with_db(state, req, grades_list)),
        _ => None,
    }
}
