use crate::academic_year::{parse_label, AcademicYearStore, SqliteYearStore};
use crate::ipc::helpers::{get_optional_str, get_required_str, insert_err, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

fn row_exists(conn: &Connection, table: &str, id: &str) -> Result<bool, HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    Ok(conn
        .query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}

fn enrollments_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let course_id = get_required_str(params, "courseId")?;
    if !row_exists(conn, "students", &student_id)? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    if !row_exists(conn, "courses", &course_id)? {
        return Err(HandlerErr::new("not_found", "course not found"));
    }

    let store = SqliteYearStore::new(conn);
    let year = match get_optional_str(params, "academicYear")? {
        Some(label) => {
            let span = parse_label(&label)?;
            store.find_by_label(&span.label)?.ok_or_else(|| {
                HandlerErr::new("not_found", format!("academic year {} not found", span.label))
            })?
        }
        None => store.find_current()?.ok_or_else(|| {
            HandlerErr::new(
                "no_current_year",
                "no academic year is flagged current; pass academicYear explicitly",
            )
        })?,
    };

    let enrollment_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO enrollments(id, student_id, course_id, academic_year_id, created_at)
         VALUES(?, ?, ?, ?, datetime('now'))",
        (&enrollment_id, &student_id, &course_id, &year.id),
    )
    .map_err(|e| insert_err(e, "enrollments"))?;

    Ok(json!({
        "id": enrollment_id,
        "studentId": student_id,
        "courseId": course_id,
        "academicYear": year.label,
    }))
}

fn enrollments_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let mut sql = String::from(
        "SELECT e.id, e.student_id, e.course_id, y.label
         FROM enrollments e
         JOIN academic_years y ON y.id = e.academic_year_id",
    );
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<SqlValue> = Vec::new();
    if let Some(course_id) = get_optional_str(params, "courseId")? {
        clauses.push("e.course_id = ?");
        binds.push(SqlValue::Text(course_id));
    }
    if let Some(student_id) = get_optional_str(params, "studentId")? {
        clauses.push("e.student_id = ?");
        binds.push(SqlValue::Text(student_id));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY y.start_date, e.created_at, e.rowid");

    let mut stmt = conn.prepare(&sql)?;
    let enrollments = stmt
        .query_map(params_from_iter(binds), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "studentId": row.get::<_, String>(1)?,
                "courseId": row.get::<_, String>(2)?,
                "academicYear": row.get::<_, String>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "enrollments": enrollments }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "enrollments.create" => Some(with_db(state, req, enrollments_create)),
        "enrollments.list" => Some(with_db(state, req, enrollments_list)),
        _ => None,
    }
}
