use crate::ipc::helpers::{get_required_trimmed, insert_err, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_no = get_required_trimmed(params, "studentNo")?;
    let last_name = get_required_trimmed(params, "lastName")?;
    let first_name = get_required_trimmed(params, "firstName")?;

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, student_no, last_name, first_name, active, created_at)
         VALUES(?, ?, ?, ?, 1, datetime('now'))",
        (&student_id, &student_no, &last_name, &first_name),
    )
    .map_err(|e| insert_err(e, "students"))?;

    Ok(json!({
        "id": student_id,
        "studentNo": student_no,
        "lastName": last_name,
        "firstName": first_name,
        "active": true,
    }))
}

fn students_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, student_no, last_name, first_name, active
         FROM students
         ORDER BY last_name, first_name, student_no",
    )?;
    let students = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "studentNo": row.get::<_, String>(1)?,
                "lastName": row.get::<_, String>(2)?,
                "firstName": row.get::<_, String>(3)?,
                "active": row.get::<_, i64>(4)? != 0,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "students": students }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "students.create" => Some(with_db(state, req, students_create)),
        "students.list" => Some(with_db(state, req, students_list)),
        _ => None,
    }
}
