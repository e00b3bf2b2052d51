use crate::academic_year::{
    ensure_current_in_db, resolve_academic_year, set_current_in_db, AcademicYearStore,
    SqliteYearStore,
};
use crate::dates::format_iso_date;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_date_or_today, get_required_trimmed, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn years_resolve(params: &Value) -> Result<Value, HandlerErr> {
    let date = get_date_or_today(params, "date")?;
    let span = resolve_academic_year(date)?;
    Ok(json!({
        "label": span.label,
        "startDate": format_iso_date(span.start),
        "endDate": format_iso_date(span.end),
    }))
}

fn handle_resolve(req: &Request) -> Value {
    match years_resolve(&req.params) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn years_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let years = SqliteYearStore::new(conn).list()?;
    Ok(json!({ "years": years }))
}

fn years_current(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let year = SqliteYearStore::new(conn).find_current()?;
    Ok(json!({ "year": year }))
}

fn years_ensure_current(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let today = get_date_or_today(params, "today")?;
    // Explicit calls report storage failures instead of swallowing them.
    let (outcome, year) = ensure_current_in_db(conn, today)?;
    Ok(json!({ "outcome": outcome, "year": year }))
}

fn years_set_current(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let label = get_required_trimmed(params, "label")?;
    let year = set_current_in_db(conn, &label)?;
    Ok(json!({ "year": year }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "academicYears.resolve" => Some(handle_resolve(req)),
        "academicYears.list" => Some(with_db(state, req, years_list)),
        "academicYears.current" => Some(with_db(state, req, years_current)),
        "academicYears.ensureCurrent" => Some(with_db(state, req, years_ensure_current)),
        "academicYears.setCurrent" => Some(with_db(state, req, years_set_current)),
        _ => None,
    }
}
