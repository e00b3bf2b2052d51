use crate::academic_year::YearError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::Value;
use tracing::warn;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

impl From<YearError> for HandlerErr {
    fn from(e: YearError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

/// Runs `f` against the open workspace database, or answers `no_workspace`.
pub fn with_db<F>(state: &AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&Connection, &Value) -> Result<Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => {
            warn!(method = %req.method, code = e.code, message = %e.message, "request failed");
            e.response(&req.id)
        }
    }
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_required_trimmed(params: &Value, key: &str) -> Result<String, HandlerErr> {
    let s = get_required_str(params, key)?.trim().to_string();
    if s.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(s)
}

pub fn get_optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be string", key))),
    }
}

pub fn get_required_f64(params: &Value, key: &str) -> Result<f64, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Err(HandlerErr::bad_params(format!("missing {}", key))),
        Some(v) => v
            .as_f64()
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be number", key))),
    }
}

pub fn get_optional_f64(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be number", key))),
    }
}

/// Optional `YYYY-MM-DD` parameter; falls back to the local date.
pub fn get_date_or_today(params: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    match get_optional_str(params, key)? {
        Some(raw) => crate::dates::parse_iso_date(&raw)
            .map_err(|e| HandlerErr::bad_params(e.to_string())),
        None => Ok(crate::dates::today_local()),
    }
}

/// Maps an INSERT failure, reporting uniqueness clashes as `conflict`.
pub fn insert_err(e: rusqlite::Error, table: &str) -> HandlerErr {
    let code = match &e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            "conflict"
        }
        _ => "db_insert_failed",
    };
    HandlerErr::new(code, e.to_string()).with_details(serde_json::json!({ "table": table }))
}
