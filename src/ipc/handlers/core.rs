use crate::academic_year::{self, AcademicYear};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::get_date_or_today;
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

/// Opens (or creates) the workspace database and makes sure today's academic
/// year exists and is the current one. The year step never fails the open.
pub fn open_workspace(
    state: &mut AppState,
    path: &Path,
    today: NaiveDate,
) -> anyhow::Result<Option<AcademicYear>> {
    let conn = db::open_db(path)?;
    let current = academic_year::ensure_current_on_open(&conn, today);
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    info!(workspace = %path.display(), "workspace opened");
    Ok(current)
}

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };
    let today = match get_date_or_today(&req.params, "today") {
        Ok(d) => d,
        Err(e) => return e.response(&req.id),
    };

    match open_workspace(state, &path, today) {
        Ok(current) => ok(
            &req.id,
            json!({
                "workspacePath": path.to_string_lossy(),
                "currentYear": current,
            }),
        ),
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
