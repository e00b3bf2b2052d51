use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_campusd");
    let mut child = Command::new(exe)
        .env_remove("CAMPUSD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn campusd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn resolve_needs_no_workspace_and_follows_september_cut() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let sep = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "academicYears.resolve",
        json!({ "date": "2024-09-01" }),
    );
    assert_eq!(sep["label"], "2024-2025");
    assert_eq!(sep["startDate"], "2024-09-01");
    assert_eq!(sep["endDate"], "2025-08-31");

    let march = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "academicYears.resolve",
        json!({ "date": "2024-03-15" }),
    );
    assert_eq!(march["label"], "2023-2024");
    assert_eq!(march["startDate"], "2023-09-01");
    assert_eq!(march["endDate"], "2024-08-31");

    let bad = request(
        &mut stdin,
        &mut reader,
        "3",
        "academicYears.resolve",
        json!({ "date": "15/03/2024" }),
    );
    assert_eq!(error_code(&bad), "bad_params");

    let no_ws = request(&mut stdin, &mut reader, "4", "academicYears.list", json!({}));
    assert_eq!(error_code(&no_ws), "no_workspace");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn workspace_open_ensures_and_rollover_moves_current_flag() {
    let workspace = temp_dir("campus-years");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy(), "today": "2024-10-02" }),
    );
    assert_eq!(opened["currentYear"]["label"], "2024-2025");
    assert_eq!(opened["currentYear"]["isCurrent"], true);

    let again = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "academicYears.ensureCurrent",
        json!({ "today": "2025-05-20" }),
    );
    assert_eq!(again["outcome"], "already_current");

    let rolled = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "academicYears.ensureCurrent",
        json!({ "today": "2025-09-01" }),
    );
    assert_eq!(rolled["outcome"], "created");
    assert_eq!(rolled["year"]["label"], "2025-2026");

    let list = request_ok(&mut stdin, &mut reader, "4", "academicYears.list", json!({}));
    let years = list["years"].as_array().expect("years array");
    assert_eq!(years.len(), 2);
    assert_eq!(years[0]["label"], "2024-2025");
    assert_eq!(years[0]["isCurrent"], false);
    assert_eq!(years[1]["isCurrent"], true);

    let switched = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "academicYears.setCurrent",
        json!({ "label": "2024-2025" }),
    );
    assert_eq!(switched["year"]["isCurrent"], true);

    let current = request_ok(&mut stdin, &mut reader, "6", "academicYears.current", json!({}));
    assert_eq!(current["year"]["label"], "2024-2025");

    let promoted = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "academicYears.ensureCurrent",
        json!({ "today": "2025-11-11" }),
    );
    assert_eq!(promoted["outcome"], "promoted");

    let list = request_ok(&mut stdin, &mut reader, "8", "academicYears.list", json!({}));
    let flagged: Vec<_> = list["years"]
        .as_array()
        .expect("years array")
        .iter()
        .filter(|y| y["isCurrent"] == true)
        .collect();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0]["label"], "2025-2026");

    let unknown = request(
        &mut stdin,
        &mut reader,
        "9",
        "academicYears.setCurrent",
        json!({ "label": "1999-2000" }),
    );
    assert_eq!(error_code(&unknown), "not_found");

    let malformed = request(
        &mut stdin,
        &mut reader,
        "10",
        "academicYears.setCurrent",
        json!({ "label": "2024-2026" }),
    );
    assert_eq!(error_code(&malformed), "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn reopening_workspace_keeps_a_single_current_year() {
    let workspace = temp_dir("campus-years-reopen");

    for (i, today) in ["2023-12-01", "2024-02-01", "2024-09-15"].iter().enumerate() {
        let (mut child, mut stdin, mut reader) = spawn_sidecar();
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("open-{}", i),
            "workspace.select",
            json!({ "path": workspace.to_string_lossy(), "today": today }),
        );
        drop(stdin);
        let _ = child.wait();
    }

    let conn = rusqlite::Connection::open(workspace.join("campus.sqlite3")).expect("open db");
    let current: Vec<String> = conn
        .prepare("SELECT label FROM academic_years WHERE is_current = 1")
        .expect("prepare")
        .query_map([], |r| r.get(0))
        .expect("query")
        .collect::<Result<Vec<_>, _>>()
        .expect("rows");
    assert_eq!(current, vec!["2024-2025".to_string()]);
    let total: i64 = conn
        .query_row("SELECT COUNT(*) FROM academic_years", [], |r| r.get(0))
        .expect("count");
    assert_eq!(total, 2);

    drop(conn);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn concurrent_daemons_leave_exactly_one_current_year() {
    let workspace = temp_dir("campus-years-race");
    let mut sidecars: Vec<_> = (0..4).map(|_| spawn_sidecar()).collect();

    // Send every open before reading any answer so the ensure steps overlap.
    for (i, (_, stdin, _)) in sidecars.iter_mut().enumerate() {
        let payload = json!({
            "id": format!("race-{}", i),
            "method": "workspace.select",
            "params": { "path": workspace.to_string_lossy(), "today": "2026-10-19" },
        });
        writeln!(stdin, "{}", payload).expect("write request");
        stdin.flush().expect("flush request");
    }
    for (_, _, reader) in sidecars.iter_mut() {
        let mut line = String::new();
        reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty());
    }
    for (mut child, stdin, _) in sidecars {
        drop(stdin);
        let _ = child.wait();
    }

    let conn = rusqlite::Connection::open(workspace.join("campus.sqlite3")).expect("open db");
    let (rows, current): (i64, i64) = conn
        .query_row(
            "SELECT COUNT(*), COALESCE(SUM(is_current), 0) FROM academic_years",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("count");
    assert_eq!(rows, 1);
    assert_eq!(current, 1);

    drop(conn);
    let _ = std::fs::remove_dir_all(workspace);
}
