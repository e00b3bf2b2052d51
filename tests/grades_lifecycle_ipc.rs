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

fn open_with_course(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
    course: serde_json::Value,
) -> (String, String) {
    request_ok(
        stdin,
        reader,
        "open",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy(), "today": "2024-10-02" }),
    );
    let student = request_ok(
        stdin,
        reader,
        "student",
        "students.create",
        json!({ "studentNo": "S-001", "lastName": "Okafor", "firstName": "Ada" }),
    );
    let course = request_ok(stdin, reader, "course", "courses.create", course);
    let student_id = student["id"].as_str().expect("student id").to_string();
    let course_id = course["id"].as_str().expect("course id").to_string();
    (student_id, course_id)
}

fn enroll(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    student_id: &str,
    course_id: &str,
) -> String {
    let enrollment = request_ok(
        stdin,
        reader,
        "enroll",
        "enrollments.create",
        json!({ "studentId": student_id, "courseId": course_id }),
    );
    assert_eq!(enrollment["academicYear"], "2024-2025");
    enrollment["id"].as_str().expect("enrollment id").to_string()
}

#[test]
fn evaluate_reports_status_scale_and_band() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let cases = [
        (12.0, 10.0, "validated", "twenty"),
        (8.0, 10.0, "retake_eligible", "twenty"),
        (6.0, 10.0, "failed", "twenty"),
        (60.0, 70.0, "retake_eligible", "hundred"),
    ];
    for (i, (grade, threshold, status, scale)) in cases.iter().enumerate() {
        let r = request_ok(
            &mut stdin,
            &mut reader,
            &format!("eval-{}", i),
            "grades.evaluate",
            json!({ "grade": grade, "passingThreshold": threshold }),
        );
        assert_eq!(r["status"], *status, "grade {} / {}", grade, threshold);
        assert_eq!(r["scale"], *scale);
    }

    let ungraded = request_ok(
        &mut stdin,
        &mut reader,
        "eval-zero",
        "grades.evaluate",
        json!({ "grade": 0, "passingThreshold": 10 }),
    );
    assert_eq!(ungraded["status"], serde_json::Value::Null);
    assert_eq!(ungraded["ungraded"], true);
    assert_eq!(ungraded["retakeBand"], 3.0);

    let explicit = request_ok(
        &mut stdin,
        &mut reader,
        "eval-explicit",
        "grades.evaluate",
        json!({ "grade": 5, "passingThreshold": 18, "gradeScale": "hundred" }),
    );
    assert_eq!(explicit["status"], "retake_eligible");
    assert_eq!(explicit["retakeBand"], 15.0);

    let mixed_case = request_ok(
        &mut stdin,
        &mut reader,
        "eval-mixed-case",
        "grades.evaluate",
        json!({ "grade": 5, "passingThreshold": 18, "gradeScale": " Hundred " }),
    );
    assert_eq!(mixed_case["status"], "retake_eligible");
    assert_eq!(mixed_case["scale"], "hundred");

    for (i, (grade, threshold)) in [(150.0, 10.0), (20.5, 10.0), (150.0, 70.0), (-1.0, 10.0)]
        .iter()
        .enumerate()
    {
        let over = request(
            &mut stdin,
            &mut reader,
            &format!("eval-range-{}", i),
            "grades.evaluate",
            json!({ "grade": grade, "passingThreshold": threshold }),
        );
        assert_eq!(error_code(&over), "bad_params", "grade {} / {}", grade, threshold);
    }

    let at_max = request_ok(
        &mut stdin,
        &mut reader,
        "eval-at-max",
        "grades.evaluate",
        json!({ "grade": 20, "passingThreshold": 10 }),
    );
    assert_eq!(at_max["status"], "validated");

    let bad = request(
        &mut stdin,
        &mut reader,
        "eval-bad",
        "grades.evaluate",
        json!({ "grade": 5, "passingThreshold": 0 }),
    );
    assert_eq!(error_code(&bad), "bad_params");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn retake_supersedes_the_normal_grade_and_keeps_history() {
    let workspace = temp_dir("campus-grades-retake");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (student_id, course_id) = open_with_course(
        &mut stdin,
        &mut reader,
        &workspace,
        json!({ "code": "MAT101", "title": "Analysis I", "passingThreshold": 10 }),
    );
    let enrollment_id = enroll(&mut stdin, &mut reader, &student_id, &course_id);

    let early = request(
        &mut stdin,
        &mut reader,
        "retake-early",
        "grades.retake",
        json!({ "enrollmentId": enrollment_id, "value": 12 }),
    );
    assert_eq!(error_code(&early), "retake_not_allowed");

    let normal = request_ok(
        &mut stdin,
        &mut reader,
        "record",
        "grades.record",
        json!({ "enrollmentId": enrollment_id, "value": 8 }),
    );
    assert_eq!(normal["grade"]["status"], "retake_eligible");
    assert_eq!(normal["grade"]["session"], "normal");

    let retake = request_ok(
        &mut stdin,
        &mut reader,
        "retake",
        "grades.retake",
        json!({ "enrollmentId": enrollment_id, "value": 11.5 }),
    );
    assert_eq!(retake["grade"]["session"], "retake");
    assert_eq!(retake["grade"]["status"], "validated");
    assert_eq!(retake["grade"]["active"], true);

    let superseded = request(
        &mut stdin,
        &mut reader,
        "record-again",
        "grades.record",
        json!({ "enrollmentId": enrollment_id, "value": 15 }),
    );
    assert_eq!(error_code(&superseded), "grade_superseded");

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "grades.list",
        json!({ "enrollmentId": enrollment_id }),
    );
    assert_eq!(list["outcome"], "validated");
    let grades = list["grades"].as_array().expect("grades array");
    assert_eq!(grades.len(), 2);
    assert_eq!(grades[0]["session"], "normal");
    assert_eq!(grades[0]["active"], false);
    assert_eq!(grades[0]["status"], "retake_eligible");
    assert_eq!(grades[1]["session"], "retake");
    assert_eq!(grades[1]["active"], true);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn validated_grade_cannot_be_lowered_in_the_same_session() {
    let workspace = temp_dir("campus-grades-lock");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (student_id, course_id) = open_with_course(
        &mut stdin,
        &mut reader,
        &workspace,
        json!({ "code": "PHY200", "title": "Mechanics", "passingThreshold": 70 }),
    );
    let enrollment_id = enroll(&mut stdin, &mut reader, &student_id, &course_id);

    let ungraded = request_ok(
        &mut stdin,
        &mut reader,
        "r0",
        "grades.record",
        json!({ "enrollmentId": enrollment_id, "value": null }),
    );
    assert_eq!(ungraded["grade"]["status"], serde_json::Value::Null);

    let failed = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "grades.record",
        json!({ "enrollmentId": enrollment_id, "value": 40 }),
    );
    assert_eq!(failed["grade"]["status"], "failed");

    let no_retake = request(
        &mut stdin,
        &mut reader,
        "r1-retake",
        "grades.retake",
        json!({ "enrollmentId": enrollment_id, "value": 80 }),
    );
    assert_eq!(error_code(&no_retake), "retake_not_allowed");

    let validated = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "grades.record",
        json!({ "enrollmentId": enrollment_id, "value": 75 }),
    );
    assert_eq!(validated["grade"]["status"], "validated");

    let higher = request_ok(
        &mut stdin,
        &mut reader,
        "r3",
        "grades.record",
        json!({ "enrollmentId": enrollment_id, "value": 90 }),
    );
    assert_eq!(higher["grade"]["value"], 90.0);

    let lowered = request(
        &mut stdin,
        &mut reader,
        "r4",
        "grades.record",
        json!({ "enrollmentId": enrollment_id, "value": 60 }),
    );
    assert_eq!(error_code(&lowered), "grade_locked");

    let out_of_scale = request(
        &mut stdin,
        &mut reader,
        "r5",
        "grades.record",
        json!({ "enrollmentId": enrollment_id, "value": 101 }),
    );
    assert_eq!(error_code(&out_of_scale), "bad_params");

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "grades.list",
        json!({ "enrollmentId": enrollment_id }),
    );
    assert_eq!(list["grades"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(list["grades"][0]["value"], 90.0);
    assert_eq!(list["scale"], "hundred");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn course_defaults_and_enrollment_year_rules() {
    let workspace = temp_dir("campus-grades-defaults");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "open",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy(), "today": "2024-10-02" }),
    );

    let setup = request_ok(&mut stdin, &mut reader, "s0", "setup.get", json!({}));
    assert_eq!(setup["grading"]["defaultPassingThreshold"], 10);
    assert_eq!(setup["grading"]["defaultGradeScale"], "inferred");

    request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "setup.update",
        json!({
            "section": "grading",
            "patch": { "defaultPassingThreshold": 18, "defaultGradeScale": "hundred" }
        }),
    );
    let bad_patch = request(
        &mut stdin,
        &mut reader,
        "s2",
        "setup.update",
        json!({ "section": "grading", "patch": { "defaultGradeScale": "fifty" } }),
    );
    assert_eq!(error_code(&bad_patch), "bad_params");

    let course = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "courses.create",
        json!({ "code": "BIO110", "title": "Cell Biology" }),
    );
    assert_eq!(course["passingThreshold"], 18.0);
    assert_eq!(course["gradeScale"], "hundred");
    assert_eq!(course["effectiveScale"], "hundred");

    let dup = request(
        &mut stdin,
        &mut reader,
        "c2",
        "courses.create",
        json!({ "code": "BIO110", "title": "Again" }),
    );
    assert_eq!(error_code(&dup), "conflict");

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "st",
        "students.create",
        json!({ "studentNo": "S-900", "lastName": "Lindqvist", "firstName": "Mira" }),
    );
    let student_id = student["id"].as_str().expect("student id");
    let course_id = course["id"].as_str().expect("course id");

    let past = request(
        &mut stdin,
        &mut reader,
        "e0",
        "enrollments.create",
        json!({ "studentId": student_id, "courseId": course_id, "academicYear": "2019-2020" }),
    );
    assert_eq!(error_code(&past), "not_found");

    let enrollment = request_ok(
        &mut stdin,
        &mut reader,
        "e1",
        "enrollments.create",
        json!({ "studentId": student_id, "courseId": course_id }),
    );
    assert_eq!(enrollment["academicYear"], "2024-2025");

    let twice = request(
        &mut stdin,
        &mut reader,
        "e2",
        "enrollments.create",
        json!({ "studentId": student_id, "courseId": course_id }),
    );
    assert_eq!(error_code(&twice), "conflict");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "e3",
        "enrollments.list",
        json!({ "courseId": course_id }),
    );
    assert_eq!(listed["enrollments"].as_array().map(|a| a.len()), Some(1));

    // 5/100 with an explicit hundred scale sits in the 15-point band.
    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "grades.record",
        json!({ "enrollmentId": enrollment["id"], "value": 5 }),
    );
    assert_eq!(graded["grade"]["status"], "retake_eligible");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
