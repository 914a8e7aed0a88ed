mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn roster_crud_and_assignment_guard() {
    let workspace = temp_dir("tutor-roster");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "lastName": "Sato", "firstName": "Yui", "grade": "9" }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "teachers.create",
        json!({ "lastName": "Mori", "firstName": "Ken", "subject": "math" }),
    );
    let teacher_id = teacher
        .get("teacherId")
        .and_then(|v| v.as_str())
        .expect("teacherId")
        .to_string();

    let set = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "assignments.set",
        json!({ "teacherId": teacher_id, "studentId": student_id, "role": "lesson" }),
    );
    assert_eq!(set.get("created").and_then(|v| v.as_bool()), Some(true));
    let assignment_id = set
        .get("assignmentId")
        .and_then(|v| v.as_str())
        .expect("assignmentId")
        .to_string();

    // Setting the same pair again is idempotent.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "assignments.set",
        json!({ "teacherId": teacher_id, "studentId": student_id, "role": "lesson" }),
    );
    assert_eq!(again.get("created").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        again.get("assignmentId").and_then(|v| v.as_str()),
        Some(assignment_id.as_str())
    );

    let bad_role = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "assignments.set",
        json!({ "teacherId": teacher_id, "studentId": student_id, "role": "mentor" }),
    );
    assert_eq!(bad_role, "bad_params");

    // A teacher with assignments cannot be removed.
    let blocked = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "teachers.delete",
        json!({ "teacherId": teacher_id }),
    );
    assert_eq!(blocked, "conflict");

    let teachers = request_ok(&mut stdin, &mut reader, "8", "teachers.list", json!({}));
    let row = &teachers
        .get("teachers")
        .and_then(|v| v.as_array())
        .expect("teachers")[0];
    assert_eq!(row.get("displayName").and_then(|v| v.as_str()), Some("Mori, Ken"));
    assert_eq!(row.get("assignmentCount").and_then(|v| v.as_i64()), Some(1));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "assignments.delete",
        json!({ "assignmentId": assignment_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "teachers.delete",
        json!({ "teacherId": teacher_id }),
    );
    let teachers = request_ok(&mut stdin, &mut reader, "11", "teachers.list", json!({}));
    assert_eq!(
        teachers
            .get("teachers")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
}

#[test]
fn student_update_patches_fields() {
    let workspace = temp_dir("tutor-roster-update");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "lastName": "Abe", "firstName": "Ren" }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.update",
        json!({
            "studentId": student_id,
            "patch": { "grade": "10", "guardianContact": "abe@example.com", "active": false }
        }),
    );
    let empty_name = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "students.update",
        json!({ "studentId": student_id, "patch": { "lastName": "  " } }),
    );
    assert_eq!(empty_name, "bad_params");

    let students = request_ok(&mut stdin, &mut reader, "5", "students.list", json!({}));
    let row = &students
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students")[0];
    assert_eq!(row.get("grade").and_then(|v| v.as_str()), Some("10"));
    assert_eq!(
        row.get("guardianContact").and_then(|v| v.as_str()),
        Some("abe@example.com")
    );
    assert_eq!(row.get("active").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(row.get("displayName").and_then(|v| v.as_str()), Some("Abe, Ren"));
}

#[test]
fn student_delete_removes_dependent_rows() {
    let workspace = temp_dir("tutor-roster-delete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "lastName": "Oda", "firstName": "Mio" }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    let slot = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "slots.create",
        json!({
            "studentId": student_id,
            "slotType": "lesson",
            "date": "2024-09-02",
            "startTime": "18:00",
            "endTime": "19:00"
        }),
    );
    let slot_id = slot
        .get("slotId")
        .and_then(|v| v.as_str())
        .expect("slotId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "absence.request",
        json!({ "slotId": slot_id, "reason": "trip", "now": "2024-08-20T09:00:00" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "todoLists.ensure",
        json!({ "studentId": student_id, "weekStart": "2024-09-02" }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.delete",
        json!({ "studentId": student_id }),
    );

    let slots = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "slots.list",
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        slots.get("slots").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
    let requests = request_ok(&mut stdin, &mut reader, "8", "absence.list", json!({}));
    assert_eq!(
        requests
            .get("requests")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
}

#[test]
fn admin_email_must_be_unique() {
    let workspace = temp_dir("tutor-admins");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "admins.create",
        json!({ "name": "Front Desk", "email": "desk@example.com" }),
    );
    let dup = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "admins.create",
        json!({ "name": "Front Desk 2", "email": "desk@example.com" }),
    );
    assert_eq!(dup, "conflict");

    let admins = request_ok(&mut stdin, &mut reader, "4", "admins.list", json!({}));
    assert_eq!(
        admins.get("admins").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );
}
