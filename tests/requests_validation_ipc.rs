mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};

fn seed_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
) -> String {
    let student = request_ok(
        stdin,
        reader,
        id,
        "students.create",
        json!({ "lastName": "Kondo", "firstName": "Hana" }),
    );
    student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
}

#[test]
fn absence_request_enforces_deadline_and_flags_slot() {
    let workspace = temp_dir("tutor-absence");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student_id = seed_student(&mut stdin, &mut reader, "2");

    let slot = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "slots.create",
        json!({
            "studentId": student_id,
            "slotType": "lesson",
            "date": "2024-06-20",
            "startTime": "18:00",
            "endTime": "19:00"
        }),
    );
    let slot_id = slot
        .get("slotId")
        .and_then(|v| v.as_str())
        .expect("slotId")
        .to_string();

    // Less than 24 hours before the lesson.
    let late = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "absence.request",
        json!({
            "slotId": slot_id,
            "reason": "fever",
            "now": "2024-06-20T10:00:00"
        }),
    );
    assert_eq!(late, "time_limit");

    let accepted = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "absence.request",
        json!({
            "slotId": slot_id,
            "reason": "family trip",
            "now": "2024-06-18T10:00:00"
        }),
    );
    assert_eq!(
        accepted.get("slotStatusUpdated").and_then(|v| v.as_bool()),
        Some(true)
    );
    let request_id = accepted
        .get("requestId")
        .and_then(|v| v.as_str())
        .expect("requestId")
        .to_string();

    // The slot is no longer scheduled, so a second request conflicts.
    let dup = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "absence.request",
        json!({
            "slotId": slot_id,
            "reason": "again",
            "now": "2024-06-18T11:00:00"
        }),
    );
    assert_eq!(dup, "conflict");

    let slots = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "slots.list",
        json!({ "studentId": student_id }),
    );
    let status = slots.get("slots").and_then(|v| v.as_array()).expect("slots")[0]
        .get("status")
        .and_then(|v| v.as_str())
        .expect("status")
        .to_string();
    assert_eq!(status, "absence_requested");

    // Approval cancels the slot and queues a notification.
    let decided = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "absence.decide",
        json!({ "requestId": request_id, "approve": true }),
    );
    assert_eq!(decided.get("status").and_then(|v| v.as_str()), Some("approved"));
    assert_eq!(
        decided.get("notificationQueued").and_then(|v| v.as_bool()),
        Some(true)
    );

    let slots = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "slots.list",
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        slots.get("slots").and_then(|v| v.as_array()).expect("slots")[0]
            .get("status")
            .and_then(|v| v.as_str()),
        Some("cancelled")
    );

    let notifications = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "notifications.list",
        json!({ "recipientId": student_id, "unreadOnly": true }),
    );
    assert_eq!(
        notifications
            .get("notifications")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );

    // A decided request cannot be decided again.
    let redecide = request_err(
        &mut stdin,
        &mut reader,
        "11",
        "absence.decide",
        json!({ "requestId": request_id, "approve": false }),
    );
    assert_eq!(redecide, "conflict");
}

#[test]
fn absence_rejection_restores_slot() {
    let workspace = temp_dir("tutor-absence-reject");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student_id = seed_student(&mut stdin, &mut reader, "2");
    let slot = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "slots.create",
        json!({
            "studentId": student_id,
            "slotType": "interview",
            "date": "2024-07-01",
            "startTime": "17:00",
            "endTime": "17:30"
        }),
    );
    let slot_id = slot
        .get("slotId")
        .and_then(|v| v.as_str())
        .expect("slotId")
        .to_string();

    let accepted = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "absence.request",
        json!({ "slotId": slot_id, "reason": "exam week", "now": "2024-06-25T09:00:00" }),
    );
    let request_id = accepted
        .get("requestId")
        .and_then(|v| v.as_str())
        .expect("requestId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "absence.decide",
        json!({ "requestId": request_id, "approve": false }),
    );
    let slots = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "slots.list",
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        slots.get("slots").and_then(|v| v.as_array()).expect("slots")[0]
            .get("status")
            .and_then(|v| v.as_str()),
        Some("scheduled")
    );

    let pending = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "absence.list",
        json!({ "status": "pending" }),
    );
    assert_eq!(
        pending
            .get("requests")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
}

#[test]
fn additional_request_checks_overlap_and_creates_slot_on_approval() {
    let workspace = temp_dir("tutor-additional");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student_id = seed_student(&mut stdin, &mut reader, "2");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "slots.create",
        json!({
            "studentId": student_id,
            "slotType": "lesson",
            "date": "2024-06-21",
            "startTime": "16:00",
            "endTime": "17:00"
        }),
    );

    // Overlaps the existing lesson.
    let overlap = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "additional.request",
        json!({
            "studentId": student_id,
            "date": "2024-06-21",
            "startTime": "16:30",
            "endTime": "17:30",
            "now": "2024-06-15T09:00:00"
        }),
    );
    assert_eq!(overlap, "conflict");

    // Requested start already passed.
    let past = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "additional.request",
        json!({
            "studentId": student_id,
            "date": "2024-06-10",
            "startTime": "10:00",
            "endTime": "11:00",
            "now": "2024-06-15T09:00:00"
        }),
    );
    assert_eq!(past, "time_limit");

    let accepted = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "additional.request",
        json!({
            "studentId": student_id,
            "date": "2024-06-22",
            "startTime": "10:00",
            "endTime": "11:00",
            "note": "extra math before the test",
            "now": "2024-06-15T09:00:00"
        }),
    );
    let request_id = accepted
        .get("requestId")
        .and_then(|v| v.as_str())
        .expect("requestId")
        .to_string();

    let decided = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "additional.decide",
        json!({ "requestId": request_id, "approve": true }),
    );
    assert_eq!(decided.get("slotCreated").and_then(|v| v.as_bool()), Some(true));
    let created_slot_id = decided
        .get("createdSlotId")
        .and_then(|v| v.as_str())
        .expect("createdSlotId")
        .to_string();

    let slots = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "slots.list",
        json!({ "studentId": student_id, "from": "2024-06-22", "to": "2024-06-22" }),
    );
    let created = &slots.get("slots").and_then(|v| v.as_array()).expect("slots")[0];
    assert_eq!(created.get("id").and_then(|v| v.as_str()), Some(created_slot_id.as_str()));
    assert_eq!(created.get("slotType").and_then(|v| v.as_str()), Some("extra"));
    assert_eq!(created.get("status").and_then(|v| v.as_str()), Some("scheduled"));
}

#[test]
fn overlapping_additional_approvals_do_not_double_book() {
    let workspace = temp_dir("tutor-additional-race");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student_id = seed_student(&mut stdin, &mut reader, "2");

    // Both requests pass the request-time checks: neither overlaps an
    // existing slot, only each other.
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "additional.request",
        json!({
            "studentId": student_id,
            "date": "2024-07-01",
            "startTime": "16:00",
            "endTime": "17:30",
            "now": "2024-06-15T09:00:00"
        }),
    );
    let first_id = first
        .get("requestId")
        .and_then(|v| v.as_str())
        .expect("requestId")
        .to_string();
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "additional.request",
        json!({
            "studentId": student_id,
            "date": "2024-07-01",
            "startTime": "16:30",
            "endTime": "17:30",
            "now": "2024-06-15T09:00:00"
        }),
    );
    let second_id = second
        .get("requestId")
        .and_then(|v| v.as_str())
        .expect("requestId")
        .to_string();

    let decided = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "additional.decide",
        json!({ "requestId": first_id, "approve": true }),
    );
    assert_eq!(decided.get("slotCreated").and_then(|v| v.as_bool()), Some(true));

    // The first approval took the range; the second approval stands but
    // must not create a second overlapping slot.
    let decided = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "additional.decide",
        json!({ "requestId": second_id, "approve": true }),
    );
    assert_eq!(decided.get("status").and_then(|v| v.as_str()), Some("approved"));
    assert_eq!(decided.get("slotCreated").and_then(|v| v.as_bool()), Some(false));
    assert!(decided.get("createdSlotId").expect("createdSlotId").is_null());

    let slots = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "slots.list",
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        slots.get("slots").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );
}

#[test]
fn deadline_hours_come_from_settings() {
    let workspace = temp_dir("tutor-deadline-setting");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student_id = seed_student(&mut stdin, &mut reader, "2");
    let slot = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "slots.create",
        json!({
            "studentId": student_id,
            "slotType": "lesson",
            "date": "2024-06-20",
            "startTime": "18:00",
            "endTime": "19:00"
        }),
    );
    let slot_id = slot
        .get("slotId")
        .and_then(|v| v.as_str())
        .expect("slotId")
        .to_string();

    // Tighten the window to 2 hours and the same-day request passes.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "requests", "patch": { "deadlineHours": 2 } }),
    );
    let accepted = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "absence.request",
        json!({ "slotId": slot_id, "reason": "cold", "now": "2024-06-20T10:00:00" }),
    );
    assert_eq!(accepted.get("status").and_then(|v| v.as_str()), Some("pending"));
}

#[test]
fn requests_require_an_open_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let code = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "absence.list",
        json!({}),
    );
    assert_eq!(code, "no_workspace");
    drop(stdin);
}
