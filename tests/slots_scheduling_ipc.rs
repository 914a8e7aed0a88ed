mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn slot_creation_rejects_overlap_and_bad_ranges() {
    let workspace = temp_dir("tutor-slots");
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
        json!({ "lastName": "Ito", "firstName": "Sora" }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    let bad_range = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "slots.create",
        json!({
            "studentId": student_id,
            "slotType": "lesson",
            "date": "2024-06-17",
            "startTime": "18:00",
            "endTime": "18:00"
        }),
    );
    assert_eq!(bad_range, "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "slots.create",
        json!({
            "studentId": student_id,
            "slotType": "lesson",
            "date": "2024-06-17",
            "startTime": "18:00",
            "endTime": "19:00"
        }),
    );

    let overlap = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "slots.create",
        json!({
            "studentId": student_id,
            "slotType": "interview",
            "date": "2024-06-17",
            "startTime": "18:30",
            "endTime": "19:30"
        }),
    );
    assert_eq!(overlap, "conflict");

    // Back-to-back slots do not overlap.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "slots.create",
        json!({
            "studentId": student_id,
            "slotType": "interview",
            "date": "2024-06-17",
            "startTime": "19:00",
            "endTime": "19:30"
        }),
    );

    let slots = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "slots.list",
        json!({ "studentId": student_id, "from": "2024-06-17", "to": "2024-06-17" }),
    );
    let rows = slots.get("slots").and_then(|v| v.as_array()).expect("slots");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("startTime").and_then(|v| v.as_str()), Some("18:00"));
    assert_eq!(rows[1].get("startTime").and_then(|v| v.as_str()), Some("19:00"));
}

#[test]
fn slot_update_moves_and_cancel_frees_the_range() {
    let workspace = temp_dir("tutor-slots-update");
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
        json!({ "lastName": "Kato", "firstName": "Rin" }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "slots.create",
        json!({
            "studentId": student_id,
            "slotType": "lesson",
            "date": "2024-06-18",
            "startTime": "17:00",
            "endTime": "18:00"
        }),
    );
    let first_id = first
        .get("slotId")
        .and_then(|v| v.as_str())
        .expect("slotId")
        .to_string();
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "slots.create",
        json!({
            "studentId": student_id,
            "slotType": "lesson",
            "date": "2024-06-18",
            "startTime": "19:00",
            "endTime": "20:00"
        }),
    );
    let second_id = second
        .get("slotId")
        .and_then(|v| v.as_str())
        .expect("slotId")
        .to_string();

    // Moving onto the other slot conflicts.
    let collide = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "slots.update",
        json!({ "slotId": second_id, "patch": { "startTime": "17:30", "endTime": "18:30" } }),
    );
    assert_eq!(collide, "conflict");

    // Cancelling the first slot frees its range.
    let cancelled = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "slots.cancel",
        json!({ "slotId": first_id }),
    );
    assert_eq!(cancelled.get("status").and_then(|v| v.as_str()), Some("cancelled"));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "slots.update",
        json!({ "slotId": second_id, "patch": { "startTime": "17:30", "endTime": "18:30" } }),
    );

    // Cancelling twice reports the no-op.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "slots.cancel",
        json!({ "slotId": first_id }),
    );
    assert_eq!(
        again.get("alreadyCancelled").and_then(|v| v.as_bool()),
        Some(true)
    );

    let missing = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "slots.update",
        json!({ "slotId": "no-such-slot", "patch": { "startTime": "10:00" } }),
    );
    assert_eq!(missing, "not_found");

    let unknown_field = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "slots.update",
        json!({ "slotId": second_id, "patch": { "color": "red" } }),
    );
    assert_eq!(unknown_field, "bad_params");
}
