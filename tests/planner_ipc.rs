mod test_support;

use serde_json::{json, Value};
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request_err, request_ok, spawn_sidecar, str_field, temp_dir};

fn open_library(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, prefix: &str) -> std::path::PathBuf {
    let library = temp_dir(prefix);
    let _ = request_ok(
        stdin,
        reader,
        "open",
        "library.open",
        json!({ "path": library.to_string_lossy() }),
    );
    library
}

fn starts(v: &Value) -> Vec<String> {
    v["occurrences"]
        .as_array()
        .expect("occurrences")
        .iter()
        .filter_map(|o| o["startsAt"].as_str().map(str::to_string))
        .collect()
}

#[test]
fn weekly_schedules_expand_into_sorted_occurrences() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let library = open_library(&mut stdin, &mut reader, "studyd-schedules");

    // 2025-09-01 is a Monday.
    let lecture = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schedules.create",
        json!({
            "title": "Linear algebra",
            "startsAt": "2025-09-01T08:00:00",
            "endsAt": "2025-09-01T09:30:00",
            "location": "B2-301",
            "recurrenceRule": { "type": "weekly", "days": [3, 1, 1], "until": "2025-09-14" }
        }),
    );
    assert_eq!(lecture["recurrenceRule"]["days"], json!([1, 3]));
    assert_eq!(lecture["recurrenceRule"]["interval"], 1);
    let lecture_id = str_field(&lecture, "id");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schedules.create",
        json!({
            "title": "Office hours",
            "startsAt": "2025-09-02T10:00:00",
            "endsAt": "2025-09-02T11:00:00"
        }),
    );

    let expanded = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedules.expand",
        json!({ "from": "2025-09-01T00:00:00", "to": "2025-09-30T00:00:00" }),
    );
    assert_eq!(
        starts(&expanded),
        vec![
            "2025-09-01T08:00:00",
            "2025-09-02T10:00:00",
            "2025-09-03T08:00:00",
            "2025-09-08T08:00:00",
            "2025-09-10T08:00:00",
        ]
    );
    assert_eq!(expanded["truncated"], false);
    assert_eq!(expanded["occurrences"][0]["recurring"], true);
    assert_eq!(expanded["occurrences"][1]["recurring"], false);

    // Every other week, no end date.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedules.update",
        json!({
            "scheduleId": lecture_id.clone(),
            "patch": { "recurrenceRule": { "type": "weekly", "days": [1], "interval": 2 } }
        }),
    );
    let biweekly = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schedules.expand",
        json!({ "from": "2025-09-01T00:00", "to": "2025-10-01T00:00", "subjectId": null }),
    );
    let lecture_starts: Vec<String> = starts(&biweekly)
        .into_iter()
        .filter(|s| s.ends_with("08:00:00"))
        .collect();
    assert_eq!(
        lecture_starts,
        vec!["2025-09-01T08:00:00", "2025-09-15T08:00:00", "2025-09-29T08:00:00"]
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "setup.update",
        json!({ "section": "schedules", "patch": { "maxOccurrences": 2 } }),
    );
    let capped = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "schedules.expand",
        json!({ "from": "2025-09-01T00:00", "to": "2025-10-01T00:00" }),
    );
    assert_eq!(capped["occurrences"].as_array().map(|a| a.len()), Some(2));
    assert_eq!(capped["truncated"], true);

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "8",
            "schedules.create",
            json!({ "startsAt": "2025-09-01T10:00", "endsAt": "2025-09-01T09:00" }),
        ),
        "bad_params"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "9",
            "schedules.expand",
            json!({ "from": "2025-10-01T00:00", "to": "2025-09-01T00:00" }),
        ),
        "bad_params"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "10",
            "schedules.update",
            json!({ "scheduleId": lecture_id.clone(), "patch": { "colour": "red" } }),
        ),
        "bad_params"
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "schedules.delete",
        json!({ "scheduleId": lecture_id.clone() }),
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "12",
            "schedules.delete",
            json!({ "scheduleId": lecture_id }),
        ),
        "not_found"
    );
    let _ = std::fs::remove_dir_all(library);
}

#[test]
fn grades_roll_up_into_semester_and_cumulative_gpa() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let library = open_library(&mut stdin, &mut reader, "studyd-grades");

    let calculus = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.upsert",
        json!({ "input": { "courseName": "Calculus", "semester": "2025A", "credits": 3, "score": 8.6 } }),
    );
    assert_eq!(calculus["letter"], "A");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.upsert",
        json!({ "input": { "courseName": "Chemistry", "semester": "2025A", "credits": 2, "score": 6.0 } }),
    );
    let thesis = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.upsert",
        json!({ "input": { "courseName": "Thesis", "semester": "2025B", "credits": 4 } }),
    );
    assert_eq!(thesis["score"], Value::Null);

    // Partial update keeps the other fields.
    let renamed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.upsert",
        json!({ "gradeId": str_field(&thesis, "id"), "input": { "courseName": "Graduation thesis" } }),
    );
    assert_eq!(renamed["credits"], 4.0);
    assert_eq!(renamed["semester"], "2025B");

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "5",
            "grades.upsert",
            json!({ "input": { "courseName": "Bad", "credits": 3, "score": 11 } }),
        ),
        "bad_params"
    );

    let summary = request_ok(&mut stdin, &mut reader, "6", "grades.summary", json!({}));
    let cumulative = &summary["cumulative"];
    assert_eq!(cumulative["credits"], 5.0);
    assert_eq!(cumulative["earnedCredits"], 5.0);
    assert_eq!(cumulative["gpa10"], 7.56);
    assert_eq!(cumulative["gpa4"], 3.2);
    assert_eq!(cumulative["courses"], 2);
    assert_eq!(cumulative["inProgress"], 1);
    assert_eq!(summary["letterCounts"], json!({ "A": 1, "C": 1 }));
    assert_eq!(summary["semesters"][0]["semester"], "2025A");
    assert_eq!(summary["semesters"][1]["inProgress"], 1);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "grades.list",
        json!({ "semester": "2025A" }),
    );
    assert_eq!(listed["grades"].as_array().map(|a| a.len()), Some(2));
    let _ = std::fs::remove_dir_all(library);
}

fn column_titles(board: &Value, status: &str) -> Vec<String> {
    board["columns"][status]
        .as_array()
        .expect("column")
        .iter()
        .filter_map(|t| t["title"].as_str().map(str::to_string))
        .collect()
}

#[test]
fn tasks_move_between_columns_and_stay_densely_ordered() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let library = open_library(&mut stdin, &mut reader, "studyd-tasks");

    let mut ids = Vec::new();
    for (i, title) in ["read ch1", "exercises", "flashcards"].iter().enumerate() {
        let task = request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "tasks.create",
            json!({ "title": title, "dueDate": "2025-09-20" }),
        );
        assert_eq!(task["sortOrder"], i as i64);
        ids.push(str_field(&task, "id"));
    }

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "tasks.move",
        json!({ "taskId": ids[2].clone(), "status": "todo", "index": 0 }),
    );
    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "m2",
        "tasks.move",
        json!({ "taskId": ids[0].clone(), "status": "doing", "index": 99 }),
    );
    assert_eq!(moved["status"], "doing");
    assert_eq!(moved["sortOrder"], 0);

    let board = request_ok(&mut stdin, &mut reader, "l1", "tasks.list", json!({}));
    assert_eq!(column_titles(&board, "todo"), vec!["flashcards", "exercises"]);
    assert_eq!(column_titles(&board, "doing"), vec!["read ch1"]);
    assert_eq!(column_titles(&board, "done"), Vec::<String>::new());
    assert_eq!(board["columns"]["todo"][1]["sortOrder"], 1);

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "u1",
            "tasks.update",
            json!({ "taskId": ids[1].clone(), "patch": { "status": "done" } }),
        ),
        "bad_params"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "u2",
            "tasks.create",
            json!({ "title": "bad date", "dueDate": "2025-02-30" }),
        ),
        "bad_params"
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "d1",
        "tasks.delete",
        json!({ "taskId": ids[2].clone() }),
    );
    let board = request_ok(&mut stdin, &mut reader, "l2", "tasks.list", json!({}));
    assert_eq!(board["columns"]["todo"][0]["title"], "exercises");
    assert_eq!(board["columns"]["todo"][0]["sortOrder"], 0);
    let _ = std::fs::remove_dir_all(library);
}

#[test]
fn unowned_task_board_is_ordered_apart_from_signed_in_users() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let library = open_library(&mut stdin, &mut reader, "studyd-task-owners");

    let _ = request_ok(&mut stdin, &mut reader, "1", "session.signIn", json!({ "userId": "alice" }));
    for (id, title) in [("2", "read chapter"), ("3", "lab report")] {
        let _ = request_ok(&mut stdin, &mut reader, id, "tasks.create", json!({ "title": title }));
    }
    let _ = request_ok(&mut stdin, &mut reader, "4", "session.signOut", json!({}));

    let first = request_ok(&mut stdin, &mut reader, "5", "tasks.create", json!({ "title": "buy notebook" }));
    assert_eq!(first["sortOrder"], 0);
    let second = request_ok(&mut stdin, &mut reader, "6", "tasks.create", json!({ "title": "print slides" }));
    assert_eq!(second["sortOrder"], 1);

    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "tasks.move",
        json!({ "taskId": str_field(&second, "id"), "status": "todo", "index": 0 }),
    );
    assert_eq!(moved["sortOrder"], 0);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "tasks.delete",
        json!({ "taskId": str_field(&second, "id") }),
    );
    let board = request_ok(&mut stdin, &mut reader, "9", "tasks.list", json!({}));
    let unowned: Vec<i64> = board["columns"]["todo"]
        .as_array()
        .expect("todo")
        .iter()
        .filter(|t| t["userId"].is_null())
        .filter_map(|t| t["sortOrder"].as_i64())
        .collect();
    assert_eq!(unowned, vec![0]);

    let _ = request_ok(&mut stdin, &mut reader, "10", "session.signIn", json!({ "userId": "alice" }));
    let board = request_ok(&mut stdin, &mut reader, "11", "tasks.list", json!({}));
    assert_eq!(column_titles(&board, "todo"), vec!["read chapter", "lab report"]);
    assert_eq!(board["columns"]["todo"][0]["sortOrder"], 0);
    assert_eq!(board["columns"]["todo"][1]["sortOrder"], 1);
    let _ = std::fs::remove_dir_all(library);
}
