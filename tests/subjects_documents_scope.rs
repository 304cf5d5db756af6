mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, str_field, temp_dir};

#[test]
fn signed_in_users_only_see_their_own_subjects_and_documents() {
    let library = temp_dir("studyd-subjects-scope");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "library.open",
        json!({ "path": library.to_string_lossy() }),
    );

    let profile = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "session.signIn",
        json!({ "userId": "alice", "fullName": "Alice Nguyen" }),
    );
    assert_eq!(profile["role"], "student");
    assert_eq!(profile["fullName"], "Alice Nguyen");

    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "subjects.create",
        json!({ "name": "Calculus", "semester": "2025A" }),
    );
    let subject_id = str_field(&subject, "id");
    assert_eq!(subject["userId"], "alice");

    let doc = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "documents.create",
        json!({
            "subjectId": subject_id.clone(),
            "name": "Limits cheat sheet",
            "tags": [" exam ", "exam", "week1"],
            "link": "https://example.edu/limits"
        }),
    );
    let doc_id = str_field(&doc, "id");
    assert_eq!(doc["tags"], json!(["exam", "week1"]));
    assert_eq!(doc["favorite"], false);

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "5",
            "documents.create",
            json!({ "subjectId": subject_id.clone(), "name": "Bad", "link": "ftp://x" }),
        ),
        "bad_params"
    );

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "documents.update",
        json!({ "documentId": doc_id.clone(), "patch": { "favorite": true, "tags": ["final"] } }),
    );
    assert_eq!(updated["favorite"], true);
    assert_eq!(updated["tags"], json!(["final"]));

    let favs = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "documents.list",
        json!({ "favoriteOnly": true, "tag": "final" }),
    );
    assert_eq!(favs["documents"].as_array().map(|a| a.len()), Some(1));

    // Another user sees none of it and cannot touch it.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "session.signIn",
        json!({ "userId": "bob" }),
    );
    let subjects = request_ok(&mut stdin, &mut reader, "9", "subjects.list", json!({}));
    assert_eq!(subjects["subjects"], json!([]));
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "10",
            "documents.get",
            json!({ "documentId": doc_id.clone() }),
        ),
        "forbidden"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "11",
            "subjects.delete",
            json!({ "subjectId": subject_id.clone() }),
        ),
        "forbidden"
    );

    // Anonymous callers see every row.
    let _ = request_ok(&mut stdin, &mut reader, "12", "session.signOut", json!({}));
    let all = request_ok(&mut stdin, &mut reader, "13", "documents.list", json!({}));
    assert_eq!(all["documents"].as_array().map(|a| a.len()), Some(1));

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "subjects.delete",
        json!({ "subjectId": subject_id }),
    );
    assert_eq!(deleted["documentsDeleted"], 1);
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "15",
            "documents.get",
            json!({ "documentId": doc_id }),
        ),
        "not_found"
    );
    let _ = std::fs::remove_dir_all(library);
}

#[test]
fn profile_requires_sign_in_and_update_ignores_unknown_keys() {
    let library = temp_dir("studyd-profile");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "library.open",
        json!({ "path": library.to_string_lossy() }),
    );
    assert_eq!(
        request_err(&mut stdin, &mut reader, "2", "profiles.me.get", json!({})),
        "unauthorized"
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "session.signIn",
        json!({ "userId": "carol" }),
    );
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "profiles.me.update",
        json!({ "patch": { "fullName": "Carol", "role": "admin" } }),
    );
    assert_eq!(updated["fullName"], "Carol");
    assert_eq!(updated["role"], "student");
    let session = request_ok(&mut stdin, &mut reader, "5", "session.get", json!({}));
    assert_eq!(session["userId"], "carol");
    let _ = std::fs::remove_dir_all(library);
}
