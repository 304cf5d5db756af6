mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, str_field, temp_dir};

#[test]
fn workspace_roles_gate_subjects_and_membership() {
    let library = temp_dir("studyd-workspaces");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "library.open",
        json!({ "path": library.to_string_lossy() }),
    );

    assert_eq!(
        request_err(&mut stdin, &mut reader, "2", "workspaces.list", json!({})),
        "unauthorized"
    );

    let _ = request_ok(&mut stdin, &mut reader, "3", "session.signIn", json!({ "userId": "owner" }));
    let ws = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspaces.create",
        json!({ "name": "Study group" }),
    );
    let ws_id = str_field(&ws, "id");
    assert_eq!(ws["owner"], "owner");

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "workspaces.members.add",
        json!({ "workspaceId": ws_id.clone(), "userId": "ed", "memberRole": "editor" }),
    );
    assert_eq!(added["memberRole"], "editor");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "workspaces.members.add",
        json!({ "workspaceId": ws_id.clone(), "userId": "vi", "memberRole": "viewer" }),
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "7",
            "workspaces.members.add",
            json!({ "workspaceId": ws_id.clone(), "userId": "owner", "memberRole": "viewer" }),
        ),
        "bad_params"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "8",
            "workspaces.members.remove",
            json!({ "workspaceId": ws_id.clone(), "userId": "owner" }),
        ),
        "bad_params"
    );

    let members = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "workspaces.members.list",
        json!({ "workspaceId": ws_id.clone() }),
    );
    let roles: Vec<&str> = members["members"]
        .as_array()
        .expect("members")
        .iter()
        .filter_map(|m| m["memberRole"].as_str())
        .collect();
    assert_eq!(roles, vec!["owner", "editor", "viewer"]);

    // Editors may add subjects to the workspace.
    let _ = request_ok(&mut stdin, &mut reader, "10", "session.signIn", json!({ "userId": "ed" }));
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "subjects.create",
        json!({ "name": "Shared physics", "workspaceId": ws_id.clone() }),
    );
    let subject_id = str_field(&subject, "id");
    let listed = request_ok(&mut stdin, &mut reader, "12", "workspaces.list", json!({}));
    assert_eq!(listed["workspaces"].as_array().map(|a| a.len()), Some(1));

    // Viewers can read but not write.
    let _ = request_ok(&mut stdin, &mut reader, "13", "session.signIn", json!({ "userId": "vi" }));
    let shared = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "subjects.list",
        json!({ "workspaceId": ws_id.clone() }),
    );
    assert_eq!(shared["subjects"][0]["id"], subject_id.as_str());
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "15",
            "subjects.create",
            json!({ "name": "Nope", "workspaceId": ws_id.clone() }),
        ),
        "forbidden"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "16",
            "subjects.update",
            json!({ "subjectId": subject_id.clone(), "patch": { "name": "Renamed" } }),
        ),
        "forbidden"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "17",
            "workspaces.update",
            json!({ "workspaceId": ws_id.clone(), "patch": { "name": "Mine now" } }),
        ),
        "forbidden"
    );

    // Outsiders see nothing.
    let _ = request_ok(&mut stdin, &mut reader, "18", "session.signIn", json!({ "userId": "stranger" }));
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "19",
            "subjects.list",
            json!({ "workspaceId": ws_id.clone() }),
        ),
        "forbidden"
    );

    // Deleting the workspace detaches its subjects.
    let _ = request_ok(&mut stdin, &mut reader, "20", "session.signIn", json!({ "userId": "owner" }));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "21",
        "workspaces.delete",
        json!({ "workspaceId": ws_id }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "22", "session.signOut", json!({}));
    let all = request_ok(&mut stdin, &mut reader, "23", "subjects.list", json!({}));
    assert_eq!(all["subjects"][0]["workspaceId"], serde_json::Value::Null);
    let _ = std::fs::remove_dir_all(library);
}

#[test]
fn owner_role_member_cannot_take_over_workspace() {
    let library = temp_dir("studyd-workspaces-coowner");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "library.open",
        json!({ "path": library.to_string_lossy() }),
    );

    let _ = request_ok(&mut stdin, &mut reader, "2", "session.signIn", json!({ "userId": "alice" }));
    let ws = request_ok(&mut stdin, &mut reader, "3", "workspaces.create", json!({ "name": "Thesis" }));
    let ws_id = str_field(&ws, "id");
    for (id, user, role) in [("4", "bob", "owner"), ("5", "carol", "viewer")] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "workspaces.members.add",
            json!({ "workspaceId": ws_id.clone(), "userId": user, "memberRole": role }),
        );
    }

    // bob holds the owner role as a member; content edits are allowed.
    let _ = request_ok(&mut stdin, &mut reader, "6", "session.signIn", json!({ "userId": "bob" }));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "subjects.create",
        json!({ "name": "Chapter 1", "workspaceId": ws_id.clone() }),
    );

    let owner_only = [
        ("8", "workspaces.delete", json!({ "workspaceId": ws_id.clone() })),
        (
            "9",
            "workspaces.update",
            json!({ "workspaceId": ws_id.clone(), "patch": { "name": "Bob's now" } }),
        ),
        (
            "10",
            "workspaces.members.remove",
            json!({ "workspaceId": ws_id.clone(), "userId": "carol" }),
        ),
        (
            "11",
            "workspaces.members.add",
            json!({ "workspaceId": ws_id.clone(), "userId": "mallory", "memberRole": "editor" }),
        ),
    ];
    for (id, method, params) in owner_only {
        assert_eq!(
            request_err(&mut stdin, &mut reader, id, method, params),
            "forbidden",
            "{} should be refused",
            method
        );
    }

    let _ = request_ok(&mut stdin, &mut reader, "12", "session.signIn", json!({ "userId": "alice" }));
    let ws = request_ok(&mut stdin, &mut reader, "13", "workspaces.list", json!({}));
    assert_eq!(ws["workspaces"][0]["name"], "Thesis");
    let members = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "workspaces.members.list",
        json!({ "workspaceId": ws_id.clone() }),
    );
    assert_eq!(members["members"].as_array().map(|a| a.len()), Some(3));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "workspaces.delete",
        json!({ "workspaceId": ws_id }),
    );
    let _ = std::fs::remove_dir_all(library);
}
