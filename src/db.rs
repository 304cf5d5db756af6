use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};

pub const DB_FILE: &str = "studyd.sqlite3";
pub const FILES_DIR: &str = "files";

pub fn db_path(library: &Path) -> PathBuf {
    library.join(DB_FILE)
}

pub fn files_root(library: &Path) -> PathBuf {
    library.join(FILES_DIR)
}

pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn open_db(library: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(library)
        .with_context(|| format!("failed to create library {}", library.to_string_lossy()))?;
    let conn = Connection::open(db_path(library))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profiles(
            id TEXT PRIMARY KEY,
            full_name TEXT,
            avatar_url TEXT,
            role TEXT NOT NULL DEFAULT 'student',
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS workspaces(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            owner TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS workspace_members(
            workspace_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            member_role TEXT NOT NULL,
            PRIMARY KEY(workspace_id, user_id),
            FOREIGN KEY(workspace_id) REFERENCES workspaces(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_workspace_members_user ON workspace_members(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            describes TEXT,
            semester TEXT,
            user_id TEXT,
            workspace_id TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(workspace_id) REFERENCES workspaces(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_user ON subjects(user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_workspace ON subjects(workspace_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS documents(
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            name TEXT NOT NULL,
            describes TEXT,
            author TEXT,
            link TEXT,
            favorite INTEGER NOT NULL DEFAULT 0,
            tags TEXT NOT NULL DEFAULT '[]',
            file_path TEXT,
            file_url TEXT,
            user_id TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    ensure_documents_file_columns(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_documents_subject ON documents(subject_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_documents_user ON documents(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedules(
            id TEXT PRIMARY KEY,
            subject_id TEXT,
            title TEXT,
            starts_at TEXT NOT NULL,
            ends_at TEXT NOT NULL,
            location TEXT,
            note TEXT,
            recurrence_rule TEXT,
            user_id TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedules_user_start ON schedules(user_id, starts_at)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedules_subject ON schedules(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            subject_id TEXT,
            course_name TEXT NOT NULL,
            semester TEXT,
            credits REAL NOT NULL,
            score REAL,
            user_id TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_user ON grades(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tasks(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            due_date TEXT,
            subject_id TEXT,
            user_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_status_sort ON tasks(status, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS annotations(
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            page INTEGER NOT NULL,
            kind TEXT NOT NULL,
            color TEXT NOT NULL,
            rects TEXT NOT NULL,
            note TEXT,
            quote TEXT,
            user_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(document_id) REFERENCES documents(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_annotations_document_page ON annotations(document_id, page)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS rag_chunks(
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            subject_id TEXT,
            user_id TEXT,
            file_name TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY(document_id) REFERENCES documents(id),
            UNIQUE(document_id, chunk_index)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_rag_chunks_subject ON rag_chunks(subject_id)",
        [],
    )?;

    Ok(conn)
}

// Libraries created before uploads carried checksums lack these columns.
fn ensure_documents_file_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "documents", "file_sha256")? {
        conn.execute("ALTER TABLE documents ADD COLUMN file_sha256 TEXT", [])?;
    }
    if !table_has_column(conn, "documents", "file_size")? {
        conn.execute("ALTER TABLE documents ADD COLUMN file_size INTEGER", [])?;
    }
    Ok(())
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("setting {} is not valid JSON", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
