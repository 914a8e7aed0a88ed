use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "tutor.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            grade TEXT,
            guardian_contact TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_sort ON students(sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            subject TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS administrators(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            role TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(teacher_id, student_id, role)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_teacher ON assignments(teacher_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_student ON assignments(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lesson_slots(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            teacher_id TEXT,
            slot_type TEXT NOT NULL,
            date TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'scheduled',
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lesson_slots_student ON lesson_slots(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lesson_slots_date ON lesson_slots(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS absence_requests(
            id TEXT PRIMARY KEY,
            slot_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            reason TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            requested_at TEXT NOT NULL,
            decided_at TEXT,
            FOREIGN KEY(slot_id) REFERENCES lesson_slots(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_absence_requests_slot ON absence_requests(slot_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_absence_requests_student ON absence_requests(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS additional_lesson_requests(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            note TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            requested_at TEXT NOT NULL,
            decided_at TEXT,
            created_slot_id TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(created_slot_id) REFERENCES lesson_slots(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_additional_requests_student
         ON additional_lesson_requests(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS todo_lists(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            week_start TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'draft',
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, week_start)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_todo_lists_student ON todo_lists(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tasks(
            id TEXT PRIMARY KEY,
            todo_list_id TEXT NOT NULL,
            date TEXT NOT NULL,
            content TEXT NOT NULL,
            is_completed INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(todo_list_id) REFERENCES todo_lists(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_list ON tasks(todo_list_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_list_date ON tasks(todo_list_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_comments(
            id TEXT PRIMARY KEY,
            todo_list_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            date TEXT NOT NULL,
            body TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(todo_list_id) REFERENCES todo_lists(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            UNIQUE(todo_list_id, teacher_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teacher_comments_list ON teacher_comments(todo_list_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id TEXT PRIMARY KEY,
            recipient_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            body TEXT NOT NULL,
            is_read INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_recipient ON notifications(recipient_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS chat_messages(
            id TEXT PRIMARY KEY,
            sender_id TEXT NOT NULL,
            recipient_id TEXT NOT NULL,
            body TEXT NOT NULL,
            sent_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_chat_messages_sender ON chat_messages(sender_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_chat_messages_recipient ON chat_messages(recipient_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    // Existing workspaces may predate some columns. Add if needed.
    ensure_students_guardian_contact(&conn)?;
    ensure_lesson_slots_updated_at(&conn)?;
    ensure_additional_requests_created_slot(&conn)?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, &text),
    )?;
    Ok(())
}

fn ensure_students_guardian_contact(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "guardian_contact")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN guardian_contact TEXT", [])?;
    Ok(())
}

fn ensure_lesson_slots_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "lesson_slots", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE lesson_slots ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn ensure_additional_requests_created_slot(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "additional_lesson_requests", "created_slot_id")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE additional_lesson_requests ADD COLUMN created_slot_id TEXT",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
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
