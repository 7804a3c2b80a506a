use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("daybook.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            active INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            start_date TEXT,
            end_date TEXT,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;

    // Existing workspaces may predate the enrolment range columns.
    ensure_students_enrolment_range(&conn)?;

    // One record per (class, student, session, day). The composite key is
    // enforced at the storage layer so the conditional upsert cannot produce
    // duplicate logical keys, concurrent writers included.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS engagements(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            session TEXT NOT NULL,
            day TEXT NOT NULL,
            attendance INTEGER NOT NULL DEFAULT 0,
            behaviour TEXT NOT NULL DEFAULT 'unmarked',
            comment TEXT,
            submitted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(class_id, student_id, session, day),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_engagements_class_day ON engagements(class_id, day)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_engagements_student ON engagements(student_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_students_enrolment_range(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "students", "start_date")? {
        conn.execute("ALTER TABLE students ADD COLUMN start_date TEXT", [])?;
    }
    if !table_has_column(conn, "students", "end_date")? {
        conn.execute("ALTER TABLE students ADD COLUMN end_date TEXT", [])?;
    }
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
