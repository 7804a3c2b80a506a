use crate::model::{Behaviour, Engagement, EngagementPatch, Session};
use chrono::NaiveDate;
use rusqlite::{named_params, Connection, OptionalExtension, Row};
use uuid::Uuid;

#[derive(Debug)]
pub enum StoreError {
    ClassNotFound,
    StudentNotFound,
    RecordNotFound,
    Db(rusqlite::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Db(e)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::ClassNotFound => write!(f, "class not found"),
            StoreError::StudentNotFound => write!(f, "student not found"),
            StoreError::RecordNotFound => write!(f, "engagement not found"),
            StoreError::Db(e) => write!(f, "{}", e),
        }
    }
}

fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

fn row_to_engagement(row: &Row<'_>) -> rusqlite::Result<Engagement> {
    let session_raw: String = row.get(3)?;
    let day_raw: String = row.get(4)?;
    let behaviour_raw: String = row.get(6)?;
    Ok(Engagement {
        id: row.get(0)?,
        class_id: row.get(1)?,
        student_id: row.get(2)?,
        // Stored values went through wire validation; fall back to defaults
        // rather than failing the whole row on a hand-edited database.
        session: Session::parse_wire(&session_raw).unwrap_or(Session::BreakfastClub),
        day: NaiveDate::parse_from_str(&day_raw, "%Y-%m-%d")
            .unwrap_or_else(|_| NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()),
        attendance: row.get::<_, i64>(5)? != 0,
        behaviour: Behaviour::parse_wire(&behaviour_raw).unwrap_or(Behaviour::Unmarked),
        comment: row.get(7)?,
        submitted: row.get::<_, i64>(8)? != 0,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

const ENGAGEMENT_COLS: &str = "id, class_id, student_id, session, day, attendance, behaviour,
        comment, submitted, created_at, updated_at";

pub fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, StoreError> {
    let found = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?;
    Ok(found.is_some())
}

pub fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, StoreError> {
    let found = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?;
    Ok(found.is_some())
}

pub fn student_in_class(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
) -> Result<bool, StoreError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM students WHERE class_id = ? AND id = ?",
            (class_id, student_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Identity resolution: the single lookup by the composite key.
///
/// Both the `engagements.resolve` endpoint and the marking cache's
/// id-priming path go through here; there is no second, client-local
/// lookup to race against.
pub fn resolve(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
    session: Session,
    day: NaiveDate,
) -> Result<Option<Engagement>, StoreError> {
    let sql = format!(
        "SELECT {} FROM engagements
         WHERE class_id = ? AND student_id = ? AND session = ? AND day = ?",
        ENGAGEMENT_COLS
    );
    let rec = conn
        .query_row(
            &sql,
            (class_id, student_id, session.as_wire(), day_key(day)),
            row_to_engagement,
        )
        .optional()?;
    Ok(rec)
}

/// Conditional upsert on the composite key, in one statement.
///
/// Inserts with defaults (attendance=false, behaviour=unmarked,
/// submitted=false) when the key is absent, otherwise applies only the
/// provided fields. `submitted` only ever moves 0 -> 1. Returns the stored
/// record and whether this call created it.
pub fn upsert(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
    session: Session,
    day: NaiveDate,
    patch: &EngagementPatch,
) -> Result<(Engagement, bool), StoreError> {
    if !class_exists(conn, class_id)? {
        return Err(StoreError::ClassNotFound);
    }
    if !student_in_class(conn, class_id, student_id)? {
        return Err(StoreError::StudentNotFound);
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO engagements(
            id, class_id, student_id, session, day,
            attendance, behaviour, comment, submitted, created_at, updated_at)
         VALUES(
            :id, :class, :student, :session, :day,
            COALESCE(:attendance, 0), COALESCE(:behaviour, 'unmarked'), NULLIF(:comment, ''),
            COALESCE(:submitted, 0),
            strftime('%Y-%m-%dT%H:%M:%SZ','now'), strftime('%Y-%m-%dT%H:%M:%SZ','now'))
         ON CONFLICT(class_id, student_id, session, day) DO UPDATE SET
            attendance = COALESCE(:attendance, attendance),
            behaviour = COALESCE(:behaviour, behaviour),
            comment = CASE WHEN :comment IS NULL THEN comment ELSE NULLIF(:comment, '') END,
            submitted = MAX(submitted, COALESCE(:submitted, 0)),
            updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')",
        named_params! {
            ":id": id,
            ":class": class_id,
            ":student": student_id,
            ":session": session.as_wire(),
            ":day": day_key(day),
            ":attendance": patch.attendance.map(|b| b as i64),
            ":behaviour": patch.behaviour.map(|b| b.as_wire()),
            ":comment": patch.comment.as_deref(),
            ":submitted": patch.submitted.map(|b| b as i64),
        },
    )?;

    let rec = resolve(conn, class_id, student_id, session, day)?
        .ok_or(StoreError::RecordNotFound)?;
    // The freshly generated id survives only on the insert arm.
    let created = rec.id == id;
    Ok((rec, created))
}

/// Partial update when the record id is already known (the cache's fast
/// path after its first persistence for a key).
pub fn patch_by_id(
    conn: &Connection,
    record_id: &str,
    patch: &EngagementPatch,
) -> Result<Engagement, StoreError> {
    let affected = conn.execute(
        "UPDATE engagements SET
            attendance = COALESCE(:attendance, attendance),
            behaviour = COALESCE(:behaviour, behaviour),
            comment = CASE WHEN :comment IS NULL THEN comment ELSE NULLIF(:comment, '') END,
            submitted = MAX(submitted, COALESCE(:submitted, 0)),
            updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = :id",
        named_params! {
            ":id": record_id,
            ":attendance": patch.attendance.map(|b| b as i64),
            ":behaviour": patch.behaviour.map(|b| b.as_wire()),
            ":comment": patch.comment.as_deref(),
            ":submitted": patch.submitted.map(|b| b as i64),
        },
    )?;
    if affected == 0 {
        return Err(StoreError::RecordNotFound);
    }
    let sql = format!("SELECT {} FROM engagements WHERE id = ?", ENGAGEMENT_COLS);
    let rec = conn
        .query_row(&sql, [record_id], row_to_engagement)
        .optional()?
        .ok_or(StoreError::RecordNotFound)?;
    Ok(rec)
}

pub fn query_by_class_day(
    conn: &Connection,
    class_id: &str,
    day: NaiveDate,
) -> Result<Vec<Engagement>, StoreError> {
    let sql = format!(
        "SELECT {} FROM engagements
         WHERE class_id = ? AND day = ?
         ORDER BY created_at DESC, rowid DESC",
        ENGAGEMENT_COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((class_id, day_key(day)), row_to_engagement)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every record for a class across all days, newest day first. Feeds the
/// unfiltered marked listing.
pub fn query_by_class(
    conn: &Connection,
    class_id: &str,
) -> Result<Vec<Engagement>, StoreError> {
    let sql = format!(
        "SELECT {} FROM engagements
         WHERE class_id = ?
         ORDER BY day DESC, created_at DESC, rowid DESC",
        ENGAGEMENT_COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([class_id], row_to_engagement)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn query_by_student(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<Engagement>, StoreError> {
    let sql = format!(
        "SELECT {} FROM engagements
         WHERE student_id = ?
         ORDER BY created_at DESC, rowid DESC",
        ENGAGEMENT_COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([student_id], row_to_engagement)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Seal every existing record for (class, student, day), whatever its
/// session. Missing session records are not created. Returns how many rows
/// were sealed (already-submitted rows count as matched).
pub fn submit(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
    day: NaiveDate,
) -> Result<usize, StoreError> {
    if !class_exists(conn, class_id)? {
        return Err(StoreError::ClassNotFound);
    }
    if !student_in_class(conn, class_id, student_id)? {
        return Err(StoreError::StudentNotFound);
    }
    let affected = conn.execute(
        "UPDATE engagements
         SET submitted = 1, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE class_id = ? AND student_id = ? AND day = ?",
        (class_id, student_id, day_key(day)),
    )?;
    Ok(affected)
}
