use crate::cache::{CellEdit, MarkingCache, RosterEntry, WriteRequest};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{optional_behaviour, optional_bool, optional_str, required_day, required_session, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::EngagementPatch;
use crate::store;
use rusqlite::Connection;
use serde_json::json;
use std::time::Instant;

/// Run every pending write whose debounce deadline has passed. Called from
/// the router before each request; autosave failures are logged and
/// swallowed, and the optimistic cache state is not rolled back.
pub fn pump_autosave(state: &mut AppState) {
    let (Some(conn), Some(cache)) = (state.db.as_ref(), state.marking.as_mut()) else {
        return;
    };
    let writes = cache.flush_due(Instant::now());
    execute_writes(conn, cache, writes);
}

fn execute_writes(conn: &Connection, cache: &mut MarkingCache, writes: Vec<WriteRequest>) -> usize {
    let class_id = cache.class_id.clone();
    let day = cache.day;
    let count = writes.len();
    for w in writes {
        let patch = EngagementPatch {
            attendance: Some(w.snapshot.attendance),
            behaviour: Some(w.snapshot.behaviour),
            // Empty clears: the snapshot is the whole cell, so a blank
            // comment means the user removed it.
            comment: Some(w.snapshot.comment.clone().unwrap_or_default()),
            submitted: None,
        };
        let persisted = match &w.record_id {
            Some(id) => store::patch_by_id(conn, id, &patch).map(|r| r.id),
            None => store::upsert(conn, &class_id, &w.student_id, w.session, day, &patch)
                .map(|(r, _)| r.id),
        };
        match persisted {
            Ok(id) => cache.note_persisted(&w.student_id, w.session, &id),
            Err(e) => tracing::warn!(
                student = %w.student_id,
                session = w.session.as_wire(),
                error = %e,
                "autosave write failed; keeping optimistic state"
            ),
        }
    }
    count
}

fn load_roster(conn: &Connection, class_id: &str, day: chrono::NaiveDate) -> Result<Vec<RosterEntry>, HandlerErr> {
    let day_key = day.format("%Y-%m-%d").to_string();
    let mut stmt = conn.prepare(
        "SELECT id, last_name, first_name, sort_order, active
         FROM students
         WHERE class_id = ?
           AND (start_date IS NULL OR start_date <= ?)
           AND (end_date IS NULL OR end_date >= ?)
         ORDER BY sort_order",
    )?;
    let roster = stmt
        .query_map((class_id, &day_key, &day_key), |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(RosterEntry {
                id: r.get(0)?,
                display_name: format!("{}, {}", last, first),
                sort_order: r.get(3)?,
                active: r.get::<_, i64>(4)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(roster)
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match required_str(&req.params, "classId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let day = match required_day(&req.params, "day") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match store::class_exists(conn, &class_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return HandlerErr::from(e).response(&req.id),
    }

    // A screen left open keeps its debounced edits; settle them before the
    // cache is replaced.
    if let Some(prev) = state.marking.as_mut() {
        let writes = prev.flush_all();
        execute_writes(conn, prev, writes);
    }

    let roster = match load_roster(conn, &class_id, day) {
        Ok(r) => r,
        Err(e) => return e.response(&req.id),
    };
    let records = match store::query_by_class_day(conn, &class_id, day) {
        Ok(r) => r,
        Err(e) => return HandlerErr::from(e).response(&req.id),
    };

    let mut cache = MarkingCache::new(class_id.clone(), day, roster);
    cache.populate(&records, Instant::now());
    let rows = cache.row_view();
    state.marking = Some(cache);

    ok(
        &req.id,
        json!({
            "classId": class_id,
            "engagementDate": day.format("%Y-%m-%d").to_string(),
            "rows": rows
        }),
    )
}

fn with_cache(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&mut MarkingCache, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(cache) = state.marking.as_mut() else {
        return err(&req.id, "no_marking_open", "open a marking screen first", None);
    };
    match f(cache, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_set_cell(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_cache(state, req, |cache, params| {
        let student_id = required_str(params, "studentId")?;
        let session = required_session(params, "session")?;
        if !cache.has_student(&student_id) {
            return Err(HandlerErr::not_found("student not found"));
        }
        let edit = CellEdit {
            attendance: optional_bool(params, "attendance")?,
            behaviour: optional_behaviour(params, "behaviour")?,
            comment: optional_str(params, "comment"),
        };
        cache.set_cell(&student_id, session, &edit, Instant::now());
        Ok(json!({ "pending": cache.pending_count() }))
    })
}

fn handle_select_session(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_cache(state, req, |cache, params| {
        let student_id = required_str(params, "studentId")?;
        let session = required_session(params, "session")?;
        if !cache.has_student(&student_id) {
            return Err(HandlerErr::not_found("student not found"));
        }
        cache.select_session(&student_id, session);
        Ok(json!({ "selectedSession": session.as_wire() }))
    })
}

fn handle_rows(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_cache(state, req, |cache, _| Ok(json!({ "rows": cache.row_view() })))
}

fn handle_expand(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_cache(state, req, |cache, params| {
        let student_id = required_str(params, "studentId")?;
        if !cache.has_student(&student_id) {
            return Err(HandlerErr::not_found("student not found"));
        }
        Ok(json!({
            "studentId": student_id,
            "sessions": cache.expanded_view(&student_id)
        }))
    })
}

fn handle_audit(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_cache(state, req, |cache, _| Ok(json!({ "rows": cache.audit_view() })))
}

fn handle_flush(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(cache) = state.marking.as_mut() else {
        return err(&req.id, "no_marking_open", "open a marking screen first", None);
    };
    let writes = cache.flush_all();
    let flushed = execute_writes(conn, cache, writes);
    ok(&req.id, json!({ "flushed": flushed }))
}

/// Seal one student's open day. Pending edits are settled first so the seal
/// covers what the screen shows; unlike autosave, a failure here comes back
/// as an error response.
fn handle_submit_day(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(cache) = state.marking.as_mut() else {
        return err(&req.id, "no_marking_open", "open a marking screen first", None);
    };

    let student_id = match required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if !cache.has_student(&student_id) {
        return err(&req.id, "not_found", "student not found", None);
    }

    let writes = cache.flush_all();
    execute_writes(conn, cache, writes);

    let class_id = cache.class_id.clone();
    let day = cache.day;
    match store::submit(conn, &class_id, &student_id, day) {
        Ok(affected) => {
            cache.mark_submitted(&student_id);
            ok(&req.id, json!({ "submitted": affected }))
        }
        Err(e) => {
            tracing::error!(student = %student_id, error = %e, "submit failed");
            HandlerErr::from(e).response(&req.id)
        }
    }
}

fn handle_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(cache) = state.marking.as_mut() else {
        return err(&req.id, "no_marking_open", "open a marking screen first", None);
    };
    let writes = cache.flush_all();
    let flushed = execute_writes(conn, cache, writes);
    state.marking = None;
    ok(&req.id, json!({ "flushed": flushed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marking.open" => Some(handle_open(state, req)),
        "marking.setCell" => Some(handle_set_cell(state, req)),
        "marking.selectSession" => Some(handle_select_session(state, req)),
        "marking.rows" => Some(handle_rows(state, req)),
        "marking.expand" => Some(handle_expand(state, req)),
        "marking.audit" => Some(handle_audit(state, req)),
        "marking.flush" => Some(handle_flush(state, req)),
        "marking.submitDay" => Some(handle_submit_day(state, req)),
        "marking.close" => Some(handle_close(state, req)),
        _ => None,
    }
}
