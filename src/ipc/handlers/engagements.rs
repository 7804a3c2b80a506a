use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{
    optional_behaviour, optional_bool, optional_str, required_day, required_session, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::model::EngagementPatch;
use crate::store;
use rusqlite::Connection;
use serde_json::json;

fn parse_patch(params: &serde_json::Value) -> Result<EngagementPatch, HandlerErr> {
    Ok(EngagementPatch {
        attendance: optional_bool(params, "attendance")?,
        behaviour: optional_behaviour(params, "behaviour")?,
        comment: optional_str(params, "comment"),
        submitted: optional_bool(params, "submitted")?,
    })
}

/// Identity resolution for a (class, student, session, day) tuple: the
/// record if one exists, `found: false` otherwise. Never creates.
fn engagements_resolve(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let student_id = required_str(params, "studentId")?;
    let session = required_session(params, "session")?;
    let day = required_day(params, "day")?;

    match store::resolve(conn, &class_id, &student_id, session, day)? {
        Some(rec) => Ok(json!({ "found": true, "engagement": rec.to_wire() })),
        None => Ok(json!({ "found": false })),
    }
}

/// Find-or-create in one conditional statement: inserts with defaults when
/// the composite key is absent, otherwise applies the provided fields.
/// Calling twice with the same key can only ever touch one record.
fn engagements_upsert(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let student_id = required_str(params, "studentId")?;
    let session = required_session(params, "session")?;
    let day = required_day(params, "day")?;
    let patch = parse_patch(params)?;

    let (rec, created) = store::upsert(conn, &class_id, &student_id, session, day, &patch)?;
    Ok(json!({ "engagement": rec.to_wire(), "created": created }))
}

fn engagements_list_by_class_day(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let day = required_day(params, "day")?;

    if !store::class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }

    let records = store::query_by_class_day(conn, &class_id, day)?;
    let wire: Vec<serde_json::Value> = records.iter().map(|r| r.to_wire()).collect();
    Ok(json!({ "engagements": wire }))
}

fn engagements_list_by_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    if !store::student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }
    let records = store::query_by_student(conn, &student_id)?;
    let wire: Vec<serde_json::Value> = records.iter().map(|r| r.to_wire()).collect();
    Ok(json!({ "engagements": wire }))
}

/// The explicit seal. Unlike autosave this surfaces failures to the caller;
/// sealing a day is the one action the reviewer confirms by hand.
fn engagements_submit(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let student_id = required_str(params, "studentId")?;
    let day = required_day(params, "day")?;

    let affected = store::submit(conn, &class_id, &student_id, day)?;
    Ok(json!({ "submitted": affected }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "engagements.resolve" => Some(with_conn(state, req, engagements_resolve)),
        "engagements.upsert" => Some(with_conn(state, req, engagements_upsert)),
        "engagements.listByClassDay" => {
            Some(with_conn(state, req, engagements_list_by_class_day))
        }
        "engagements.listByStudent" => Some(with_conn(state, req, engagements_list_by_student)),
        "engagements.submit" => Some(with_conn(state, req, engagements_submit)),
        _ => None,
    }
}
