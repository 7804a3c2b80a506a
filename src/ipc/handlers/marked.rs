use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{optional_day, required_day, required_str};
use crate::ipc::types::{AppState, Request};
use crate::marked;
use crate::model::Engagement;
use crate::store;
use rusqlite::Connection;
use serde_json::json;

/// The audit listing: only groups the visibility policy marks as complete
/// or sealed. With `day` omitted, every marked day of the class is listed.
fn marked_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let day = optional_day(params, "day")?;

    if !store::class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }

    let records: Vec<Engagement> = match day {
        Some(d) => store::query_by_class_day(conn, &class_id, d)?,
        None => store::query_by_class(conn, &class_id)?,
    };

    let rows: Vec<serde_json::Value> = marked::visible_summaries(&records)
        .iter()
        .map(|r| r.to_wire())
        .collect();
    Ok(json!({ "rows": rows }))
}

/// Fixed expansion of one group: exactly one sub-row per calendar session,
/// placeholders for sessions nobody has touched yet.
fn marked_expand(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let student_id = required_str(params, "studentId")?;
    let day = required_day(params, "day")?;

    if !store::student_in_class(conn, &class_id, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let records: Vec<Engagement> = store::query_by_class_day(conn, &class_id, day)?
        .into_iter()
        .filter(|r| r.student_id == student_id)
        .collect();

    // Even a day with no records expands to the full set of placeholders.
    let group = marked::group_records(&records)
        .into_iter()
        .next()
        .unwrap_or_else(|| marked::Group {
            class_id: class_id.clone(),
            student_id: student_id.clone(),
            day,
            records: Default::default(),
        });
    let sessions: Vec<serde_json::Value> = group.expand().iter().map(|s| s.to_wire()).collect();
    Ok(json!({
        "student": student_id,
        "engagementDate": day.format("%Y-%m-%d").to_string(),
        "sessions": sessions
    }))
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
        "marked.list" => Some(with_conn(state, req, marked_list)),
        "marked.expand" => Some(with_conn(state, req, marked_expand)),
        _ => None,
    }
}
