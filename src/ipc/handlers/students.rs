use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{optional_bool, optional_day, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

/// Roster listing for a class. With `day` given, only students whose
/// enrolment range covers that day are returned; open-ended ranges match
/// everything on their open side.
fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let day = optional_day(params, "day")?;

    if !store::class_exists(conn, class_id.as_str())? {
        return Err(HandlerErr::not_found("class not found"));
    }

    let mut stmt = conn.prepare(
        "SELECT id, last_name, first_name, active, sort_order, start_date, end_date
         FROM students
         WHERE class_id = ?
         ORDER BY sort_order",
    )?;
    let rows = stmt
        .query_map([&class_id], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok((
                r.get::<_, String>(0)?,
                format!("{}, {}", last, first),
                r.get::<_, i64>(3)? != 0,
                r.get::<_, i64>(4)?,
                r.get::<_, Option<String>>(5)?,
                r.get::<_, Option<String>>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let students: Vec<serde_json::Value> = rows
        .into_iter()
        .filter(|(_, _, _, _, start, end)| match day {
            None => true,
            Some(d) => {
                let key = d.format("%Y-%m-%d").to_string();
                let after_start = start.as_deref().map(|s| s <= key.as_str()).unwrap_or(true);
                let before_end = end.as_deref().map(|e| e >= key.as_str()).unwrap_or(true);
                after_start && before_end
            }
        })
        .map(|(id, display_name, active, sort_order, start, end)| {
            json!({
                "id": id,
                "displayName": display_name,
                "active": active,
                "sortOrder": sort_order,
                "startDate": start,
                "endDate": end
            })
        })
        .collect();

    Ok(json!({ "students": students }))
}

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let last_name = required_str(params, "lastName")?;
    let first_name = required_str(params, "firstName")?;
    let active = optional_bool(params, "active")?.unwrap_or(true);
    let start_date = optional_str(params, "startDate");
    let end_date = optional_str(params, "endDate");

    if !store::class_exists(conn, class_id.as_str())? {
        return Err(HandlerErr::not_found("class not found"));
    }
    if last_name.trim().is_empty() || first_name.trim().is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }

    let next_sort: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE class_id = ?",
        [&class_id],
        |r| r.get(0),
    )?;

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(
            id, class_id, last_name, first_name, active, sort_order,
            start_date, end_date, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &student_id,
            &class_id,
            last_name.trim(),
            first_name.trim(),
            active as i64,
            next_sort,
            &start_date,
            &end_date,
        ),
    )?;

    Ok(json!({ "studentId": student_id }))
}

fn students_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let student_id = required_str(params, "studentId")?;
    let patch = params
        .get("patch")
        .cloned()
        .unwrap_or_else(|| json!({}));

    if !store::student_in_class(conn, &class_id, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let mut set_parts: Vec<String> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(v) = patch.get("lastName").and_then(|v| v.as_str()) {
        set_parts.push("last_name = ?".into());
        values.push(v.trim().to_string().into());
    }
    if let Some(v) = patch.get("firstName").and_then(|v| v.as_str()) {
        set_parts.push("first_name = ?".into());
        values.push(v.trim().to_string().into());
    }
    if let Some(v) = patch.get("active").and_then(|v| v.as_bool()) {
        set_parts.push("active = ?".into());
        values.push((v as i64).into());
    }
    if let Some(v) = patch.get("startDate") {
        set_parts.push("start_date = ?".into());
        values.push(match v.as_str() {
            Some(s) => s.to_string().into(),
            None => rusqlite::types::Value::Null,
        });
    }
    if let Some(v) = patch.get("endDate") {
        set_parts.push("end_date = ?".into());
        values.push(match v.as_str() {
            Some(s) => s.to_string().into(),
            None => rusqlite::types::Value::Null,
        });
    }
    if set_parts.is_empty() {
        return Err(HandlerErr::bad_params("empty patch"));
    }
    set_parts.push("updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')".into());

    let sql = format!(
        "UPDATE students SET {} WHERE class_id = ? AND id = ?",
        set_parts.join(", ")
    );
    values.push(class_id.into());
    values.push(student_id.clone().into());
    conn.execute(&sql, rusqlite::params_from_iter(values))?;

    Ok(json!({ "studentId": student_id }))
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
        "students.list" => Some(with_conn(state, req, students_list)),
        "students.create" => Some(with_conn(state, req, students_create)),
        "students.update" => Some(with_conn(state, req, students_update)),
        _ => None,
    }
}
