use crate::model::{Behaviour, Engagement, Session, SESSION_CALENDAR, SESSION_COUNT};
use chrono::NaiveDate;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Attendance/behaviour edits settle quickly; free-text comments get a
/// longer window so autosave does not fire mid-sentence.
pub const MARKS_DEBOUNCE: Duration = Duration::from_millis(500);
pub const COMMENT_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Grace period after bulk-loading fetched records. Mutations inside the
/// window populate memory only, so freshly fetched data is not re-saved.
/// The duration is a preserved heuristic, not load-bearing.
pub const POPULATE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldGroup {
    Marks,
    Comment,
}

impl FieldGroup {
    fn debounce(self) -> Duration {
        match self {
            FieldGroup::Marks => MARKS_DEBOUNCE,
            FieldGroup::Comment => COMMENT_DEBOUNCE,
        }
    }
}

/// One canonical cell: the in-memory truth for (student, session).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cell {
    pub attendance: bool,
    pub behaviour: Behaviour,
    pub comment: Option<String>,
    pub submitted: bool,
    /// Known once the record has been fetched or persisted; later writes to
    /// this key skip identity resolution.
    pub record_id: Option<String>,
}

/// Full field snapshot taken when a write is scheduled. The drained write
/// carries this, not a diff, so the last settled call wins as a whole.
#[derive(Debug, Clone, PartialEq)]
pub struct CellSnapshot {
    pub attendance: bool,
    pub behaviour: Behaviour,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub student_id: String,
    pub session: Session,
    pub record_id: Option<String>,
    pub snapshot: CellSnapshot,
}

#[derive(Debug, Clone)]
struct PendingWrite {
    due: Instant,
    record_id: Option<String>,
    snapshot: CellSnapshot,
}

/// Partial edit coming in from the UI.
#[derive(Debug, Clone, Default)]
pub struct CellEdit {
    pub attendance: Option<bool>,
    pub behaviour: Option<Behaviour>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub id: String,
    pub display_name: String,
    pub sort_order: i64,
    pub active: bool,
}

/// Canonical per-student-per-session state for one open (class, day)
/// marking screen, plus the debounced persistence queue.
///
/// All writes go through the canonical map; the row, expanded and audit
/// views are derived projections and are never written directly.
pub struct MarkingCache {
    pub class_id: String,
    pub day: NaiveDate,
    roster: Vec<RosterEntry>,
    canonical: BTreeMap<String, BTreeMap<Session, Cell>>,
    selected: HashMap<String, Session>,
    pending: HashMap<(String, Session, FieldGroup), PendingWrite>,
    suppress_until: Option<Instant>,
}

impl MarkingCache {
    pub fn new(class_id: String, day: NaiveDate, roster: Vec<RosterEntry>) -> MarkingCache {
        MarkingCache {
            class_id,
            day,
            roster,
            canonical: BTreeMap::new(),
            selected: HashMap::new(),
            pending: HashMap::new(),
            suppress_until: None,
        }
    }

    pub fn has_student(&self, student_id: &str) -> bool {
        self.roster.iter().any(|s| s.id == student_id)
    }

    /// Bulk-load fetched records into the canonical map and open the
    /// autosave suppression window.
    pub fn populate(&mut self, records: &[Engagement], now: Instant) {
        for rec in records {
            let cell = Cell {
                attendance: rec.attendance,
                behaviour: rec.behaviour,
                comment: rec.comment.clone(),
                submitted: rec.submitted,
                record_id: Some(rec.id.clone()),
            };
            self.canonical
                .entry(rec.student_id.clone())
                .or_default()
                .insert(rec.session, cell);
        }
        self.suppress_until = Some(now + POPULATE_GRACE);
    }

    pub fn selected_session(&self, student_id: &str) -> Session {
        self.selected
            .get(student_id)
            .copied()
            .unwrap_or(SESSION_CALENDAR[0])
    }

    pub fn select_session(&mut self, student_id: &str, session: Session) {
        self.selected.insert(student_id.to_string(), session);
    }

    /// Apply an edit to canonical[student][session] and schedule the
    /// matching debounced writes. Scheduling is cancel-and-reschedule per
    /// (student, session, field-group); a second edit inside the window
    /// replaces the pending snapshot and pushes the deadline out.
    pub fn set_cell(&mut self, student_id: &str, session: Session, edit: &CellEdit, now: Instant) {
        let suppressed = self.suppressed(now);
        let cell = self
            .canonical
            .entry(student_id.to_string())
            .or_default()
            .entry(session)
            .or_default();

        let mut marks_touched = false;
        if let Some(a) = edit.attendance {
            cell.attendance = a;
            marks_touched = true;
        }
        if let Some(b) = edit.behaviour {
            cell.behaviour = b;
            marks_touched = true;
        }
        let comment_touched = if let Some(c) = &edit.comment {
            cell.comment = if c.is_empty() { None } else { Some(c.clone()) };
            true
        } else {
            false
        };

        if suppressed {
            return;
        }

        let snapshot = CellSnapshot {
            attendance: cell.attendance,
            behaviour: cell.behaviour,
            comment: cell.comment.clone(),
        };
        let record_id = cell.record_id.clone();
        if marks_touched {
            self.schedule(student_id, session, FieldGroup::Marks, &snapshot, &record_id, now);
        }
        if comment_touched {
            self.schedule(student_id, session, FieldGroup::Comment, &snapshot, &record_id, now);
        }
    }

    fn suppressed(&self, now: Instant) -> bool {
        matches!(self.suppress_until, Some(until) if now < until)
    }

    fn schedule(
        &mut self,
        student_id: &str,
        session: Session,
        group: FieldGroup,
        snapshot: &CellSnapshot,
        record_id: &Option<String>,
        now: Instant,
    ) {
        self.pending.insert(
            (student_id.to_string(), session, group),
            PendingWrite {
                due: now + group.debounce(),
                record_id: record_id.clone(),
                snapshot: snapshot.clone(),
            },
        );
    }

    /// Record the id handed back by the store after a write settles, so the
    /// next write to this key goes straight to patch-by-id.
    pub fn note_persisted(&mut self, student_id: &str, session: Session, record_id: &str) {
        if let Some(cell) = self
            .canonical
            .get_mut(student_id)
            .and_then(|m| m.get_mut(&session))
        {
            cell.record_id = Some(record_id.to_string());
        }
        // Pending writes for the same key pick the id up too, sparing the
        // executor a redundant resolve.
        for ((sid, sess, _), pw) in self.pending.iter_mut() {
            if sid == student_id && *sess == session && pw.record_id.is_none() {
                pw.record_id = Some(record_id.to_string());
            }
        }
    }

    pub fn mark_submitted(&mut self, student_id: &str) {
        if let Some(sessions) = self.canonical.get_mut(student_id) {
            for cell in sessions.values_mut() {
                cell.submitted = true;
            }
        }
    }

    /// Drain every pending write whose deadline has passed.
    pub fn flush_due(&mut self, now: Instant) -> Vec<WriteRequest> {
        let due_keys: Vec<_> = self
            .pending
            .iter()
            .filter(|(_, pw)| pw.due <= now)
            .map(|(k, _)| k.clone())
            .collect();
        self.drain(due_keys)
    }

    /// Drain everything regardless of deadline (explicit flush / close).
    pub fn flush_all(&mut self) -> Vec<WriteRequest> {
        let keys: Vec<_> = self.pending.keys().cloned().collect();
        self.drain(keys)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn drain(&mut self, mut keys: Vec<(String, Session, FieldGroup)>) -> Vec<WriteRequest> {
        // Deterministic order: roster position, then calendar order.
        keys.sort_by_key(|(sid, sess, group)| {
            (
                self.roster
                    .iter()
                    .position(|s| s.id == *sid)
                    .unwrap_or(usize::MAX),
                sess.ordinal(),
                matches!(group, FieldGroup::Comment),
            )
        });
        keys.into_iter()
            .filter_map(|key| {
                self.pending.remove(&key).map(|pw| WriteRequest {
                    student_id: key.0,
                    session: key.1,
                    record_id: pw.record_id,
                    snapshot: pw.snapshot,
                })
            })
            .collect()
    }

    fn cell_wire(&self, student_id: &str, session: Session) -> serde_json::Value {
        let cell = self
            .canonical
            .get(student_id)
            .and_then(|m| m.get(&session));
        match cell {
            Some(c) => json!({
                "session": session.as_wire(),
                "present": true,
                "_id": c.record_id,
                "attendance": c.attendance,
                "behaviour": c.behaviour.as_wire(),
                "comment": c.comment,
                "submitted": c.submitted,
            }),
            None => json!({
                "session": session.as_wire(),
                "present": false,
                "_id": null,
                "attendance": false,
                "behaviour": Behaviour::Unmarked.as_wire(),
                "comment": null,
                "submitted": false,
            }),
        }
    }

    /// Row view: one row per roster student showing that student's
    /// currently selected session.
    pub fn row_view(&self) -> Vec<serde_json::Value> {
        self.roster
            .iter()
            .map(|s| {
                let session = self.selected_session(&s.id);
                json!({
                    "studentId": s.id,
                    "displayName": s.display_name,
                    "active": s.active,
                    "selectedSession": session.as_wire(),
                    "cell": self.cell_wire(&s.id, session),
                })
            })
            .collect()
    }

    /// Expanded view: all six calendar sessions for one student,
    /// placeholders included.
    pub fn expanded_view(&self, student_id: &str) -> Vec<serde_json::Value> {
        SESSION_CALENDAR
            .iter()
            .map(|s| self.cell_wire(student_id, *s))
            .collect()
    }

    fn group_visible(&self, student_id: &str) -> bool {
        match self.canonical.get(student_id) {
            Some(sessions) => {
                sessions.values().any(|c| c.submitted) || sessions.len() >= SESSION_COUNT
            }
            None => false,
        }
    }

    /// Audit view: the same row/expand structure, but only for students
    /// whose group the visibility policy marks visible. Displayed fields
    /// follow the summary rule (first touched session in calendar order).
    pub fn audit_view(&self) -> Vec<serde_json::Value> {
        self.roster
            .iter()
            .filter(|s| self.group_visible(&s.id))
            .map(|s| {
                let sessions = self.canonical.get(&s.id);
                let lead = sessions.and_then(|m| {
                    SESSION_CALENDAR.iter().find_map(|sess| m.get(sess).map(|c| (*sess, c)))
                });
                let touched = sessions.map(|m| m.len()).unwrap_or(0);
                let submitted = sessions
                    .map(|m| m.values().any(|c| c.submitted))
                    .unwrap_or(false);
                json!({
                    "studentId": s.id,
                    "displayName": s.display_name,
                    "engagementDate": self.day.format("%Y-%m-%d").to_string(),
                    "attendance": lead.map(|(_, c)| c.attendance).unwrap_or(false),
                    "behaviour": lead
                        .map(|(_, c)| c.behaviour.as_wire())
                        .unwrap_or_else(|| Behaviour::Unmarked.as_wire()),
                    "comment": lead.and_then(|(_, c)| c.comment.clone()),
                    "sessionsTouched": touched,
                    "submitted": submitted,
                    "sessions": self.expanded_view(&s.id),
                })
            })
            .collect()
    }
}
