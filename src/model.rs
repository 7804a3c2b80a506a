use chrono::{DateTime, NaiveDate};
use serde_json::json;

/// The six fixed daily sessions, in the order they occur.
///
/// The calendar is a pure constant: ordinal order drives summary-row
/// selection and the fixed 6-row expansion, and the count is the
/// completeness threshold for the marked listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Session {
    BreakfastClub,
    Session1,
    Break,
    Session2,
    Lunch,
    Session3,
}

pub const SESSION_CALENDAR: [Session; 6] = [
    Session::BreakfastClub,
    Session::Session1,
    Session::Break,
    Session::Session2,
    Session::Lunch,
    Session::Session3,
];

pub const SESSION_COUNT: usize = SESSION_CALENDAR.len();

impl Session {
    pub fn as_wire(self) -> &'static str {
        match self {
            Session::BreakfastClub => "breakfast_club",
            Session::Session1 => "session1",
            Session::Break => "break",
            Session::Session2 => "session2",
            Session::Lunch => "lunch",
            Session::Session3 => "session3",
        }
    }

    pub fn parse_wire(s: &str) -> Option<Session> {
        match s.trim().to_ascii_lowercase().as_str() {
            "breakfast_club" => Some(Session::BreakfastClub),
            "session1" => Some(Session::Session1),
            "break" => Some(Session::Break),
            "session2" => Some(Session::Session2),
            "lunch" => Some(Session::Lunch),
            "session3" => Some(Session::Session3),
            _ => None,
        }
    }

    /// Position in the daily calendar, 0-based.
    pub fn ordinal(self) -> usize {
        SESSION_CALENDAR.iter().position(|s| *s == self).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Unmarked,
    Good,
    Fair,
    Average,
    Poor,
}

impl Behaviour {
    pub fn as_wire(self) -> &'static str {
        match self {
            Behaviour::Unmarked => "unmarked",
            Behaviour::Good => "good",
            Behaviour::Fair => "fair",
            Behaviour::Average => "average",
            Behaviour::Poor => "poor",
        }
    }

    pub fn parse_wire(s: &str) -> Option<Behaviour> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unmarked" => Some(Behaviour::Unmarked),
            "good" => Some(Behaviour::Good),
            "fair" => Some(Behaviour::Fair),
            "average" => Some(Behaviour::Average),
            "poor" => Some(Behaviour::Poor),
            _ => None,
        }
    }
}

impl Default for Behaviour {
    fn default() -> Self {
        Behaviour::Unmarked
    }
}

/// Truncate an incoming date or datetime to its calendar day.
///
/// Two timestamps are the same day iff their truncations match; truncating
/// an already-truncated value is a no-op. Accepts `YYYY-MM-DD` or a full
/// RFC 3339 timestamp.
pub fn truncate_day(raw: &str) -> Option<NaiveDate> {
    let t = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.date_naive());
    }
    None
}

/// One attendance + behaviour + comment entry for one student, one class,
/// one fixed daily session, one calendar day.
#[derive(Debug, Clone, PartialEq)]
pub struct Engagement {
    pub id: String,
    pub class_id: String,
    pub student_id: String,
    pub session: Session,
    pub day: NaiveDate,
    pub attendance: bool,
    pub behaviour: Behaviour,
    pub comment: Option<String>,
    pub submitted: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Engagement {
    pub fn to_wire(&self) -> serde_json::Value {
        json!({
            "_id": self.id,
            "class": self.class_id,
            "student": self.student_id,
            "session": self.session.as_wire(),
            "engagementDate": self.day.format("%Y-%m-%d").to_string(),
            "attendance": self.attendance,
            "behaviour": self.behaviour.as_wire(),
            "comment": self.comment,
            "submitted": self.submitted,
            "createdAt": self.created_at,
            "updatedAt": self.updated_at,
        })
    }
}

/// Partial field update for an upsert. `None` leaves the stored value (or
/// the insert default) untouched; an empty `comment` clears the stored
/// comment. `submitted` is one-way: `Some(false)` is treated the same as
/// `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngagementPatch {
    pub attendance: Option<bool>,
    pub behaviour: Option<Behaviour>,
    pub comment: Option<String>,
    pub submitted: Option<bool>,
}
