use crate::model::{Behaviour, Engagement, Session, SESSION_CALENDAR, SESSION_COUNT};
use chrono::NaiveDate;
use serde_json::json;
use std::collections::BTreeMap;

/// All records sharing (class, student, day). The storage key guarantees at
/// most one record per session within a group.
#[derive(Debug, Clone)]
pub struct Group {
    pub class_id: String,
    pub student_id: String,
    pub day: NaiveDate,
    pub records: BTreeMap<Session, Engagement>,
}

impl Group {
    pub fn sessions_touched(&self) -> usize {
        self.records.len()
    }

    pub fn any_submitted(&self) -> bool {
        self.records.values().any(|r| r.submitted)
    }

    /// The marked-listing policy: a group qualifies once any of its records
    /// is sealed, or once every calendar session has been touched. Both
    /// conditions are monotonic, so a visible group can never go hidden.
    pub fn is_visible(&self) -> bool {
        self.any_submitted() || self.sessions_touched() >= SESSION_COUNT
    }

    /// One summary row for the group: the displayed fields come from the
    /// first session in calendar order that has a record.
    pub fn summary(&self) -> SummaryRow {
        let lead = SESSION_CALENDAR
            .iter()
            .find_map(|s| self.records.get(s));
        SummaryRow {
            class_id: self.class_id.clone(),
            student_id: self.student_id.clone(),
            day: self.day,
            attendance: lead.map(|r| r.attendance).unwrap_or(false),
            behaviour: lead.map(|r| r.behaviour).unwrap_or_default(),
            comment: lead.and_then(|r| r.comment.clone()),
            sessions_touched: self.sessions_touched(),
            submitted: self.any_submitted(),
        }
    }

    /// Exactly one sub-row per calendar session, whether or not a record
    /// exists; untouched sessions render as placeholders.
    pub fn expand(&self) -> Vec<SubRow> {
        SESSION_CALENDAR
            .iter()
            .map(|s| match self.records.get(s) {
                Some(r) => SubRow {
                    session: *s,
                    present: true,
                    record_id: Some(r.id.clone()),
                    attendance: r.attendance,
                    behaviour: r.behaviour,
                    comment: r.comment.clone(),
                    submitted: r.submitted,
                },
                None => SubRow::placeholder(*s),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub class_id: String,
    pub student_id: String,
    pub day: NaiveDate,
    pub attendance: bool,
    pub behaviour: Behaviour,
    pub comment: Option<String>,
    pub sessions_touched: usize,
    pub submitted: bool,
}

impl SummaryRow {
    pub fn to_wire(&self) -> serde_json::Value {
        json!({
            "class": self.class_id,
            "student": self.student_id,
            "engagementDate": self.day.format("%Y-%m-%d").to_string(),
            "attendance": self.attendance,
            "behaviour": self.behaviour.as_wire(),
            "comment": self.comment,
            "sessionsTouched": self.sessions_touched,
            "submitted": self.submitted,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubRow {
    pub session: Session,
    pub present: bool,
    pub record_id: Option<String>,
    pub attendance: bool,
    pub behaviour: Behaviour,
    pub comment: Option<String>,
    pub submitted: bool,
}

impl SubRow {
    fn placeholder(session: Session) -> SubRow {
        SubRow {
            session,
            present: false,
            record_id: None,
            attendance: false,
            behaviour: Behaviour::Unmarked,
            comment: None,
            submitted: false,
        }
    }

    pub fn to_wire(&self) -> serde_json::Value {
        json!({
            "session": self.session.as_wire(),
            "present": self.present,
            "_id": self.record_id,
            "attendance": self.attendance,
            "behaviour": self.behaviour.as_wire(),
            "comment": self.comment,
            "submitted": self.submitted,
        })
    }
}

/// Bucket raw records into (class, student, day) groups. Later records for
/// the same session replace earlier ones, which keeps the projection stable
/// even against a database that predates the composite unique key.
pub fn group_records(records: &[Engagement]) -> Vec<Group> {
    let mut buckets: BTreeMap<(String, String, NaiveDate), Group> = BTreeMap::new();
    for rec in records {
        let key = (rec.class_id.clone(), rec.student_id.clone(), rec.day);
        let group = buckets.entry(key).or_insert_with(|| Group {
            class_id: rec.class_id.clone(),
            student_id: rec.student_id.clone(),
            day: rec.day,
            records: BTreeMap::new(),
        });
        group.records.insert(rec.session, rec.clone());
    }
    buckets.into_values().collect()
}

/// The marked listing: grouped, filtered to visible, summarised.
pub fn visible_summaries(records: &[Engagement]) -> Vec<SummaryRow> {
    group_records(records)
        .into_iter()
        .filter(Group::is_visible)
        .map(|g| g.summary())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(student: &str, session: Session, submitted: bool) -> Engagement {
        Engagement {
            id: format!("{}-{}", student, session.as_wire()),
            class_id: "c7".to_string(),
            student_id: student.to_string(),
            session,
            day: NaiveDate::from_ymd_opt(2025, 3, 4).unwrap(),
            attendance: true,
            behaviour: Behaviour::Good,
            comment: None,
            submitted,
            created_at: "2025-03-04T09:00:00Z".to_string(),
            updated_at: "2025-03-04T09:00:00Z".to_string(),
        }
    }

    #[test]
    fn five_sessions_hidden_six_visible() {
        let mut records: Vec<Engagement> = SESSION_CALENDAR[..5]
            .iter()
            .map(|s| rec("s42", *s, false))
            .collect();
        let groups = group_records(&records);
        assert_eq!(groups.len(), 1);
        assert!(!groups[0].is_visible());

        records.push(rec("s42", SESSION_CALENDAR[5], false));
        let groups = group_records(&records);
        assert!(groups[0].is_visible());
    }

    #[test]
    fn single_submitted_record_is_visible() {
        let records = vec![rec("s42", Session::Break, true)];
        let groups = group_records(&records);
        assert!(groups[0].is_visible());
    }

    #[test]
    fn visibility_is_monotonic() {
        let mut records: Vec<Engagement> =
            SESSION_CALENDAR.iter().map(|s| rec("s42", *s, false)).collect();
        assert!(group_records(&records)[0].is_visible());

        // Sealing a record keeps the group visible.
        records[2].submitted = true;
        assert!(group_records(&records)[0].is_visible());
    }

    #[test]
    fn summary_takes_first_calendar_session_with_a_record() {
        let mut lunch = rec("s42", Session::Lunch, false);
        lunch.behaviour = Behaviour::Poor;
        lunch.comment = Some("restless".to_string());
        let mut late = rec("s42", Session::Session3, false);
        late.behaviour = Behaviour::Good;

        // Lunch precedes session3 in the calendar, so it leads the summary
        // even though session3 was passed first.
        let groups = group_records(&[late, lunch]);
        let summary = groups[0].summary();
        assert_eq!(summary.behaviour, Behaviour::Poor);
        assert_eq!(summary.comment.as_deref(), Some("restless"));
        assert_eq!(summary.sessions_touched, 2);
        assert!(!summary.submitted);
    }

    #[test]
    fn expansion_always_renders_six_sub_rows() {
        let records = vec![rec("s42", Session::Session2, false)];
        let groups = group_records(&records);
        let rows = groups[0].expand();
        assert_eq!(rows.len(), SESSION_COUNT);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.session, SESSION_CALENDAR[i]);
        }
        assert!(rows[3].present);
        assert!(rows[3].record_id.is_some());
        // Untouched sessions are unattended/unmarked/blank placeholders.
        assert!(!rows[0].present);
        assert!(!rows[0].attendance);
        assert_eq!(rows[0].behaviour, Behaviour::Unmarked);
        assert_eq!(rows[0].comment, None);
    }

    #[test]
    fn visible_summaries_filters_hidden_groups() {
        let mut records: Vec<Engagement> =
            SESSION_CALENDAR.iter().map(|s| rec("done", *s, false)).collect();
        records.push(rec("partial", Session::Session1, false));
        let rows = visible_summaries(&records);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].student_id, "done");
    }
}
