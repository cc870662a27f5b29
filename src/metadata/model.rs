//! Metadata records and the query vocabulary used by the sweeper.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Study {
    pub study_uid: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    pub series_uid: String,
    pub study_uid: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub sop_uid: String,
    pub series_uid: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSession {
    pub session_id: String,
    #[serde(default = "Utc::now")]
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Studies,
    Series,
    Instances,
    UserSessions,
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Collection::Studies => "studies",
            Collection::Series => "series",
            Collection::Instances => "instances",
            Collection::UserSessions => "user_sessions",
        };
        f.write_str(name)
    }
}

/// Identifier fields a predicate can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    StudyUid,
    SeriesUid,
    SopUid,
    SessionId,
}

/// Read access to the fields and timestamps of any record kind.
pub trait MetadataRecord {
    fn field(&self, field: Field) -> Option<&str>;

    fn created_at(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn last_activity(&self) -> Option<DateTime<Utc>> {
        None
    }
}

impl MetadataRecord for Study {
    fn field(&self, field: Field) -> Option<&str> {
        match field {
            Field::StudyUid => Some(&self.study_uid),
            _ => None,
        }
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }
}

impl MetadataRecord for Series {
    fn field(&self, field: Field) -> Option<&str> {
        match field {
            Field::SeriesUid => Some(&self.series_uid),
            Field::StudyUid => Some(&self.study_uid),
            _ => None,
        }
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }
}

impl MetadataRecord for Instance {
    fn field(&self, field: Field) -> Option<&str> {
        match field {
            Field::SopUid => Some(&self.sop_uid),
            Field::SeriesUid => Some(&self.series_uid),
            _ => None,
        }
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }
}

impl MetadataRecord for UserSession {
    fn field(&self, field: Field) -> Option<&str> {
        match field {
            Field::SessionId => Some(&self.session_id),
            _ => None,
        }
    }

    fn last_activity(&self) -> Option<DateTime<Utc>> {
        Some(self.last_activity)
    }
}

/// Record filter understood by every [`MetadataStore`](super::MetadataStore).
///
/// A predicate on a field or timestamp the record does not have never
/// matches.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    FieldIn { field: Field, values: HashSet<String> },
    FieldNotIn { field: Field, values: HashSet<String> },
    CreatedBefore(DateTime<Utc>),
    LastActivityBefore(DateTime<Utc>),
    All(Vec<Predicate>),
}

impl Predicate {
    pub fn matches(&self, record: &dyn MetadataRecord) -> bool {
        match self {
            Predicate::FieldIn { field, values } => {
                record.field(*field).is_some_and(|v| values.contains(v))
            }
            Predicate::FieldNotIn { field, values } => {
                record.field(*field).is_some_and(|v| !values.contains(v))
            }
            Predicate::CreatedBefore(cutoff) => record.created_at().is_some_and(|t| t < *cutoff),
            Predicate::LastActivityBefore(cutoff) => {
                record.last_activity().is_some_and(|t| t < *cutoff)
            }
            Predicate::All(predicates) => predicates.iter().all(|p| p.matches(record)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn set(values: &[&str]) -> HashSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_field_predicates() {
        let series = Series {
            series_uid: "Se1".into(),
            study_uid: "S1".into(),
            created_at: Utc::now(),
        };
        let live = Predicate::FieldIn {
            field: Field::StudyUid,
            values: set(&["S1"]),
        };
        let orphan = Predicate::FieldNotIn {
            field: Field::StudyUid,
            values: set(&["S1"]),
        };
        assert!(live.matches(&series));
        assert!(!orphan.matches(&series));
    }

    #[test]
    fn test_missing_field_never_matches() {
        let study = Study {
            study_uid: "S1".into(),
            created_at: Utc::now(),
        };
        let predicate = Predicate::FieldNotIn {
            field: Field::SeriesUid,
            values: HashSet::new(),
        };
        assert!(!predicate.matches(&study));
        assert!(!Predicate::LastActivityBefore(Utc::now()).matches(&study));
    }

    #[test]
    fn test_all_requires_every_predicate() {
        let now = Utc::now();
        let instance = Instance {
            sop_uid: "I1".into(),
            series_uid: "gone".into(),
            created_at: now,
        };
        let orphan = Predicate::FieldNotIn {
            field: Field::SeriesUid,
            values: set(&["Se1"]),
        };
        let cutoff_at_creation = Predicate::All(vec![orphan.clone(), Predicate::CreatedBefore(now)]);
        let cutoff_after_creation =
            Predicate::All(vec![orphan, Predicate::CreatedBefore(now + Duration::seconds(1))]);

        assert!(!cutoff_at_creation.matches(&instance));
        assert!(cutoff_after_creation.matches(&instance));
    }
}
