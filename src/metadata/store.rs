//! The metadata persistence collaborator.
//!
//! The sweeper only needs two queries: the distinct values of an id field
//! and a bulk delete by predicate. Any engine offering indexed reads and
//! deletes can implement [`MetadataStore`].

use std::collections::HashSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::metadata::{
    Collection, Field, Instance, MetadataRecord, Predicate, Series, Study, UserSession,
};

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Distinct values of `field` across `collection`, optionally only over
    /// records matching `filter`.
    async fn distinct_parent_ids(
        &self,
        collection: Collection,
        field: Field,
        filter: Option<&Predicate>,
    ) -> Result<HashSet<String>>;

    /// Deletes every record of `collection` matching `predicate` and
    /// returns how many went.
    async fn delete_where(&self, collection: Collection, predicate: &Predicate) -> Result<u64>;
}

#[derive(Debug, Default)]
struct Tables {
    studies: Vec<Study>,
    series: Vec<Series>,
    instances: Vec<Instance>,
    sessions: Vec<UserSession>,
}

/// Volatile [`MetadataStore`] holding every collection in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    tables: RwLock<Tables>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Inserts replace any record with the same id, so re-posting a session
    // refreshes its activity instead of duplicating it.

    pub fn insert_study(&self, study: Study) -> Result<()> {
        upsert(&mut self.write()?.studies, study, Field::StudyUid);
        Ok(())
    }

    pub fn insert_series(&self, series: Series) -> Result<()> {
        upsert(&mut self.write()?.series, series, Field::SeriesUid);
        Ok(())
    }

    pub fn insert_instance(&self, instance: Instance) -> Result<()> {
        upsert(&mut self.write()?.instances, instance, Field::SopUid);
        Ok(())
    }

    pub fn insert_session(&self, session: UserSession) -> Result<()> {
        upsert(&mut self.write()?.sessions, session, Field::SessionId);
        Ok(())
    }

    pub fn count(&self, collection: Collection) -> Result<usize> {
        let tables = self.read()?;
        Ok(match collection {
            Collection::Studies => tables.studies.len(),
            Collection::Series => tables.series.len(),
            Collection::Instances => tables.instances.len(),
            Collection::UserSessions => tables.sessions.len(),
        })
    }

    /// Values of `field` in `collection`, sorted. Handy for assertions.
    pub fn ids(&self, collection: Collection, field: Field) -> Result<Vec<String>> {
        let tables = self.read()?;
        let mut ids: Vec<String> = match collection {
            Collection::Studies => collect_field(&tables.studies, field, None),
            Collection::Series => collect_field(&tables.series, field, None),
            Collection::Instances => collect_field(&tables.instances, field, None),
            Collection::UserSessions => collect_field(&tables.sessions, field, None),
        }
        .into_iter()
        .collect();
        ids.sort();
        Ok(ids)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| CacheError::Metadata("metadata tables lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| CacheError::Metadata("metadata tables lock poisoned".to_string()))
    }
}

fn upsert<R: MetadataRecord>(records: &mut Vec<R>, record: R, id: Field) {
    match records.iter().position(|r| r.field(id) == record.field(id)) {
        Some(index) => records[index] = record,
        None => records.push(record),
    }
}

fn collect_field<R: MetadataRecord>(
    records: &[R],
    field: Field,
    filter: Option<&Predicate>,
) -> HashSet<String> {
    records
        .iter()
        .filter(|r| filter.map_or(true, |p| p.matches(*r)))
        .filter_map(|r| r.field(field).map(str::to_string))
        .collect()
}

fn remove_matching<R: MetadataRecord>(records: &mut Vec<R>, predicate: &Predicate) -> u64 {
    let before = records.len();
    records.retain(|r| !predicate.matches(r));
    (before - records.len()) as u64
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn distinct_parent_ids(
        &self,
        collection: Collection,
        field: Field,
        filter: Option<&Predicate>,
    ) -> Result<HashSet<String>> {
        let tables = self.read()?;
        Ok(match collection {
            Collection::Studies => collect_field(&tables.studies, field, filter),
            Collection::Series => collect_field(&tables.series, field, filter),
            Collection::Instances => collect_field(&tables.instances, field, filter),
            Collection::UserSessions => collect_field(&tables.sessions, field, filter),
        })
    }

    async fn delete_where(&self, collection: Collection, predicate: &Predicate) -> Result<u64> {
        let mut tables = self.write()?;
        let deleted = match collection {
            Collection::Studies => remove_matching(&mut tables.studies, predicate),
            Collection::Series => remove_matching(&mut tables.series, predicate),
            Collection::Instances => remove_matching(&mut tables.instances, predicate),
            Collection::UserSessions => remove_matching(&mut tables.sessions, predicate),
        };
        debug!(%collection, deleted, "Deleted metadata records");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn seeded() -> InMemoryMetadataStore {
        let now = Utc::now();
        let store = InMemoryMetadataStore::new();
        store
            .insert_series(Series {
                series_uid: "Se1".into(),
                study_uid: "S1".into(),
                created_at: now,
            })
            .unwrap();
        store
            .insert_series(Series {
                series_uid: "Se2".into(),
                study_uid: "S2".into(),
                created_at: now,
            })
            .unwrap();
        store
            .insert_series(Series {
                series_uid: "Se3".into(),
                study_uid: "S1".into(),
                created_at: now - Duration::hours(1),
            })
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_distinct_parent_ids() {
        let store = seeded();
        let studies = store
            .distinct_parent_ids(Collection::Series, Field::StudyUid, None)
            .await
            .unwrap();
        assert_eq!(studies.len(), 2);
        assert!(studies.contains("S1") && studies.contains("S2"));
    }

    #[tokio::test]
    async fn test_distinct_parent_ids_with_filter() {
        let store = seeded();
        let filter = Predicate::FieldIn {
            field: Field::StudyUid,
            values: ["S1".to_string()].into_iter().collect(),
        };
        let series = store
            .distinct_parent_ids(Collection::Series, Field::SeriesUid, Some(&filter))
            .await
            .unwrap();
        assert_eq!(series.len(), 2);
        assert!(!series.contains("Se2"));
    }

    #[tokio::test]
    async fn test_delete_where() {
        let store = seeded();
        let cutoff = Utc::now() - Duration::minutes(30);

        let deleted = store
            .delete_where(Collection::Series, &Predicate::CreatedBefore(cutoff))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(
            store.ids(Collection::Series, Field::SeriesUid).unwrap(),
            vec!["Se1", "Se2"]
        );
    }

    #[test]
    fn test_insert_replaces_same_id() {
        let store = InMemoryMetadataStore::new();
        let earlier = Utc::now() - Duration::hours(30);
        store
            .insert_session(UserSession {
                session_id: "u1".into(),
                last_activity: earlier,
            })
            .unwrap();
        store
            .insert_session(UserSession {
                session_id: "u1".into(),
                last_activity: Utc::now(),
            })
            .unwrap();

        assert_eq!(store.count(Collection::UserSessions).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_collection() {
        let store = InMemoryMetadataStore::new();
        let ids = store
            .distinct_parent_ids(Collection::Studies, Field::StudyUid, None)
            .await
            .unwrap();
        assert!(ids.is_empty());
        assert_eq!(store.count(Collection::Instances).unwrap(), 0);
    }
}
