//! Orphan Sweeper
//!
//! Cascading referential-integrity cleanup for the study -> series ->
//! instance hierarchy, plus session expiry.
//!
//! # Passes
//! 1. Sessions idle longer than `max_session_age`
//! 2. Instances whose series no longer exists
//! 3. Series whose study no longer exists
//!
//! Each pass reads its own fresh parent set, so records written while a
//! sweep runs are judged against current data. A failing pass is logged
//! and reported; the remaining passes still run.
//!
//! Because pass 2 runs before pass 3, instances under a series removed in
//! pass 3 are only cleaned by the next sweep. With
//! [`with_same_cycle_cascade`](OrphanSweeper::with_same_cycle_cascade)
//! pass 2 counts only series whose study is live as valid parents, and one
//! sweep clears both levels.
//!
//! Children created less than `orphan_grace` ago are never deleted as
//! orphans; their parent may still be in flight.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::CleanupSettings;
use crate::error::Result;
use crate::metadata::{Collection, Field, MetadataStore, Predicate};

/// Result of one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOutcome {
    Deleted(u64),
    Failed(String),
}

impl PassOutcome {
    pub fn deleted(&self) -> u64 {
        match self {
            PassOutcome::Deleted(n) => *n,
            PassOutcome::Failed(_) => 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PassOutcome::Failed(_))
    }
}

impl From<Result<u64>> for PassOutcome {
    fn from(result: Result<u64>) -> Self {
        match result {
            Ok(n) => PassOutcome::Deleted(n),
            Err(e) => PassOutcome::Failed(e.to_string()),
        }
    }
}

/// Per-pass outcomes of one sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanSweepReport {
    pub expired_sessions: PassOutcome,
    pub orphaned_instances: PassOutcome,
    pub orphaned_series: PassOutcome,
}

impl OrphanSweepReport {
    pub fn total_deleted(&self) -> u64 {
        self.expired_sessions.deleted()
            + self.orphaned_instances.deleted()
            + self.orphaned_series.deleted()
    }

    pub fn failed_passes(&self) -> usize {
        [
            &self.expired_sessions,
            &self.orphaned_instances,
            &self.orphaned_series,
        ]
        .iter()
        .filter(|p| p.is_failed())
        .count()
    }
}

pub struct OrphanSweeper {
    store: Arc<dyn MetadataStore>,
    max_session_age: Duration,
    orphan_grace: Duration,
    same_cycle_cascade: bool,
}

impl std::fmt::Debug for OrphanSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrphanSweeper")
            .field("max_session_age", &self.max_session_age)
            .field("orphan_grace", &self.orphan_grace)
            .field("same_cycle_cascade", &self.same_cycle_cascade)
            .finish()
    }
}

impl OrphanSweeper {
    /// Sweeper with a 24 hour session age and a 5 minute orphan grace.
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store,
            max_session_age: Duration::hours(24),
            orphan_grace: Duration::minutes(5),
            same_cycle_cascade: false,
        }
    }

    pub fn from_config(store: Arc<dyn MetadataStore>, settings: &CleanupSettings) -> Self {
        Self::new(store)
            .with_max_session_age(settings.max_session_age())
            .with_orphan_grace(settings.orphan_grace())
    }

    pub fn with_max_session_age(mut self, age: Duration) -> Self {
        self.max_session_age = age;
        self
    }

    pub fn with_orphan_grace(mut self, grace: Duration) -> Self {
        self.orphan_grace = grace;
        self
    }

    pub fn with_same_cycle_cascade(mut self, enabled: bool) -> Self {
        self.same_cycle_cascade = enabled;
        self
    }

    pub async fn sweep(&self) -> OrphanSweepReport {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> OrphanSweepReport {
        let expired_sessions = log_pass("expired_sessions", self.expire_sessions(now).await);
        let orphaned_instances =
            log_pass("orphaned_instances", self.delete_orphaned_instances(now).await);
        let orphaned_series = log_pass("orphaned_series", self.delete_orphaned_series(now).await);

        let report = OrphanSweepReport {
            expired_sessions,
            orphaned_instances,
            orphaned_series,
        };
        info!(
            sessions = report.expired_sessions.deleted(),
            instances = report.orphaned_instances.deleted(),
            series = report.orphaned_series.deleted(),
            failed_passes = report.failed_passes(),
            "Orphan sweep finished"
        );
        report
    }

    // == Passes ==

    async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - self.max_session_age;
        self.store
            .delete_where(Collection::UserSessions, &Predicate::LastActivityBefore(cutoff))
            .await
    }

    async fn delete_orphaned_instances(&self, now: DateTime<Utc>) -> Result<u64> {
        let live_series = if self.same_cycle_cascade {
            let live_studies = self.live_studies().await?;
            let under_live_study = Predicate::FieldIn {
                field: Field::StudyUid,
                values: live_studies,
            };
            self.store
                .distinct_parent_ids(Collection::Series, Field::SeriesUid, Some(&under_live_study))
                .await?
        } else {
            self.store
                .distinct_parent_ids(Collection::Series, Field::SeriesUid, None)
                .await?
        };
        let predicate = self.orphan_predicate(Field::SeriesUid, live_series, now);
        self.store.delete_where(Collection::Instances, &predicate).await
    }

    async fn delete_orphaned_series(&self, now: DateTime<Utc>) -> Result<u64> {
        let live_studies = self.live_studies().await?;
        let predicate = self.orphan_predicate(Field::StudyUid, live_studies, now);
        self.store.delete_where(Collection::Series, &predicate).await
    }

    async fn live_studies(&self) -> Result<HashSet<String>> {
        self.store
            .distinct_parent_ids(Collection::Studies, Field::StudyUid, None)
            .await
    }

    fn orphan_predicate(
        &self,
        parent_field: Field,
        live_parents: HashSet<String>,
        now: DateTime<Utc>,
    ) -> Predicate {
        Predicate::All(vec![
            Predicate::FieldNotIn {
                field: parent_field,
                values: live_parents,
            },
            Predicate::CreatedBefore(now - self.orphan_grace),
        ])
    }
}

fn log_pass(pass: &'static str, result: Result<u64>) -> PassOutcome {
    if let Err(e) = &result {
        warn!(pass, error = %e, "Orphan sweep pass failed");
    }
    result.into()
}
