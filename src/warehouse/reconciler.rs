//! Warehouse Reconciler (C7): diffs successful `PartitionState` rows against
//! `WarehousePointer` rows and applies a load/replace/demote plan.

use super::curated_sink::CuratedSink;
use super::pointer_store::{WarehousePointer, WarehousePointerStore};
use crate::error::Result;
use crate::identity::PartitionKey;
use crate::state_store::{PartitionStatus, StateFilter, StateStore};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ReconcileTarget {
    pub key: PartitionKey,
    pub run_id: String,
    pub schema_version: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReconciliationPlan {
    pub load: Vec<ReconcileTarget>,
    pub replace: Vec<ReconcileTarget>,
    pub demote: Vec<WarehousePointer>,
}

pub struct WarehouseReconciler {
    state_store: Arc<StateStore>,
    pointer_store: Arc<WarehousePointerStore>,
    curated_sink: Arc<dyn CuratedSink>,
}

impl WarehouseReconciler {
    pub fn new(
        state_store: Arc<StateStore>,
        pointer_store: Arc<WarehousePointerStore>,
        curated_sink: Arc<dyn CuratedSink>,
    ) -> Self {
        Self {
            state_store,
            pointer_store,
            curated_sink,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> Result<ReconciliationPlan> {
        let plan = self.plan().await?;
        tracing::info!(
            load = plan.load.len(),
            replace = plan.replace.len(),
            demote = plan.demote.len(),
            "reconciliation plan computed"
        );
        self.apply(&plan).await?;
        Ok(plan)
    }

    async fn plan(&self) -> Result<ReconciliationPlan> {
        let states = self
            .state_store
            .list(&StateFilter {
                status: Some(PartitionStatus::Success),
                ..Default::default()
            })
            .await?;

        let mut load = Vec::new();
        let mut replace = Vec::new();
        let mut success_keys = HashSet::new();

        for state in &states {
            let Some(current_run_id) = state.current_run_id.clone() else {
                continue;
            };
            let key = state.key();
            success_keys.insert(key.clone());

            let target = ReconcileTarget {
                key: key.clone(),
                run_id: current_run_id.clone(),
                schema_version: state.schema_version.clone(),
            };
            match self.pointer_store.get(&key).await? {
                None => load.push(target),
                Some(pointer) if pointer.run_id != current_run_id => replace.push(target),
                Some(_) => {}
            }
        }

        let mut demote = Vec::new();
        for pointer in self.pointer_store.list().await? {
            if !success_keys.contains(&pointer.key()) {
                demote.push(pointer);
            }
        }

        Ok(ReconciliationPlan {
            load,
            replace,
            demote,
        })
    }

    async fn apply(&self, plan: &ReconciliationPlan) -> Result<()> {
        let now = Utc::now();
        for target in plan.load.iter().chain(plan.replace.iter()) {
            self.curated_sink.stage(&target.key, &target.run_id).await?;
            let pointer = WarehousePointer {
                source: target.key.source.clone(),
                customer_id: target.key.customer_id.clone(),
                query_name: target.key.query_name.clone(),
                logical_date: target.key.logical_date,
                run_id: target.run_id.clone(),
                schema_version: target.schema_version.clone().unwrap_or_default(),
                loaded_at: now,
            };
            self.pointer_store.upsert(&pointer).await?;
        }
        for pointer in &plan.demote {
            self.pointer_store.delete(&pointer.key()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::PartitionState;
    use chrono::NaiveDate;
    use crate::warehouse::curated_sink::NullCuratedSink;

    struct Fixture {
        state_store: Arc<StateStore>,
        pointer_store: Arc<WarehousePointerStore>,
        reconciler: WarehouseReconciler,
        _state_dir: tempfile::TempDir,
        _pointer_dir: tempfile::TempDir,
    }

    async fn setup() -> Fixture {
        let state_dir = tempfile::tempdir().unwrap();
        let pointer_dir = tempfile::tempdir().unwrap();
        let state_store = Arc::new(StateStore::connect(state_dir.path().join("state.db")).await.unwrap());
        let pointer_store = Arc::new(
            WarehousePointerStore::connect(pointer_dir.path().join("pointers.db"))
                .await
                .unwrap(),
        );
        let reconciler = WarehouseReconciler::new(
            state_store.clone(),
            pointer_store.clone(),
            Arc::new(NullCuratedSink),
        );
        Fixture {
            state_store,
            pointer_store,
            reconciler,
            _state_dir: state_dir,
            _pointer_dir: pointer_dir,
        }
    }

    fn success_state(query_name: &str, run_id: &str) -> PartitionState {
        PartitionState {
            source: "google_ads".into(),
            customer_id: "1234567890".into(),
            query_name: query_name.into(),
            logical_date: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
            status: PartitionStatus::Success,
            current_run_id: Some(run_id.into()),
            schema_version: Some("v1".into()),
            record_count: Some(3),
            updated_at: Utc::now(),
            error_message: None,
            attempt_count: 1,
        }
    }

    #[tokio::test]
    async fn new_success_state_without_pointer_is_loaded() {
        let f = setup().await;
        let state = success_state("campaign_stats", "r1");
        f.state_store.upsert(&state).await.unwrap();

        let plan = f.reconciler.run().await.unwrap();
        assert_eq!(plan.load.len(), 1);
        assert!(plan.replace.is_empty());
        assert!(plan.demote.is_empty());

        let pointer = f.pointer_store.get(&state.key()).await.unwrap().unwrap();
        assert_eq!(pointer.run_id, "r1");
    }

    #[tokio::test]
    async fn stale_pointer_is_replaced() {
        let f = setup().await;
        let state = success_state("campaign_stats", "r2");
        f.state_store.upsert(&state).await.unwrap();
        f.pointer_store
            .upsert(&WarehousePointer {
                source: state.source.clone(),
                customer_id: state.customer_id.clone(),
                query_name: state.query_name.clone(),
                logical_date: state.logical_date,
                run_id: "r1".into(),
                schema_version: "v1".into(),
                loaded_at: Utc::now(),
            })
            .await
            .unwrap();

        let plan = f.reconciler.run().await.unwrap();
        assert_eq!(plan.replace.len(), 1);

        let pointer = f.pointer_store.get(&state.key()).await.unwrap().unwrap();
        assert_eq!(pointer.run_id, "r2");
    }

    #[tokio::test]
    async fn pointer_without_matching_success_state_is_demoted() {
        let f = setup().await;
        let pointer = WarehousePointer {
            source: "google_ads".into(),
            customer_id: "1234567890".into(),
            query_name: "campaign_stats".into(),
            logical_date: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
            run_id: "r1".into(),
            schema_version: "v1".into(),
            loaded_at: Utc::now(),
        };
        f.pointer_store.upsert(&pointer).await.unwrap();

        let plan = f.reconciler.run().await.unwrap();
        assert_eq!(plan.demote.len(), 1);
        assert!(f.pointer_store.get(&pointer.key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn matching_pointer_is_left_untouched() {
        let f = setup().await;
        let state = success_state("campaign_stats", "r1");
        f.state_store.upsert(&state).await.unwrap();
        f.pointer_store
            .upsert(&WarehousePointer {
                source: state.source.clone(),
                customer_id: state.customer_id.clone(),
                query_name: state.query_name.clone(),
                logical_date: state.logical_date,
                run_id: "r1".into(),
                schema_version: "v1".into(),
                loaded_at: Utc::now(),
            })
            .await
            .unwrap();

        let plan = f.reconciler.run().await.unwrap();
        assert!(plan.load.is_empty());
        assert!(plan.replace.is_empty());
        assert!(plan.demote.is_empty());
    }
}
