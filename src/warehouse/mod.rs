//! Warehouse Pointer Store (C6) and Reconciler (C7).

pub mod curated_sink;
pub mod pointer_store;
pub mod reconciler;

pub use curated_sink::{CuratedSink, NullCuratedSink};
pub use pointer_store::{WarehousePointer, WarehousePointerStore};
pub use reconciler::{ReconcileTarget, ReconciliationPlan, WarehouseReconciler};
