//! Control Plane (C8): operator actions over partition state. Every mutation
//! is a single idempotent upsert; nothing here ever touches the Raw Sink
//! except `preview`, which only reads.

pub mod backfill;
pub mod inspect;
pub mod mark_terminal;
pub mod observe;
pub mod preview;
pub mod retry;

pub use backfill::{backfill_enqueue, BackfillOptions, BackfillReport};
pub use inspect::{inspect, render_states_json, render_states_table};
pub use mark_terminal::{mark_terminal, MarkTerminalOptions, MarkTerminalReport};
pub use observe::{observe_freshness, observe_retries, observe_state, FreshnessReport, RetriesReport, StateSummary};
pub use preview::{collect_preview, render_preview, PartitionPreview};
pub use retry::{retry_partitions, RetryOptions, RetryReport};
