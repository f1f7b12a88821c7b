//! Observability for the matchmaking service.
//!
//! # Privacy by Default
//!
//! Instrumentation uses `#[instrument(skip_all)]` with explicit field
//! allow-listing. Member ids and room ids are logged; message text, the
//! Redis URL and the chatroom token never are. Metric labels are bounded:
//! - `lane`: 2 values (membership, choice)
//! - `kind`: 3 values (enter, leave, choice)
//! - `status`: 3 values (success, error, malformed)
//! - `outcome`: 3 values (completed, aborted, cancelled)
//! - `operation`, `error_type`: bounded by code
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `mm_jobs_processed_total` | Counter | `lane`, `kind`, `status` | Queue jobs handled |
//! | `mm_job_duration_seconds` | Histogram | `kind` | Job handling latency |
//! | `mm_store_conflicts_total` | Counter | none | Guarded commits that lost a race |
//! | `mm_rooms_created_total` | Counter | none | Rooms opened by the allocator |
//! | `mm_choreographies_active` | Gauge | none | Rooms currently running their sequence |
//! | `mm_choreographies_total` | Counter | `outcome` | Finished choreographies |
//! | `mm_matches_total` | Counter | none | Mutual matches established |
//! | `mm_connections_active` | Gauge | none | Open gateway connections on this instance |
//! | `mm_errors_total` | Counter | `operation`, `error_type` | Handling failures |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
