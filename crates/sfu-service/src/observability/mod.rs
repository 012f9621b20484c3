//! Observability for the SFU service.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! Display names and chat content are never logged.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `sfu_rooms_active` | Gauge | none | Rooms held by the registry |
//! | `sfu_peers_active` | Gauge | none | Peers joined to any room |
//! | `sfu_engine_calls_total` | Counter | `operation`, `status` | Media engine call outcomes |
//! | `sfu_engine_call_duration_seconds` | Histogram | `operation` | Media engine latency |
//! | `sfu_signaling_messages_total` | Counter | `message_type`, `status` | Signaling request outcomes |
//! | `sfu_signaling_latency_seconds` | Histogram | `message_type` | Signaling request latency |
//! | `sfu_signaling_connections_active` | Gauge | none | Open WebSocket sessions |
//! | `sfu_chat_messages_total` | Counter | `message_type` | Chat messages stored |
//! | `sfu_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator |
//! | `sfu_actor_panics_total` | Counter | `actor_type` | Actor panics (bugs) |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
