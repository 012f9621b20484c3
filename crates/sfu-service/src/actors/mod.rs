//! Actor model for room orchestration.
//!
//! ```text
//! RoomRegistry (one per process, explicitly constructed)
//! └── supervises N RoomActors
//!     └── RoomActor (one per active room)
//!         ├── owns the room's capability context
//!         └── owns every peer's transports, producers and consumers
//! ```
//!
//! # Key Design Decisions
//!
//! - **One room per peer**: joining a second room first leaves the first one
//! - **Engine calls off the mailbox**: rooms spawn engine calls and apply the
//!   completions in mailbox order
//! - **CancellationToken propagation**: rooms run on child tokens of the registry
//! - **Mailbox monitoring**: Depth thresholds with metrics (Room: 100/500, Session: 50/200)
//!
//! # Modules
//!
//! - [`registry`] - `RoomRegistry` that creates, indexes and removes rooms
//! - [`room`] - `RoomActor` per active room, transport/producer/consumer orchestration
//! - [`messages`] - Message types and read models
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod messages;
pub mod metrics;
pub mod registry;
pub mod room;

// Re-export primary types
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use registry::{RegistrySettings, RoomRegistry, RoomRegistryHandle};
pub use room::{RoomActor, RoomActorHandle};
