//! # SFU Test Utilities
//!
//! Shared test utilities for the SFU service.
//!
//! ## Modules
//!
//! - `mock_engine` - Media engine with injectable failures, hangs and call counts
//! - `fixtures` - Capabilities, DTLS and RTP parameters for common codecs
//! - `server_harness` - `TestSfuServer` bound to a random local port
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sfu_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let engine = Arc::new(MockEngine::builder().reject_capabilities().build());
//!     let server = TestSfuServer::spawn_with_engine(engine.clone()).await.unwrap();
//!
//!     let caps = fixtures::client_capabilities();
//!     // Run your test...
//! }
//! ```

pub mod fixtures;
pub mod mock_engine;
pub mod server_harness;

pub use mock_engine::{CloseOp, EngineOp, MockEngine, MockEngineBuilder};
pub use server_harness::TestSfuServer;
