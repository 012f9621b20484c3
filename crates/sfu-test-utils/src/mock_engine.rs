//! Mock media engine for SFU testing.
//!
//! Wraps a real [`LocalEngine`] so resource bookkeeping stays consistent, and
//! can be configured to:
//! - Fail, delay or hang specific operations
//! - Reject every consume as unsupported
//! - Count calls and closes per operation
//!
//! # Example
//!
//! ```rust,ignore
//! use sfu_test_utils::{EngineOp, MockEngine};
//!
//! let engine = MockEngine::builder()
//!     .hang(EngineOp::CreateTransport)
//!     .build();
//!
//! // Hand Arc::new(engine) to RoomRegistryHandle::new...
//! ```

use async_trait::async_trait;
use common::types::{MediaKind, TransportDirection};
use sfu_service::engine::{
    ConsumerParameters, DtlsParameters, EngineError, LocalEngine, MediaEngine, ProducerType,
    RtpCapabilities, RtpParameters, TransportOptions,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Engine operations a fault can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    CreateRouter,
    CreateTransport,
    ConnectTransport,
    Produce,
    Consume,
}

/// Close operations counted by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseOp {
    Router,
    Transport,
    Producer,
    Consumer,
}

#[derive(Debug, Clone)]
enum Fault {
    Fail(EngineError),
    Delay(Duration),
    Hang,
}

#[derive(Debug, Default)]
struct Recorder {
    calls: HashMap<EngineOp, usize>,
    closed: HashMap<CloseOp, Vec<String>>,
}

/// Mock media engine for testing room orchestration.
#[derive(Debug)]
pub struct MockEngine {
    inner: LocalEngine,
    faults: HashMap<EngineOp, Fault>,
    reject_capabilities: bool,
    recorder: Mutex<Recorder>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MockEngine {
    /// Create a new MockEngine builder.
    #[must_use]
    pub fn builder() -> MockEngineBuilder {
        MockEngineBuilder::default()
    }

    /// Number of times `op` was invoked, including failed and hung calls.
    #[must_use]
    pub fn call_count(&self, op: EngineOp) -> usize {
        self.recorder().calls.get(&op).copied().unwrap_or(0)
    }

    /// Ids closed through `op`, in call order.
    #[must_use]
    pub fn closed(&self, op: CloseOp) -> Vec<String> {
        self.recorder().closed.get(&op).cloned().unwrap_or_default()
    }

    /// Whether `id` was closed through `op`.
    #[must_use]
    pub fn was_closed(&self, op: CloseOp, id: &str) -> bool {
        self.recorder()
            .closed
            .get(&op)
            .is_some_and(|ids| ids.iter().any(|closed| closed == id))
    }

    /// Live (transports, producers, consumers) held by the wrapped engine.
    #[must_use]
    pub fn resource_counts(&self) -> (usize, usize, usize) {
        self.inner.resource_counts()
    }

    #[must_use]
    pub fn producer_paused(&self, producer_id: &str) -> Option<bool> {
        self.inner.producer_paused(producer_id)
    }

    #[must_use]
    pub fn consumer_paused(&self, consumer_id: &str) -> Option<bool> {
        self.inner.consumer_paused(consumer_id)
    }

    fn recorder(&self) -> MutexGuard<'_, Recorder> {
        self.recorder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call and apply any configured fault.
    async fn enter(&self, op: EngineOp) -> Result<(), EngineError> {
        *self.recorder().calls.entry(op).or_insert(0) += 1;
        match self.faults.get(&op) {
            Some(Fault::Fail(err)) => Err(err.clone()),
            Some(Fault::Delay(delay)) => {
                tokio::time::sleep(*delay).await;
                Ok(())
            }
            Some(Fault::Hang) => std::future::pending().await,
            None => Ok(()),
        }
    }

    fn record_close(&self, op: CloseOp, id: &str) {
        self.recorder()
            .closed
            .entry(op)
            .or_default()
            .push(id.to_string());
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn create_router(&self, room_id: &str) -> Result<RtpCapabilities, EngineError> {
        self.enter(EngineOp::CreateRouter).await?;
        self.inner.create_router(room_id).await
    }

    fn close_router(&self, room_id: &str) {
        self.record_close(CloseOp::Router, room_id);
        self.inner.close_router(room_id);
    }

    async fn create_transport(
        &self,
        room_id: &str,
        transport_id: &str,
        direction: TransportDirection,
    ) -> Result<TransportOptions, EngineError> {
        self.enter(EngineOp::CreateTransport).await?;
        self.inner
            .create_transport(room_id, transport_id, direction)
            .await
    }

    async fn connect_transport(
        &self,
        transport_id: &str,
        dtls_parameters: &DtlsParameters,
    ) -> Result<(), EngineError> {
        self.enter(EngineOp::ConnectTransport).await?;
        self.inner
            .connect_transport(transport_id, dtls_parameters)
            .await
    }

    async fn produce(
        &self,
        transport_id: &str,
        producer_id: &str,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> Result<ProducerType, EngineError> {
        self.enter(EngineOp::Produce).await?;
        self.inner
            .produce(transport_id, producer_id, kind, rtp_parameters)
            .await
    }

    async fn consume(
        &self,
        transport_id: &str,
        consumer_id: &str,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<ConsumerParameters, EngineError> {
        self.enter(EngineOp::Consume).await?;
        if self.reject_capabilities {
            return Err(EngineError::UnsupportedCapabilities(format!(
                "mock rejects consumer of {producer_id}"
            )));
        }
        self.inner
            .consume(transport_id, consumer_id, producer_id, rtp_capabilities)
            .await
    }

    fn pause_producer(&self, producer_id: &str) -> Result<(), EngineError> {
        self.inner.pause_producer(producer_id)
    }

    fn resume_producer(&self, producer_id: &str) -> Result<(), EngineError> {
        self.inner.resume_producer(producer_id)
    }

    fn pause_consumer(&self, consumer_id: &str) -> Result<(), EngineError> {
        self.inner.pause_consumer(consumer_id)
    }

    fn resume_consumer(&self, consumer_id: &str) -> Result<(), EngineError> {
        self.inner.resume_consumer(consumer_id)
    }

    fn close_transport(&self, transport_id: &str) {
        self.record_close(CloseOp::Transport, transport_id);
        self.inner.close_transport(transport_id);
    }

    fn close_producer(&self, producer_id: &str) {
        self.record_close(CloseOp::Producer, producer_id);
        self.inner.close_producer(producer_id);
    }

    fn close_consumer(&self, consumer_id: &str) {
        self.record_close(CloseOp::Consumer, consumer_id);
        self.inner.close_consumer(consumer_id);
    }
}

/// Builder for MockEngine configuration.
#[derive(Debug, Default)]
pub struct MockEngineBuilder {
    faults: HashMap<EngineOp, Fault>,
    reject_capabilities: bool,
}

impl MockEngineBuilder {
    /// Make `op` fail with `error`.
    #[must_use]
    pub fn fail(mut self, op: EngineOp, error: EngineError) -> Self {
        self.faults.insert(op, Fault::Fail(error));
        self
    }

    /// Make `op` succeed only after `delay`.
    #[must_use]
    pub fn delay(mut self, op: EngineOp, delay: Duration) -> Self {
        self.faults.insert(op, Fault::Delay(delay));
        self
    }

    /// Make `op` never complete.
    #[must_use]
    pub fn hang(mut self, op: EngineOp) -> Self {
        self.faults.insert(op, Fault::Hang);
        self
    }

    /// Fail every consume with `UnsupportedCapabilities`.
    #[must_use]
    pub fn reject_capabilities(mut self) -> Self {
        self.reject_capabilities = true;
        self
    }

    /// Build the MockEngine.
    #[must_use]
    pub fn build(self) -> MockEngine {
        MockEngine {
            inner: LocalEngine::default(),
            faults: self.faults,
            reject_capabilities: self.reject_capabilities,
            recorder: Mutex::new(Recorder::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::dtls_parameters;

    #[tokio::test]
    async fn test_mock_engine_counts_calls_and_closes() {
        let engine = MockEngine::default();
        engine.create_router("r1").await.unwrap();
        engine
            .create_transport("r1", "t1", TransportDirection::Send)
            .await
            .unwrap();
        engine.close_transport("t1");
        engine.close_transport("t1");

        assert_eq!(engine.call_count(EngineOp::CreateRouter), 1);
        assert_eq!(engine.call_count(EngineOp::CreateTransport), 1);
        assert_eq!(engine.closed(CloseOp::Transport), vec!["t1", "t1"]);
        assert!(engine.was_closed(CloseOp::Transport, "t1"));
        assert_eq!(engine.resource_counts(), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_mock_engine_fail() {
        let engine = MockEngine::builder()
            .fail(
                EngineOp::ConnectTransport,
                EngineError::Failure("dtls".to_string()),
            )
            .build();
        engine.create_router("r1").await.unwrap();
        engine
            .create_transport("r1", "t1", TransportDirection::Send)
            .await
            .unwrap();

        let result = engine.connect_transport("t1", &dtls_parameters()).await;
        assert_eq!(result, Err(EngineError::Failure("dtls".to_string())));
        assert_eq!(engine.call_count(EngineOp::ConnectTransport), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_engine_delay() {
        let engine = MockEngine::builder()
            .delay(EngineOp::CreateRouter, Duration::from_millis(200))
            .build();

        let early =
            tokio::time::timeout(Duration::from_millis(50), engine.create_router("r1")).await;
        assert!(early.is_err());

        let late =
            tokio::time::timeout(Duration::from_millis(500), engine.create_router("r1")).await;
        assert!(matches!(late, Ok(Ok(_))));
        assert_eq!(engine.call_count(EngineOp::CreateRouter), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_engine_hang() {
        let engine = MockEngine::builder().hang(EngineOp::CreateRouter).build();

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            engine.create_router("r1"),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(engine.call_count(EngineOp::CreateRouter), 1);
    }
}
