//! Media engine seam.
//!
//! The engine owns the actual RTP routers, WebRTC transports, producers and
//! consumers. Room actors drive it through the [`MediaEngine`] trait and never
//! hold engine state themselves, so tests can substitute a mock engine and
//! production can run the in-process [`LocalEngine`].
//!
//! # Identifiers
//!
//! Transport, producer and consumer ids are allocated by the caller before the
//! engine call. A call that times out can therefore always be followed by an
//! explicit `close_*` on the id it would have created.
//!
//! # Close semantics
//!
//! `close_*` methods are synchronous, infallible and idempotent. Closing an id
//! the engine does not know is a no-op.

pub mod capabilities;
pub mod local;

pub use local::{LocalEngine, LocalEngineSettings};

use async_trait::async_trait;
use common::types::{MediaKind, TransportDirection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Codec parameters (`fmtp` style key/value pairs).
pub type CodecParameters = BTreeMap<String, serde_json::Value>;

/// A codec a router or endpoint is able to send or receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_payload_type: Option<u8>,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: CodecParameters,
}

/// Set of codecs supported by a router or an endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RtpCapabilities {
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,
}

/// A codec actually used by a producer or consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtpCodecParameters {
    pub mime_type: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: CodecParameters,
}

/// One RTP encoding (one simulcast layer, or the single stream).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RtpEncodingParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssrc: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalability_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
}

/// RTP parameters of a produced or consumed stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RtpParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    #[serde(default)]
    pub codecs: Vec<RtpCodecParameters>,
    #[serde(default)]
    pub encodings: Vec<RtpEncodingParameters>,
}

/// DTLS role negotiated during the transport handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsRole {
    #[default]
    Auto,
    Client,
    Server,
}

/// DTLS certificate fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

/// DTLS parameters exchanged to complete a transport handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsParameters {
    #[serde(default)]
    pub role: DtlsRole,
    pub fingerprints: Vec<DtlsFingerprint>,
}

/// ICE credentials of a server-side transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    pub ice_lite: bool,
}

/// ICE candidate of a server-side transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub foundation: String,
    pub priority: u32,
    pub ip: String,
    pub protocol: String,
    pub port: u16,
    #[serde(rename = "type")]
    pub candidate_type: String,
}

/// Everything a client needs to create its side of a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportOptions {
    pub id: String,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
}

/// Layering of a producer's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerType {
    Simple,
    Simulcast,
    Svc,
}

impl ProducerType {
    /// Bounded label for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProducerType::Simple => "simple",
            ProducerType::Simulcast => "simulcast",
            ProducerType::Svc => "svc",
        }
    }
}

/// What the engine returns for a newly created consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerParameters {
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub producer_type: ProducerType,
}

/// Errors reported by a media engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// No codec in common between the producer and the consuming endpoint.
    #[error("Unsupported capabilities: {0}")]
    UnsupportedCapabilities(String),

    #[error("Router not found: {0}")]
    RouterNotFound(String),

    #[error("Transport not found: {0}")]
    TransportNotFound(String),

    #[error("Producer not found: {0}")]
    ProducerNotFound(String),

    #[error("Consumer not found: {0}")]
    ConsumerNotFound(String),

    /// Malformed DTLS or RTP parameters.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// The resource exists but cannot accept the call in its current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Ports or other finite resources are exhausted.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Engine failure: {0}")]
    Failure(String),
}

/// Operations the orchestrator needs from a media engine.
///
/// Async methods may take arbitrarily long; callers apply their own timeouts.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create the router for a room and return its negotiated capabilities.
    async fn create_router(&self, room_id: &str) -> Result<RtpCapabilities, EngineError>;

    /// Close a router and everything created on it.
    fn close_router(&self, room_id: &str);

    /// Create a WebRTC transport on a room's router.
    async fn create_transport(
        &self,
        room_id: &str,
        transport_id: &str,
        direction: TransportDirection,
    ) -> Result<TransportOptions, EngineError>;

    /// Complete the DTLS handshake of a transport.
    async fn connect_transport(
        &self,
        transport_id: &str,
        dtls_parameters: &DtlsParameters,
    ) -> Result<(), EngineError>;

    /// Start receiving a client's track on a send transport.
    async fn produce(
        &self,
        transport_id: &str,
        producer_id: &str,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> Result<ProducerType, EngineError>;

    /// Forward a producer's track to a client over a receive transport.
    ///
    /// Fails with [`EngineError::UnsupportedCapabilities`] when the producer's
    /// codecs and `rtp_capabilities` have nothing in common. Nothing is created
    /// in that case.
    async fn consume(
        &self,
        transport_id: &str,
        consumer_id: &str,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<ConsumerParameters, EngineError>;

    fn pause_producer(&self, producer_id: &str) -> Result<(), EngineError>;

    fn resume_producer(&self, producer_id: &str) -> Result<(), EngineError>;

    fn pause_consumer(&self, consumer_id: &str) -> Result<(), EngineError>;

    fn resume_consumer(&self, consumer_id: &str) -> Result<(), EngineError>;

    /// Close a transport and the producers/consumers bound to it.
    fn close_transport(&self, transport_id: &str);

    /// Close a producer and the consumers of it.
    fn close_producer(&self, producer_id: &str);

    fn close_consumer(&self, consumer_id: &str);
}
