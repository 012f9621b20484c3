//! `LocalEngine` - in-process media engine.
//!
//! Tracks the router/transport/producer/consumer graph, negotiates codecs and
//! hands out ICE/DTLS parameters from the configured announced IP and RTC port
//! range. Packet forwarding itself is not performed here.

use super::capabilities::{
    consumable_codecs, default_media_codecs, router_capabilities, validate_rtp_parameters,
};
use super::{
    ConsumerParameters, DtlsFingerprint, DtlsParameters, DtlsRole, EngineError, IceCandidate,
    IceParameters, MediaEngine, ProducerType, RtpCapabilities, RtpCodecCapability,
    RtpEncodingParameters, RtpParameters, TransportOptions,
};
use async_trait::async_trait;
use common::types::{MediaKind, TransportDirection};
use ring::rand::{SecureRandom, SystemRandom};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info};

/// Fingerprint algorithm advertised by local transports.
const FINGERPRINT_ALGORITHM: &str = "sha-256";

/// Priority of the single host candidate.
const HOST_CANDIDATE_PRIORITY: u32 = 1_076_302_079;

/// Settings for [`LocalEngine`].
#[derive(Debug, Clone)]
pub struct LocalEngineSettings {
    /// IP announced in ICE candidates.
    pub announced_ip: String,
    /// First RTC port (inclusive).
    pub rtc_min_port: u16,
    /// Last RTC port (inclusive).
    pub rtc_max_port: u16,
    /// Codecs each router is created with.
    pub media_codecs: Vec<RtpCodecCapability>,
}

impl Default for LocalEngineSettings {
    fn default() -> Self {
        Self {
            announced_ip: "127.0.0.1".to_string(),
            rtc_min_port: 40_000,
            rtc_max_port: 49_999,
            media_codecs: default_media_codecs(),
        }
    }
}

#[derive(Debug)]
struct LocalTransport {
    room_id: String,
    direction: TransportDirection,
    port: u16,
    connected: bool,
}

#[derive(Debug)]
struct LocalProducer {
    transport_id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    producer_type: ProducerType,
    paused: bool,
}

#[derive(Debug)]
struct LocalConsumer {
    transport_id: String,
    producer_id: String,
    paused: bool,
}

#[derive(Debug, Default)]
struct LocalState {
    routers: HashMap<String, RtpCapabilities>,
    transports: HashMap<String, LocalTransport>,
    producers: HashMap<String, LocalProducer>,
    consumers: HashMap<String, LocalConsumer>,
    next_port: u16,
}

impl LocalState {
    fn remove_consumers_where(&mut self, pred: impl Fn(&LocalConsumer) -> bool) {
        self.consumers.retain(|_, c| !pred(c));
    }

    fn remove_producer(&mut self, producer_id: &str) {
        if self.producers.remove(producer_id).is_some() {
            self.remove_consumers_where(|c| c.producer_id == producer_id);
        }
    }

    fn remove_transport(&mut self, transport_id: &str) {
        if self.transports.remove(transport_id).is_none() {
            return;
        }
        let producer_ids: Vec<String> = self
            .producers
            .iter()
            .filter(|(_, p)| p.transport_id == transport_id)
            .map(|(id, _)| id.clone())
            .collect();
        for producer_id in producer_ids {
            self.remove_producer(&producer_id);
        }
        self.remove_consumers_where(|c| c.transport_id == transport_id);
    }
}

/// In-process [`MediaEngine`].
#[derive(Debug)]
pub struct LocalEngine {
    settings: LocalEngineSettings,
    state: Mutex<LocalState>,
}

impl LocalEngine {
    /// Create an engine with the given settings.
    #[must_use]
    pub fn new(settings: LocalEngineSettings) -> Self {
        let state = LocalState {
            next_port: settings.rtc_min_port,
            ..LocalState::default()
        };
        Self {
            settings,
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live transports, producers and consumers.
    #[must_use]
    pub fn resource_counts(&self) -> (usize, usize, usize) {
        let state = self.state();
        (
            state.transports.len(),
            state.producers.len(),
            state.consumers.len(),
        )
    }

    /// Paused flag of a producer, `None` if unknown.
    #[must_use]
    pub fn producer_paused(&self, producer_id: &str) -> Option<bool> {
        self.state().producers.get(producer_id).map(|p| p.paused)
    }

    /// Paused flag of a consumer, `None` if unknown.
    #[must_use]
    pub fn consumer_paused(&self, consumer_id: &str) -> Option<bool> {
        self.state().consumers.get(consumer_id).map(|c| c.paused)
    }

    fn allocate_port(&self, state: &mut LocalState) -> Result<u16, EngineError> {
        let min = self.settings.rtc_min_port;
        let max = self.settings.rtc_max_port;
        let in_use: HashSet<u16> = state.transports.values().map(|t| t.port).collect();
        let range_len = u32::from(max.saturating_sub(min)) + 1;

        let mut candidate = state.next_port.clamp(min, max);
        for _ in 0..range_len {
            let next = if candidate >= max { min } else { candidate + 1 };
            if !in_use.contains(&candidate) {
                state.next_port = next;
                return Ok(candidate);
            }
            candidate = next;
        }

        Err(EngineError::ResourceExhausted(format!(
            "no free RTC port in {min}-{max}"
        )))
    }
}

impl Default for LocalEngine {
    fn default() -> Self {
        Self::new(LocalEngineSettings::default())
    }
}

fn random_bytes<const N: usize>() -> Result<[u8; N], EngineError> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; N];
    rng.fill(&mut bytes).map_err(|_| {
        error!(target: "sfu.engine", "Failed to generate random bytes");
        EngineError::Failure("failed to generate random bytes".to_string())
    })?;
    Ok(bytes)
}

/// Lowercase hex token of `2 * N` characters.
fn random_token<const N: usize>() -> Result<String, EngineError> {
    random_bytes::<N>().map(hex::encode)
}

/// SHA-256 sized fingerprint in the colon-separated uppercase form.
fn random_fingerprint() -> Result<String, EngineError> {
    Ok(random_bytes::<32>()?
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":"))
}

fn random_ssrc() -> Result<u32, EngineError> {
    random_bytes::<4>().map(u32::from_be_bytes)
}

fn producer_type_of(rtp_parameters: &RtpParameters) -> ProducerType {
    if rtp_parameters.encodings.len() > 1 {
        return ProducerType::Simulcast;
    }
    let layered = rtp_parameters
        .encodings
        .first()
        .and_then(|e| e.scalability_mode.as_deref())
        .is_some_and(|mode| !mode.starts_with("L1T"));
    if layered {
        ProducerType::Svc
    } else {
        ProducerType::Simple
    }
}

#[async_trait]
impl MediaEngine for LocalEngine {
    async fn create_router(&self, room_id: &str) -> Result<RtpCapabilities, EngineError> {
        let mut state = self.state();
        if let Some(existing) = state.routers.get(room_id) {
            return Ok(existing.clone());
        }
        let capabilities = router_capabilities(&self.settings.media_codecs)?;
        state
            .routers
            .insert(room_id.to_string(), capabilities.clone());

        info!(
            target: "sfu.engine",
            room_id = %room_id,
            codecs = capabilities.codecs.len(),
            "Router created"
        );
        Ok(capabilities)
    }

    fn close_router(&self, room_id: &str) {
        let mut state = self.state();
        if state.routers.remove(room_id).is_none() {
            return;
        }
        let transport_ids: Vec<String> = state
            .transports
            .iter()
            .filter(|(_, t)| t.room_id == room_id)
            .map(|(id, _)| id.clone())
            .collect();
        for transport_id in &transport_ids {
            state.remove_transport(transport_id);
        }

        info!(
            target: "sfu.engine",
            room_id = %room_id,
            transports_closed = transport_ids.len(),
            "Router closed"
        );
    }

    async fn create_transport(
        &self,
        room_id: &str,
        transport_id: &str,
        direction: TransportDirection,
    ) -> Result<TransportOptions, EngineError> {
        let ice_parameters = IceParameters {
            username_fragment: random_token::<8>()?,
            password: random_token::<16>()?,
            ice_lite: true,
        };
        let fingerprint = random_fingerprint()?;

        let mut state = self.state();
        if !state.routers.contains_key(room_id) {
            return Err(EngineError::RouterNotFound(room_id.to_string()));
        }
        if state.transports.contains_key(transport_id) {
            return Err(EngineError::InvalidState(format!(
                "transport {transport_id} already exists"
            )));
        }

        let port = self.allocate_port(&mut state)?;
        state.transports.insert(
            transport_id.to_string(),
            LocalTransport {
                room_id: room_id.to_string(),
                direction,
                port,
                connected: false,
            },
        );

        debug!(
            target: "sfu.engine",
            room_id = %room_id,
            transport_id = %transport_id,
            direction = direction.as_str(),
            port = port,
            "Transport created"
        );

        Ok(TransportOptions {
            id: transport_id.to_string(),
            ice_parameters,
            ice_candidates: vec![IceCandidate {
                foundation: "udpcandidate".to_string(),
                priority: HOST_CANDIDATE_PRIORITY,
                ip: self.settings.announced_ip.clone(),
                protocol: "udp".to_string(),
                port,
                candidate_type: "host".to_string(),
            }],
            dtls_parameters: DtlsParameters {
                role: DtlsRole::Auto,
                fingerprints: vec![DtlsFingerprint {
                    algorithm: FINGERPRINT_ALGORITHM.to_string(),
                    value: fingerprint,
                }],
            },
        })
    }

    async fn connect_transport(
        &self,
        transport_id: &str,
        dtls_parameters: &DtlsParameters,
    ) -> Result<(), EngineError> {
        if dtls_parameters.fingerprints.is_empty() {
            return Err(EngineError::InvalidParameters(
                "dtls parameters carry no fingerprints".to_string(),
            ));
        }
        if dtls_parameters
            .fingerprints
            .iter()
            .any(|f| f.algorithm.is_empty() || f.value.is_empty())
        {
            return Err(EngineError::InvalidParameters(
                "dtls fingerprint is incomplete".to_string(),
            ));
        }

        let mut state = self.state();
        let transport = state
            .transports
            .get_mut(transport_id)
            .ok_or_else(|| EngineError::TransportNotFound(transport_id.to_string()))?;
        if transport.connected {
            return Err(EngineError::InvalidState(format!(
                "transport {transport_id} already connected"
            )));
        }
        transport.connected = true;

        debug!(target: "sfu.engine", transport_id = %transport_id, "Transport connected");
        Ok(())
    }

    async fn produce(
        &self,
        transport_id: &str,
        producer_id: &str,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> Result<ProducerType, EngineError> {
        let mut state = self.state();
        let transport = state
            .transports
            .get(transport_id)
            .ok_or_else(|| EngineError::TransportNotFound(transport_id.to_string()))?;
        if transport.direction != TransportDirection::Send {
            return Err(EngineError::InvalidState(format!(
                "transport {transport_id} is not a send transport"
            )));
        }
        let router = state
            .routers
            .get(&transport.room_id)
            .ok_or_else(|| EngineError::RouterNotFound(transport.room_id.clone()))?;
        validate_rtp_parameters(router, kind, rtp_parameters)?;

        let producer_type = producer_type_of(rtp_parameters);
        state.producers.insert(
            producer_id.to_string(),
            LocalProducer {
                transport_id: transport_id.to_string(),
                kind,
                rtp_parameters: rtp_parameters.clone(),
                producer_type,
                paused: false,
            },
        );

        debug!(
            target: "sfu.engine",
            transport_id = %transport_id,
            producer_id = %producer_id,
            kind = kind.as_str(),
            producer_type = producer_type.as_str(),
            "Producer created"
        );
        Ok(producer_type)
    }

    async fn consume(
        &self,
        transport_id: &str,
        consumer_id: &str,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<ConsumerParameters, EngineError> {
        let mut state = self.state();
        let transport = state
            .transports
            .get(transport_id)
            .ok_or_else(|| EngineError::TransportNotFound(transport_id.to_string()))?;
        if transport.direction != TransportDirection::Recv {
            return Err(EngineError::InvalidState(format!(
                "transport {transport_id} is not a receive transport"
            )));
        }
        let producer = state
            .producers
            .get(producer_id)
            .ok_or_else(|| EngineError::ProducerNotFound(producer_id.to_string()))?;

        let codecs = consumable_codecs(&producer.rtp_parameters, rtp_capabilities);
        if codecs.is_empty() {
            return Err(EngineError::UnsupportedCapabilities(format!(
                "cannot consume producer {producer_id} with the given capabilities"
            )));
        }

        let parameters = ConsumerParameters {
            kind: producer.kind,
            rtp_parameters: RtpParameters {
                mid: None,
                codecs,
                encodings: vec![RtpEncodingParameters {
                    ssrc: Some(random_ssrc()?),
                    ..RtpEncodingParameters::default()
                }],
            },
            producer_type: producer.producer_type,
        };

        state.consumers.insert(
            consumer_id.to_string(),
            LocalConsumer {
                transport_id: transport_id.to_string(),
                producer_id: producer_id.to_string(),
                paused: true,
            },
        );

        debug!(
            target: "sfu.engine",
            transport_id = %transport_id,
            consumer_id = %consumer_id,
            producer_id = %producer_id,
            "Consumer created"
        );
        Ok(parameters)
    }

    fn pause_producer(&self, producer_id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        let producer = state
            .producers
            .get_mut(producer_id)
            .ok_or_else(|| EngineError::ProducerNotFound(producer_id.to_string()))?;
        producer.paused = true;
        Ok(())
    }

    fn resume_producer(&self, producer_id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        let producer = state
            .producers
            .get_mut(producer_id)
            .ok_or_else(|| EngineError::ProducerNotFound(producer_id.to_string()))?;
        producer.paused = false;
        Ok(())
    }

    fn pause_consumer(&self, consumer_id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        let consumer = state
            .consumers
            .get_mut(consumer_id)
            .ok_or_else(|| EngineError::ConsumerNotFound(consumer_id.to_string()))?;
        consumer.paused = true;
        Ok(())
    }

    fn resume_consumer(&self, consumer_id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        let consumer = state
            .consumers
            .get_mut(consumer_id)
            .ok_or_else(|| EngineError::ConsumerNotFound(consumer_id.to_string()))?;
        consumer.paused = false;
        Ok(())
    }

    fn close_transport(&self, transport_id: &str) {
        self.state().remove_transport(transport_id);
    }

    fn close_producer(&self, producer_id: &str) {
        self.state().remove_producer(producer_id);
    }

    fn close_consumer(&self, consumer_id: &str) {
        self.state().consumers.remove(consumer_id);
    }
}
