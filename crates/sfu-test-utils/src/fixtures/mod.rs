//! Pre-built capabilities and parameters for SFU tests.
//!
//! Values line up with the codecs the default engine settings route (Opus,
//! VP8, H264), so they can be passed straight to produce and consume calls.

use common::types::MediaKind;
use sfu_service::engine::capabilities::default_media_codecs;
use sfu_service::engine::{
    CodecParameters, DtlsFingerprint, DtlsParameters, DtlsRole, RtpCapabilities,
    RtpCodecParameters, RtpEncodingParameters, RtpParameters,
};

/// Capabilities of a client that can receive every default codec.
#[must_use]
pub fn client_capabilities() -> RtpCapabilities {
    RtpCapabilities {
        codecs: default_media_codecs(),
    }
}

/// Capabilities of a client that only receives audio.
#[must_use]
pub fn audio_only_capabilities() -> RtpCapabilities {
    capabilities_of(MediaKind::Audio)
}

/// Capabilities of a client that only receives video.
#[must_use]
pub fn video_only_capabilities() -> RtpCapabilities {
    capabilities_of(MediaKind::Video)
}

fn capabilities_of(kind: MediaKind) -> RtpCapabilities {
    RtpCapabilities {
        codecs: default_media_codecs()
            .into_iter()
            .filter(|codec| codec.kind == kind)
            .collect(),
    }
}

/// Client DTLS parameters with one SHA-256 fingerprint.
#[must_use]
pub fn dtls_parameters() -> DtlsParameters {
    DtlsParameters {
        role: DtlsRole::Client,
        fingerprints: vec![DtlsFingerprint {
            algorithm: "sha-256".to_string(),
            value: "AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89".to_string(),
        }],
    }
}

/// DTLS parameters the engine refuses (no fingerprints).
#[must_use]
pub fn invalid_dtls_parameters() -> DtlsParameters {
    DtlsParameters {
        role: DtlsRole::Client,
        fingerprints: Vec::new(),
    }
}

/// Single-stream Opus track.
#[must_use]
pub fn opus_rtp_parameters() -> RtpParameters {
    RtpParameters {
        mid: Some("0".to_string()),
        codecs: vec![RtpCodecParameters {
            mime_type: "audio/opus".to_string(),
            payload_type: 111,
            clock_rate: 48_000,
            channels: Some(2),
            parameters: CodecParameters::new(),
        }],
        encodings: vec![RtpEncodingParameters {
            ssrc: Some(1111),
            ..RtpEncodingParameters::default()
        }],
    }
}

/// Single-stream VP8 track.
#[must_use]
pub fn vp8_rtp_parameters() -> RtpParameters {
    RtpParameters {
        mid: Some("1".to_string()),
        codecs: vec![vp8_codec()],
        encodings: vec![RtpEncodingParameters {
            ssrc: Some(2222),
            ..RtpEncodingParameters::default()
        }],
    }
}

/// VP8 track with three simulcast layers.
#[must_use]
pub fn vp8_simulcast_rtp_parameters() -> RtpParameters {
    RtpParameters {
        mid: Some("2".to_string()),
        codecs: vec![vp8_codec()],
        encodings: ["q", "h", "f"]
            .into_iter()
            .map(|rid| RtpEncodingParameters {
                rid: Some(rid.to_string()),
                ..RtpEncodingParameters::default()
            })
            .collect(),
    }
}

fn vp8_codec() -> RtpCodecParameters {
    RtpCodecParameters {
        mime_type: "video/VP8".to_string(),
        payload_type: 96,
        clock_rate: 90_000,
        channels: None,
        parameters: CodecParameters::new(),
    }
}
