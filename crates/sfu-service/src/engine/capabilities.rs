//! Codec capability negotiation.
//!
//! Codecs match on MIME type (case-insensitive), clock rate and channel count.
//! H264 additionally requires the same `packetization-mode`.

use super::{
    CodecParameters, EngineError, RtpCapabilities, RtpCodecCapability, RtpCodecParameters,
    RtpParameters,
};
use common::types::MediaKind;
use serde_json::json;

/// First dynamic RTP payload type handed out to router codecs.
const FIRST_DYNAMIC_PAYLOAD_TYPE: u8 = 100;

/// Codecs every room router is created with.
#[must_use]
pub fn default_media_codecs() -> Vec<RtpCodecCapability> {
    vec![
        RtpCodecCapability {
            kind: MediaKind::Audio,
            mime_type: "audio/opus".to_string(),
            preferred_payload_type: None,
            clock_rate: 48_000,
            channels: Some(2),
            parameters: CodecParameters::new(),
        },
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/VP8".to_string(),
            preferred_payload_type: None,
            clock_rate: 90_000,
            channels: None,
            parameters: CodecParameters::new(),
        },
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/H264".to_string(),
            preferred_payload_type: None,
            clock_rate: 90_000,
            channels: None,
            parameters: CodecParameters::from([
                ("packetization-mode".to_string(), json!(1)),
                ("profile-level-id".to_string(), json!("42e01f")),
            ]),
        },
    ]
}

/// Build router capabilities from the configured media codecs.
///
/// Codecs without a preferred payload type get consecutive dynamic ones.
///
/// # Errors
///
/// `InvalidParameters` if the list is empty, a MIME type does not match its
/// kind, or the dynamic payload range runs out.
pub fn router_capabilities(
    media_codecs: &[RtpCodecCapability],
) -> Result<RtpCapabilities, EngineError> {
    if media_codecs.is_empty() {
        return Err(EngineError::InvalidParameters(
            "router needs at least one media codec".to_string(),
        ));
    }

    let mut next_payload_type = FIRST_DYNAMIC_PAYLOAD_TYPE;
    let mut codecs = Vec::with_capacity(media_codecs.len());
    for codec in media_codecs {
        if kind_of_mime(&codec.mime_type) != Some(codec.kind) {
            return Err(EngineError::InvalidParameters(format!(
                "codec {} does not match kind {}",
                codec.mime_type, codec.kind
            )));
        }
        let payload_type = match codec.preferred_payload_type {
            Some(pt) => pt,
            None => {
                let pt = next_payload_type;
                next_payload_type = next_payload_type.checked_add(1).ok_or_else(|| {
                    EngineError::InvalidParameters("dynamic payload types exhausted".to_string())
                })?;
                pt
            }
        };
        codecs.push(RtpCodecCapability {
            preferred_payload_type: Some(payload_type),
            ..codec.clone()
        });
    }

    Ok(RtpCapabilities { codecs })
}

/// Media kind implied by a MIME type (`audio/...` or `video/...`).
#[must_use]
pub fn kind_of_mime(mime_type: &str) -> Option<MediaKind> {
    let (kind, _) = mime_type.split_once('/')?;
    match kind.to_ascii_lowercase().as_str() {
        "audio" => Some(MediaKind::Audio),
        "video" => Some(MediaKind::Video),
        _ => None,
    }
}

fn packetization_mode(parameters: &CodecParameters) -> u64 {
    parameters
        .get("packetization-mode")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0)
}

fn is_h264(mime_type: &str) -> bool {
    mime_type.eq_ignore_ascii_case("video/H264")
}

/// The fields two codec descriptions are compared on.
struct CodecKey<'a> {
    mime_type: &'a str,
    clock_rate: u32,
    channels: Option<u8>,
    parameters: &'a CodecParameters,
}

impl<'a> From<&'a RtpCodecCapability> for CodecKey<'a> {
    fn from(codec: &'a RtpCodecCapability) -> Self {
        Self {
            mime_type: &codec.mime_type,
            clock_rate: codec.clock_rate,
            channels: codec.channels,
            parameters: &codec.parameters,
        }
    }
}

impl<'a> From<&'a RtpCodecParameters> for CodecKey<'a> {
    fn from(codec: &'a RtpCodecParameters) -> Self {
        Self {
            mime_type: &codec.mime_type,
            clock_rate: codec.clock_rate,
            channels: codec.channels,
            parameters: &codec.parameters,
        }
    }
}

impl CodecKey<'_> {
    fn matches(&self, other: &CodecKey<'_>) -> bool {
        if !self.mime_type.eq_ignore_ascii_case(other.mime_type)
            || self.clock_rate != other.clock_rate
        {
            return false;
        }
        // Missing channel count means mono
        if self.channels.unwrap_or(1) != other.channels.unwrap_or(1) {
            return false;
        }
        if is_h264(self.mime_type)
            && packetization_mode(self.parameters) != packetization_mode(other.parameters)
        {
            return false;
        }
        true
    }
}

/// Whether two capability entries describe the same codec.
#[must_use]
pub fn capability_matches(a: &RtpCodecCapability, b: &RtpCodecCapability) -> bool {
    a.kind == b.kind && CodecKey::from(a).matches(&CodecKey::from(b))
}

/// Whether a codec in use is covered by a capability entry.
#[must_use]
pub fn parameters_match(codec: &RtpCodecParameters, capability: &RtpCodecCapability) -> bool {
    CodecKey::from(codec).matches(&CodecKey::from(capability))
}

/// Codecs present in both capability sets, in the order of `router`.
#[must_use]
pub fn intersect(router: &RtpCapabilities, endpoint: &RtpCapabilities) -> RtpCapabilities {
    RtpCapabilities {
        codecs: router
            .codecs
            .iter()
            .filter(|r| endpoint.codecs.iter().any(|e| capability_matches(r, e)))
            .cloned()
            .collect(),
    }
}

/// Check that a producer's RTP parameters can be routed by `router`.
///
/// # Errors
///
/// `InvalidParameters` when there are no codecs or encodings or a codec has the
/// wrong kind. `UnsupportedCapabilities` when the router lacks a codec.
pub fn validate_rtp_parameters(
    router: &RtpCapabilities,
    kind: MediaKind,
    rtp_parameters: &RtpParameters,
) -> Result<(), EngineError> {
    if rtp_parameters.codecs.is_empty() {
        return Err(EngineError::InvalidParameters(
            "rtp parameters carry no codecs".to_string(),
        ));
    }
    if rtp_parameters.encodings.is_empty() {
        return Err(EngineError::InvalidParameters(
            "rtp parameters carry no encodings".to_string(),
        ));
    }
    for codec in &rtp_parameters.codecs {
        if kind_of_mime(&codec.mime_type) != Some(kind) {
            return Err(EngineError::InvalidParameters(format!(
                "codec {} does not match kind {kind}",
                codec.mime_type
            )));
        }
        if !router.codecs.iter().any(|c| parameters_match(codec, c)) {
            return Err(EngineError::UnsupportedCapabilities(format!(
                "codec {} is not supported by the router",
                codec.mime_type
            )));
        }
    }
    Ok(())
}

/// Producer codecs that an endpoint with `capabilities` can receive.
#[must_use]
pub fn consumable_codecs(
    producer: &RtpParameters,
    capabilities: &RtpCapabilities,
) -> Vec<RtpCodecParameters> {
    producer
        .codecs
        .iter()
        .filter(|codec| capabilities.codecs.iter().any(|c| parameters_match(codec, c)))
        .cloned()
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::engine::RtpEncodingParameters;

    fn opus_params() -> RtpParameters {
        RtpParameters {
            mid: Some("0".to_string()),
            codecs: vec![RtpCodecParameters {
                mime_type: "audio/opus".to_string(),
                payload_type: 100,
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

    #[test]
    fn test_router_capabilities_assign_dynamic_payload_types() {
        let caps = router_capabilities(&default_media_codecs()).unwrap();

        let payload_types: Vec<u8> = caps
            .codecs
            .iter()
            .map(|c| c.preferred_payload_type.unwrap())
            .collect();
        assert_eq!(payload_types, vec![100, 101, 102]);
    }

    #[test]
    fn test_router_capabilities_reject_empty_and_mismatched() {
        assert!(router_capabilities(&[]).is_err());

        let mut codecs = default_media_codecs();
        codecs[0].kind = MediaKind::Video;
        assert!(matches!(
            router_capabilities(&codecs),
            Err(EngineError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_kind_of_mime() {
        assert_eq!(kind_of_mime("audio/opus"), Some(MediaKind::Audio));
        assert_eq!(kind_of_mime("VIDEO/vp8"), Some(MediaKind::Video));
        assert_eq!(kind_of_mime("application/data"), None);
        assert_eq!(kind_of_mime("opus"), None);
    }

    #[test]
    fn test_intersect_keeps_router_order_and_ignores_case() {
        let router = router_capabilities(&default_media_codecs()).unwrap();
        let endpoint = RtpCapabilities {
            codecs: vec![RtpCodecCapability {
                mime_type: "video/vp8".to_string(),
                ..default_media_codecs()[1].clone()
            }],
        };

        let common = intersect(&router, &endpoint);

        assert_eq!(common.codecs.len(), 1);
        assert_eq!(common.codecs[0].mime_type, "video/VP8");
    }

    #[test]
    fn test_h264_requires_same_packetization_mode() {
        let h264 = default_media_codecs()[2].clone();
        let mut other = h264.clone();
        other
            .parameters
            .insert("packetization-mode".to_string(), json!(0));

        assert!(capability_matches(&h264, &h264));
        assert!(!capability_matches(&h264, &other));
    }

    #[test]
    fn test_validate_rtp_parameters() {
        let router = router_capabilities(&default_media_codecs()).unwrap();

        assert!(validate_rtp_parameters(&router, MediaKind::Audio, &opus_params()).is_ok());
        assert!(matches!(
            validate_rtp_parameters(&router, MediaKind::Video, &opus_params()),
            Err(EngineError::InvalidParameters(_))
        ));
        assert!(validate_rtp_parameters(
            &router,
            MediaKind::Audio,
            &RtpParameters::default()
        )
        .is_err());
    }

    #[test]
    fn test_consumable_codecs_empty_on_disjoint_capabilities() {
        let video_only = RtpCapabilities {
            codecs: vec![default_media_codecs()[1].clone()],
        };
        let audio_only = RtpCapabilities {
            codecs: vec![default_media_codecs()[0].clone()],
        };

        assert!(consumable_codecs(&opus_params(), &video_only).is_empty());
        assert_eq!(consumable_codecs(&opus_params(), &audio_only).len(), 1);
    }
}
