//! Parsing for the external flow-descriptor JSON document and the
//! per-domain `.options` document. The descriptor's full grammar is an
//! external collaborator; this crate only implements the subset a flow
//! needs to size and lay out its shared segment.

use mxl_clock::Rate;
use mxl_status::{MxlError, Result, StatusCode};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Video,
    Audio,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Geometry {
    Video { width: u32, height: u32, grain_count: u32 },
    Audio { channel_count: u32, buffer_length: u32, sample_size_bytes: u32 },
    Data { grain_count: u32 },
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlowDescriptor {
    pub id: Uuid,
    pub format: DataFormat,
    pub rate: RawRate,
    pub geometry: Geometry,
}

/// Wire shape of a rational rate in the descriptor JSON; validated into
/// an [`mxl_clock::Rate`] by [`parse_descriptor`].
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RawRate {
    pub numerator: u32,
    pub denominator: u32,
}

/// A validated, ready-to-use descriptor: [`FlowDescriptor`] with `rate`
/// promoted from its raw wire form to a checked [`Rate`].
#[derive(Debug, Clone)]
pub struct ValidatedDescriptor {
    pub id: Uuid,
    pub format: DataFormat,
    pub rate: Rate,
    pub geometry: Geometry,
}

pub fn parse_descriptor(json: &str) -> Result<ValidatedDescriptor> {
    let raw: FlowDescriptor = serde_json::from_str(json)?;
    let rate = Rate::new(raw.rate.numerator, raw.rate.denominator)?;
    match (raw.format, raw.geometry) {
        (DataFormat::Video, Geometry::Video { grain_count, .. }) => {
            check_nonzero(grain_count, "grain_count")?;
        }
        (DataFormat::Audio, Geometry::Audio { buffer_length, sample_size_bytes, .. }) => {
            check_nonzero(buffer_length, "buffer_length")?;
            check_nonzero(sample_size_bytes, "sample_size_bytes")?;
        }
        (DataFormat::Data, Geometry::Data { grain_count }) => {
            check_nonzero(grain_count, "grain_count")?;
        }
        _ => {
            return Err(MxlError::new(
                StatusCode::InvalidArg,
                "format and geometry kind disagree",
            ));
        }
    }
    Ok(ValidatedDescriptor { id: raw.id, format: raw.format, rate, geometry: raw.geometry })
}

fn check_nonzero(value: u32, field: &'static str) -> Result<()> {
    if value == 0 {
        return Err(MxlError::new(StatusCode::InvalidArg, format!("{field} must be nonzero")));
    }
    Ok(())
}

const DEFAULT_HISTORY_DURATION_NS: u64 = 100_000_000;
const MIN_HISTORY_DURATION_NS: u64 = 1_000_000;
const MAX_HISTORY_DURATION_NS: u64 = 60_000_000_000;

#[derive(Debug, Clone, Copy, Deserialize)]
struct RawDomainOptions {
    #[serde(rename = "urn:x-mxl:option:history_duration/v1.0", default)]
    history_duration_ns: Option<u64>,
}

/// Per-domain `.options` document. Unparsable or out-of-range values are
/// logged and silently replaced by the default, never propagated as an
/// error: a missing or malformed `.options` file must not prevent a
/// domain from being usable.
#[derive(Debug, Clone, Copy)]
pub struct DomainOptions {
    pub history_duration_ns: u64,
}

impl Default for DomainOptions {
    fn default() -> Self {
        Self { history_duration_ns: DEFAULT_HISTORY_DURATION_NS }
    }
}

impl DomainOptions {
    pub fn parse(json: &str) -> Self {
        let raw: RawDomainOptions = match serde_json::from_str(json) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::debug!(%err, "malformed .options document, using defaults");
                return Self::default();
            }
        };
        let history_duration_ns = match raw.history_duration_ns {
            Some(v) if (MIN_HISTORY_DURATION_NS..=MAX_HISTORY_DURATION_NS).contains(&v) => v,
            Some(v) => {
                tracing::debug!(value = v, "history_duration_ns out of range, using default");
                DEFAULT_HISTORY_DURATION_NS
            }
            None => DEFAULT_HISTORY_DURATION_NS,
        };
        Self { history_duration_ns }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_video_descriptor() {
        let json = r#"{
            "id": "3fa85f64-5717-4562-b3fc-2c963f66afa6",
            "format": "video",
            "rate": {"numerator": 25, "denominator": 1},
            "geometry": {"kind": "video", "width": 1920, "height": 1080, "grain_count": 8}
        }"#;
        let d = parse_descriptor(json).unwrap();
        assert_eq!(d.format, DataFormat::Video);
        assert_eq!(d.rate.numerator, 25);
    }

    #[test]
    fn rejects_mismatched_format_and_geometry() {
        let json = r#"{
            "id": "3fa85f64-5717-4562-b3fc-2c963f66afa6",
            "format": "audio",
            "rate": {"numerator": 48000, "denominator": 1},
            "geometry": {"kind": "video", "width": 1920, "height": 1080, "grain_count": 8}
        }"#;
        assert!(parse_descriptor(json).is_err());
    }

    #[test]
    fn rejects_zero_grain_count() {
        let json = r#"{
            "id": "3fa85f64-5717-4562-b3fc-2c963f66afa6",
            "format": "video",
            "rate": {"numerator": 25, "denominator": 1},
            "geometry": {"kind": "video", "width": 1920, "height": 1080, "grain_count": 0}
        }"#;
        assert!(parse_descriptor(json).is_err());
    }

    #[test]
    fn malformed_options_falls_back_to_default() {
        let opts = DomainOptions::parse("not json");
        assert_eq!(opts.history_duration_ns, DEFAULT_HISTORY_DURATION_NS);
    }

    #[test]
    fn out_of_range_history_duration_falls_back_to_default() {
        let opts = DomainOptions::parse(
            r#"{"urn:x-mxl:option:history_duration/v1.0": 999999999999}"#,
        );
        assert_eq!(opts.history_duration_ns, DEFAULT_HISTORY_DURATION_NS);
    }

    #[test]
    fn in_range_history_duration_is_honored() {
        let opts =
            DomainOptions::parse(r#"{"urn:x-mxl:option:history_duration/v1.0": 5000000}"#);
        assert_eq!(opts.history_duration_ns, 5_000_000);
    }
}
