//! Wire-protocol detection and normalization.
//!
//! Three request generations are served side by side. Each has its own
//! envelope layout; all of them are normalized here, immediately, into one
//! [`CanonicalRequest`], so nothing downstream cares which generation the
//! caller spoke except the reply writer.
//!
//! | Generation | Detected by | Request id | Reply body |
//! |---|---|---|---|
//! | 1 | neither marker | `id` | `{id, ok, deviceId, duration, host, result, error}` |
//! | 2 | `requestId` | `requestId` | empty |
//! | 3 | `"version": 3` | `requestId` or random | `{duration, host, result, error}` |

use std::collections::BTreeMap;

use http::HeaderMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Protocol generation a request arrived in; replies are written back in the
/// same one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ProtocolVersion {
    V1,
    V2,
    V3,
}

/// Why a body could not be normalized.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Not JSON, or an unknown `version`.
    #[error("Couldn't understand request")]
    NotUnderstood,

    /// The envelope does not fit its generation's schema.
    #[error("Couldn't parse request: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Normalized caller device, whatever the source generation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub language: Option<String>,
    pub platform: Value,
    pub timezone: Option<String>,
    pub version: Option<String>,
}

/// The single request shape everything after the normalizer operates on.
#[derive(Clone, Debug, Serialize)]
pub struct CanonicalRequest {
    pub version: ProtocolVersion,
    pub id: String,
    pub name: String,
    pub args: Value,
    pub extra: Map<String, Value>,
    pub headers: BTreeMap<String, String>,
    pub device: DeviceInfo,
}

// ── Generation 1 ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RequestV1 {
    id: String,
    args: Value,
    name: String,
    #[serde(default)]
    device: Option<DeviceV1>,
}

#[derive(Default, Deserialize)]
struct DeviceV1 {
    id: Option<String>,
    #[serde(rename = "type")]
    device_type: Option<String>,
    platform: Option<Value>,
    version: Option<String>,
    language: Option<String>,
    timezone: Option<String>,
}

// ── Generation 2 ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestV2 {
    request_id: String,
    device_id: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    partner_id: Option<String>,
    args: Value,
    name: String,
    info: InfoV2,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InfoV2 {
    #[serde(rename = "type")]
    device_type: String,
    language: String,
    #[serde(default)]
    browser_user_agent: Option<String>,
}

// ── Generation 3 ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestV3 {
    #[serde(default)]
    request_id: Option<String>,
    name: String,
    args: Value,
    #[serde(default)]
    extra: Option<Map<String, Value>>,
    #[serde(default)]
    device_info: Option<DeviceV3>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceV3 {
    id: Option<String>,
    #[serde(rename = "type")]
    device_type: Option<String>,
    browser_user_agent: Option<String>,
    timezone: Option<String>,
    version: Option<String>,
    language: Option<String>,
}

/// A decoded envelope, still in its generation's own layout.
enum WireRequest {
    V1(RequestV1),
    V2(RequestV2),
    V3(RequestV3),
}

/// Picks the generation of an already-parsed body.
///
/// An explicit `version` wins over everything else; a bare `requestId` means
/// generation 2; anything else is generation 1.
///
/// Some generation 3 clients omit `version`. A `requestId` body that carries
/// `deviceInfo` and no `deviceId` cannot be a generation 2 envelope, so it is
/// read as generation 3.
pub fn detect_version(body: &Value) -> Result<ProtocolVersion, ProtocolError> {
    if let Some(version) = body.get("version") {
        return match version.as_u64() {
            Some(1) => Ok(ProtocolVersion::V1),
            Some(2) => Ok(ProtocolVersion::V2),
            Some(3) => Ok(ProtocolVersion::V3),
            _ => Err(ProtocolError::NotUnderstood),
        };
    }
    if body.get("requestId").is_some() {
        if body.get("deviceInfo").is_some() && body.get("deviceId").is_none() {
            return Ok(ProtocolVersion::V3);
        }
        return Ok(ProtocolVersion::V2);
    }
    Ok(ProtocolVersion::V1)
}

/// Parses a raw body into a [`CanonicalRequest`].
pub fn normalize(body: &[u8], headers: &HeaderMap) -> Result<CanonicalRequest, ProtocolError> {
    let value: Value = serde_json::from_slice(body).map_err(|_| ProtocolError::NotUnderstood)?;
    let wire = match detect_version(&value)? {
        ProtocolVersion::V1 => WireRequest::V1(serde_json::from_value(value)?),
        ProtocolVersion::V2 => WireRequest::V2(serde_json::from_value(value)?),
        ProtocolVersion::V3 => WireRequest::V3(serde_json::from_value(value)?),
    };
    Ok(wire.into_canonical(header_map(headers)))
}

impl WireRequest {
    fn into_canonical(self, headers: BTreeMap<String, String>) -> CanonicalRequest {
        match self {
            Self::V1(req) => {
                let device = req.device.unwrap_or_default();
                let device_type = device.device_type
                    .or_else(|| device.platform.as_ref().and_then(Value::as_str).map(str::to_owned))
                    .unwrap_or_default();
                CanonicalRequest {
                    version: ProtocolVersion::V1,
                    device: DeviceInfo {
                        id: device.id.unwrap_or_else(|| req.id.clone()),
                        device_type,
                        language: device.language,
                        platform: device.platform.unwrap_or(Value::Null),
                        timezone: device.timezone,
                        version: device.version,
                    },
                    id: req.id,
                    name: req.name,
                    args: req.args,
                    extra: Map::new(),
                    headers,
                }
            }
            Self::V2(req) => {
                let mut extra = Map::new();
                extra.insert("sessionId".to_owned(), json!(req.session_id));
                extra.insert("partnerId".to_owned(), json!(req.partner_id));
                CanonicalRequest {
                    version: ProtocolVersion::V2,
                    id: req.request_id,
                    name: req.name,
                    args: req.args,
                    extra,
                    headers,
                    device: DeviceInfo {
                        id: req.device_id,
                        device_type: req.info.device_type,
                        language: Some(req.info.language),
                        platform: json!({ "browserUserAgent": req.info.browser_user_agent }),
                        timezone: None,
                        version: Some(String::new()),
                    },
                }
            }
            Self::V3(req) => {
                let device = req.device_info.unwrap_or_default();
                CanonicalRequest {
                    version: ProtocolVersion::V3,
                    id: req.request_id.unwrap_or_else(random_token),
                    name: req.name,
                    args: req.args,
                    extra: req.extra.unwrap_or_default(),
                    headers,
                    device: DeviceInfo {
                        id: device.id.unwrap_or_else(random_token),
                        device_type: device.device_type.unwrap_or_else(|| "api".to_owned()),
                        language: device.language,
                        platform: device.browser_user_agent
                            .map(|ua| json!({ "browserUserAgent": ua }))
                            .unwrap_or(Value::Null),
                        timezone: device.timezone,
                        version: device.version,
                    },
                }
            }
        }
    }
}

/// 16 bytes from the thread-local CSPRNG, as 32 lowercase hex characters.
pub fn random_token() -> String {
    let bytes: [u8; 16] = rand::thread_rng().r#gen();
    hex::encode(bytes)
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers.iter()
        .filter_map(|(name, value)| Some((name.as_str().to_owned(), value.to_str().ok()?.to_owned())))
        .collect()
}
