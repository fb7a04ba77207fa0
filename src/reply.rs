//! Call outcomes and their per-generation wire encoding.

use chrono::{SecondsFormat, Utc};
use http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use crate::context::Context;
use crate::error::RpcError;
use crate::protocol::ProtocolVersion;
use crate::response::{ContentType, Response};

/// The outcome of one call.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Success(Value),
    Failure(RpcError),
}

impl Reply {
    pub fn result(&self) -> Option<&Value> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&RpcError> {
        match self {
            Self::Success(_) => None,
            Self::Failure(e) => Some(e),
        }
    }

    /// `500` for fatal errors, `400` for any other error, `200` otherwise.
    pub fn status(&self) -> StatusCode {
        match self.error() {
            Some(e) if e.is_fatal() => StatusCode::INTERNAL_SERVER_ERROR,
            Some(_) => StatusCode::BAD_REQUEST,
            None => StatusCode::OK,
        }
    }
}

// ── Wire bodies ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BodyV1<'a> {
    id: &'a str,
    ok: bool,
    device_id: &'a str,
    duration: f64,
    host: &'a str,
    result: Option<&'a Value>,
    error: Option<&'a RpcError>,
}

#[derive(Serialize)]
struct BodyV3<'a> {
    duration: f64,
    host: &'a str,
    result: Option<&'a Value>,
    error: Option<&'a RpcError>,
}

#[derive(Serialize)]
struct BodyWithoutContext<'a> {
    error: &'a RpcError,
}

// ── ReplyWriter ───────────────────────────────────────────────────────────────

/// Serializes replies in the generation the request arrived in.
pub(crate) struct ReplyWriter {
    host: String,
}

impl ReplyWriter {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    /// Writes a reply for a failure that happened before a [`Context`] could
    /// be built. Always `500`, never logged.
    pub fn write_without_context(&self, reply: &Reply) -> Response {
        let fallback;
        let error = match reply.error() {
            Some(e) => e,
            None => {
                fallback = RpcError::fatal("Response without context");
                &fallback
            }
        };
        json_response(StatusCode::INTERNAL_SERVER_ERROR, &BodyWithoutContext { error })
    }

    /// Writes a reply for a call with a context, logging one access line.
    pub fn write(&self, ctx: &Context, reply: &Reply) -> Response {
        let duration = ctx.elapsed().as_secs_f64();
        let request = &ctx.request;

        info!(
            target: "rpcgate::access",
            "{} {} {:.6}s {}() -> {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            request.id,
            duration,
            request.name,
            reply.error().map_or("OK", |e| e.kind.as_str()),
        );

        match request.version {
            ProtocolVersion::V1 => json_response(reply.status(), &BodyV1 {
                id: &request.id,
                ok: reply.error().is_none(),
                device_id: &request.device.id,
                duration,
                host: &self.host,
                result: reply.result(),
                error: reply.error(),
            }),
            // Generation 2 clients only look at whether the connection worked.
            ProtocolVersion::V2 => Response::builder().no_body(),
            ProtocolVersion::V3 => json_response(reply.status(), &BodyV3 {
                duration,
                host: &self.host,
                result: reply.result(),
                error: reply.error(),
            }),
        }
    }
}

fn json_response(status: StatusCode, body: &impl Serialize) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => Response::builder().status(status).bytes(ContentType::Json, bytes),
        Err(e) => {
            error!("failed to serialize reply: {e}");
            Response::status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
