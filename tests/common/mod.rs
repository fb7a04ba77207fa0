//! Shared fixtures for the integration tests.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, Request};
use http_body_util::Full;
use rpcgate::{Api, Config, Context, FunctionDescriptor, RpcError, Server};
use serde::Deserialize;
use serde_json::Value;

pub const PEER: &str = "127.0.0.1:50000";

#[derive(Deserialize)]
pub struct AddArgs {
    pub a: i64,
    pub b: i64,
}

async fn ping(_ctx: Arc<Context>, _args: Value) -> Result<&'static str, RpcError> {
    Ok("pong")
}

async fn add(_ctx: Arc<Context>, args: AddArgs) -> Result<i64, RpcError> {
    Ok(args.a + args.b)
}

async fn reject(_ctx: Arc<Context>, _args: Value) -> Result<(), RpcError> {
    Err(RpcError::new("NotAllowed", "go away"))
}

async fn whoami(ctx: Arc<Context>, _args: Value) -> Result<Value, RpcError> {
    Ok(serde_json::json!({
        "ip": ctx.ip,
        "deviceId": ctx.request.device.id,
        "extra": ctx.extra,
    }))
}

async fn explode(_ctx: Arc<Context>, _args: Value) -> Result<(), RpcError> {
    panic!("kaboom")
}

/// An API with a handful of functions, plus one described-but-unimplemented.
pub fn api() -> Api {
    let mut api = Api::new();
    for name in ["ping", "add", "reject", "whoami", "explode", "described_only"] {
        api = api.describe(name, FunctionDescriptor::default());
    }
    api.implement("ping", ping)
        .implement("add", add)
        .implement("reject", reject)
        .implement("whoami", whoami)
        .implement("explode", explode)
}

pub fn server() -> Server {
    Server::new(Config::default(), api()).host("test-host")
}

pub fn request(method: Method, uri: &str, body: &str) -> Request<Full<Bytes>> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Full::new(Bytes::from(body.to_owned())))
        .unwrap()
}

pub fn peer() -> Option<SocketAddr> {
    PEER.parse().ok()
}

/// Sends a request and returns status, headers and the raw body.
pub async fn send(server: &Server, req: Request<Full<Bytes>>) -> (http::StatusCode, http::HeaderMap, Bytes) {
    use http_body_util::BodyExt;

    let res = server.handle(req, peer()).await.unwrap();
    let (parts, body) = res.into_parts();
    let body = body.collect().await.unwrap().to_bytes();
    (parts.status, parts.headers, body)
}

/// POSTs a JSON body and parses the JSON reply.
pub async fn post(server: &Server, body: &str) -> (http::StatusCode, Value) {
    let (status, _, bytes) = send(server, request(Method::POST, "/", body)).await;
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, json)
}
