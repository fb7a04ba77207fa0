//! End-to-end tests of the request pipeline through `Server::handle`.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use http::{Method, StatusCode};
use http_body_util::StreamBody;
use hyper::body::Frame;
use regex::Regex;
use rpcgate::{
    Api, BoxFuture, Codec, CodecError, Config, Context, Error, FunctionDescriptor, Hooks, Reply, Request,
    Response, RpcError, Server, TypeTable,
};
use serde_json::{Value, json};

mod common;

use common::{post, request, send, server};

// ── Protocol generations ──────────────────────────────────────────────────────

#[tokio::test]
async fn v3_scenario_returns_result() {
    let (status, body) = post(&server(), r#"{"requestId":"abc","name":"ping","args":{},"deviceInfo":{"id":"d1"}}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "pong");
    assert_eq!(body["error"], Value::Null);
    assert_eq!(body["host"], "test-host");
    assert!(body.get("id").is_none());
}

#[tokio::test]
async fn v1_round_trip() {
    let (status, body) = post(&server(), r#"{"id":"r1","name":"add","args":{"a":2,"b":3}}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "r1");
    assert_eq!(body["ok"], true);
    assert_eq!(body["deviceId"], "r1");
    assert_eq!(body["result"], 5);
    assert_eq!(body["error"], Value::Null);
}

#[tokio::test]
async fn v2_acknowledges_with_empty_body() {
    let server = server();
    let ok = r#"{"requestId":"r","deviceId":"d","name":"ping","args":{},"info":{"type":"web","language":"en"}}"#;
    let failing = r#"{"requestId":"r","deviceId":"d","name":"reject","args":{},"info":{"type":"web","language":"en"}}"#;

    for body in [ok, failing] {
        let (status, headers, bytes) = send(&server, request(Method::POST, "/", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(bytes.is_empty());
        assert_eq!(headers["content-type"], "application/json; charset=utf-8");
    }
}

#[tokio::test]
async fn repeated_v3_calls_get_fresh_ids() {
    let server = server();
    let body = r#"{"version":3,"name":"whoami","args":{}}"#;

    let (_, first) = post(&server, body).await;
    let (_, second) = post(&server, body).await;

    let (a, b) = (&first["result"]["deviceId"], &second["result"]["deviceId"]);
    assert_eq!(a.as_str().unwrap().len(), 32);
    assert_ne!(a, b);
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_function_is_fatal() {
    let server = server();

    let (status, body) = post(&server, r#"{"id":"r1","name":"nope","args":{}}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"]["type"], "Fatal");
    assert!(body["error"]["message"].as_str().unwrap().contains("nope"));
    assert!(body["duration"].is_number());

    let (status, body) = post(&server, r#"{"version":3,"name":"described_only","args":{}}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["message"], "Function does not exist: described_only");
}

#[tokio::test]
async fn business_error_is_400_and_passed_through() {
    let (status, body) = post(&server(), r#"{"version":3,"name":"reject","args":{}}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!({"type": "NotAllowed", "message": "go away"}));
    assert_eq!(body["result"], Value::Null);
}

#[tokio::test]
async fn bad_arguments_are_fatal() {
    let (status, body) = post(&server(), r#"{"version":3,"name":"add","args":{"a":"x"}}"#).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["type"], "Fatal");
}

#[tokio::test]
async fn panicking_function_is_fatal() {
    let (status, body) = post(&server(), r#"{"version":3,"name":"explode","args":{}}"#).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], json!({"type": "Fatal", "message": "kaboom"}));
}

#[tokio::test]
async fn unparsable_body_is_contextless_fatal() {
    let (status, body) = post(&server(), "{not json").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": {"type": "Fatal", "message": "Couldn't understand request"}}));
}

#[tokio::test]
async fn schema_violation_is_contextless_fatal() {
    let (status, body) = post(&server(), r#"{"version":3,"args":{}}"#).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body.as_object().unwrap().len(), 1);
    assert!(body["error"]["message"].as_str().unwrap().starts_with("Couldn't parse request"));
}

#[tokio::test]
async fn missing_client_ip_is_contextless_fatal() {
    let res = server()
        .handle(request(Method::POST, "/", r#"{"version":3,"name":"ping","args":{}}"#), None)
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn forwarded_ip_reaches_context() {
    let mut req = request(Method::POST, "/", r#"{"version":3,"name":"whoami","args":{}}"#);
    req.headers_mut().insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());

    let (_, _, bytes) = send(&server(), req).await;
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["result"]["ip"], "203.0.113.9");
}

#[tokio::test]
async fn extra_context_reaches_functions() {
    let server = server().extra_context("tenant", "acme");
    let (_, body) = post(&server, r#"{"version":3,"name":"whoami","args":{}}"#).await;

    assert_eq!(body["result"]["extra"], json!({"tenant": "acme"}));
}

// ── Non-RPC methods ───────────────────────────────────────────────────────────

#[tokio::test]
async fn options_sends_only_cors_headers() {
    let server = server().add_header("x-powered-by", "rpcgate");
    let (status, headers, body) = send(&server, request(Method::OPTIONS, "/", "")).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
    assert!(headers.contains_key("access-control-allow-methods"));
    assert!(headers.keys().all(|name| name.as_str().starts_with("access-control-")));
}

#[tokio::test]
async fn dynamic_origin_is_echoed() {
    let mut req = request(Method::POST, "/", r#"{"version":3,"name":"ping","args":{}}"#);
    req.headers_mut().insert("origin", "https://app.example".parse().unwrap());

    let (_, headers, _) = send(&server(), req).await;
    assert_eq!(headers["access-control-allow-origin"], "https://app.example");
    assert_eq!(headers["vary"], "Origin");
}

#[tokio::test]
async fn static_origin_when_dynamic_is_off() {
    let config = Config { dynamic_cors_origin: false, ..Config::default() };
    let server = Server::new(config, common::api());
    let mut req = request(Method::GET, "/", "");
    req.headers_mut().insert("origin", "https://app.example".parse().unwrap());

    let (_, headers, _) = send(&server, req).await;
    assert_eq!(headers["access-control-allow-origin"], "*");
    assert!(!headers.contains_key("vary"));
}

#[tokio::test]
async fn additive_headers_are_concatenated() {
    let server = server().add_header("X-Thing", "a").add_header("x-thing", "b");
    let (_, headers, _) = send(&server, request(Method::HEAD, "/", "")).await;

    assert_eq!(headers["x-thing"], "a, b");
}

#[tokio::test]
async fn head_is_empty_200() {
    let (status, _, body) = send(&server(), request(Method::HEAD, "/anything", "")).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
}

#[tokio::test]
async fn get_is_health_check() {
    let (status, _, body) = send(&server(), request(Method::GET, "/", "")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({"ok": true}));
}

#[tokio::test]
async fn other_methods_are_400() {
    let (status, _, body) = send(&server(), request(Method::PUT, "/", "{}")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.is_empty());
}

// ── Auxiliary routes ──────────────────────────────────────────────────────────

async fn literal(_req: Request) -> &'static str {
    "literal"
}

async fn file(req: Request) -> Response {
    Response::text(format!("file {}", req.param("name").unwrap_or("?")))
}

#[tokio::test]
async fn auxiliary_routes_take_over() {
    let server = server()
        .route(Method::GET, Regex::new("/files/(?P<name>[^/]+)").unwrap(), file)
        .route(Method::GET, "/files/special", literal);

    let (_, _, body) = send(&server, request(Method::GET, "/files/special", "")).await;
    assert_eq!(&body[..], b"literal");

    let (status, _, body) = send(&server, request(Method::GET, "/files/a.txt", "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"file a.txt");
}

#[tokio::test]
async fn ignored_prefix_is_stripped_before_routing() {
    let config = Config { ignored_url_prefix: "/api".to_owned(), ..Config::default() };
    let server = Server::new(config, common::api()).route(Method::GET, "/special", literal);

    let (_, _, body) = send(&server, request(Method::GET, "/api/special", "")).await;
    assert_eq!(&body[..], b"literal");
}

#[tokio::test]
async fn route_content_type_overrides_default() {
    let server = server().route(Method::GET, "/special", literal);
    let (_, headers, _) = send(&server, request(Method::GET, "/special", "")).await;

    assert_eq!(headers["content-type"], "text/plain; charset=utf-8");
}

// ── Hooks ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Recording {
    started: AtomicUsize,
    ended: AtomicUsize,
}

struct Gatekeeper(Arc<Recording>);

impl Hooks for Gatekeeper {
    fn on_health_check(&self) -> BoxFuture<'_, Result<bool, RpcError>> {
        Box::pin(async { Err(RpcError::fatal("database down")) })
    }

    fn on_request_start<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<Option<Reply>, RpcError>> {
        Box::pin(async move {
            self.0.started.fetch_add(1, Ordering::SeqCst);
            match ctx.request.headers.get("authorization").map(String::as_str) {
                Some("secret") => Ok(None),
                Some("cached") => Ok(Some(Reply::Success(json!("from cache")))),
                Some(_) => Err(RpcError::new("Unauthorized", "bad token")),
                None => Ok(Some(Reply::Failure(RpcError::new("Unauthorized", "no token")))),
            }
        })
    }

    fn on_request_end<'a>(&'a self, _ctx: &'a Context, reply: &'a Reply) -> BoxFuture<'a, Option<Reply>> {
        Box::pin(async move {
            self.0.ended.fetch_add(1, Ordering::SeqCst);
            match reply.error() {
                Some(e) if e.kind == "NotAllowed" => Some(Reply::Success(json!("forgiven"))),
                _ => None,
            }
        })
    }
}

fn authorized(name: &str, token: Option<&str>) -> http::Request<http_body_util::Full<bytes::Bytes>> {
    let mut req = request(Method::POST, "/", &format!(r#"{{"version":3,"name":"{name}","args":{{}}}}"#));
    if let Some(token) = token {
        req.headers_mut().insert("authorization", token.parse().unwrap());
    }
    req
}

async fn json_of(server: &Server, req: http::Request<http_body_util::Full<bytes::Bytes>>) -> (StatusCode, Value) {
    let (status, _, bytes) = send(server, req).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn request_start_can_short_circuit() {
    let recording = Arc::new(Recording::default());
    let server = server().hooks(Gatekeeper(Arc::clone(&recording)));

    let (status, body) = json_of(&server, authorized("ping", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "no token");

    let (_, body) = json_of(&server, authorized("ping", Some("cached"))).await;
    assert_eq!(body["result"], "from cache");

    let (status, body) = json_of(&server, authorized("ping", Some("wrong"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "bad token");

    let (_, body) = json_of(&server, authorized("ping", Some("secret"))).await;
    assert_eq!(body["result"], "pong");

    assert_eq!(recording.started.load(Ordering::SeqCst), 4);
    assert_eq!(recording.ended.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn request_end_can_rewrite_errors() {
    let server = server().hooks(Gatekeeper(Arc::default()));

    let (status, body) = json_of(&server, authorized("reject", Some("secret"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "forgiven");
    assert_eq!(body["error"], Value::Null);
}

/// Panics while finishing every call.
struct PanickingEnd;

impl Hooks for PanickingEnd {
    fn on_request_end<'a>(&'a self, _ctx: &'a Context, _reply: &'a Reply) -> BoxFuture<'a, Option<Reply>> {
        Box::pin(async { panic!("end hook blew up") })
    }
}

#[tokio::test]
async fn request_end_panic_becomes_fatal_reply() {
    let server = server().hooks(PanickingEnd);

    let (status, body) = post(&server, r#"{"version":3,"name":"ping","args":{}}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["type"], "Fatal");
    assert_eq!(body["error"]["message"], "end hook blew up");
    assert_eq!(body["result"], Value::Null);
}

#[tokio::test]
async fn failing_health_check_reports_not_ok() {
    let server = server().hooks(Gatekeeper(Arc::default()));
    let (status, _, body) = send(&server, request(Method::GET, "/", "")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({"ok": false}));
}

// ── Codec ─────────────────────────────────────────────────────────────────────

/// Requires args to be an object and wraps results in `{"value": ...}`.
struct Strict;

impl Codec for Strict {
    fn decode(&self, _types: &TypeTable, path: &str, _ty: &Value, value: Value) -> Result<Value, CodecError> {
        match value {
            Value::Object(_) => Ok(value),
            other => Err(CodecError(format!("{path}: expected object, got {other}"))),
        }
    }

    fn encode(&self, _types: &TypeTable, _path: &str, ty: &Value, value: Value) -> Result<Value, CodecError> {
        Ok(json!({ "type": ty, "value": value }))
    }
}

#[tokio::test]
async fn codec_sees_descriptors_and_values() {
    let api = common::api().describe("ping", FunctionDescriptor { args: json!({}), ret: json!("string") });
    let server = Server::new(Config::default(), api).codec(Strict);

    let (status, body) = post(&server, r#"{"version":3,"name":"ping","args":{}}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], json!({"type": "string", "value": "pong"}));

    let (status, body) = post(&server, r#"{"version":3,"name":"ping","args":[1]}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["message"], "ping.args: expected object, got [1]");
}

#[tokio::test]
async fn empty_api_serves_health_checks() {
    let server = Server::new(Config::default(), Api::new());
    let (status, _, _) = send(&server, request(Method::GET, "/", "")).await;
    assert_eq!(status, StatusCode::OK);
}

// ── Transport ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unreadable_body_is_a_transport_error() {
    let frames = futures_util::stream::iter(vec![
        Err::<Frame<bytes::Bytes>, _>(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away")),
    ]);
    let req = http::Request::builder()
        .method(Method::POST)
        .uri("/")
        .body(StreamBody::new(frames))
        .unwrap();

    match server().handle(req, common::peer()).await {
        Err(Error::Transport(message)) => assert!(message.contains("peer went away")),
        other => panic!("expected a transport error, got {:?}", other.map(|res| res.status())),
    }
}
