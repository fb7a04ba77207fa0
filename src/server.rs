//! HTTP server, request pipeline and graceful shutdown.
//!
//! # Pipeline
//!
//! Every request goes through the same fixed sequence:
//!
//! 1. CORS: echo `Origin` back when dynamic origins are on.
//! 2. `OPTIONS` short-circuits with an empty `200`.
//! 3. The body is buffered completely.
//! 4. The ignored prefix is stripped and auxiliary routes are consulted.
//! 5. `HEAD` is an empty `200`, `GET` is the health check, anything but
//!    `POST` is a `400`.
//! 6. `POST` resolves the caller's IP and normalizes the body; failing either
//!    is written without a context.
//! 7. The call runs (hooks, function lookup, decode, execute, encode); any
//!    error or panic becomes an error reply.
//! 8. The reply is written in the caller's protocol generation.
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C the server stops accepting connections, lets every
//! in-flight connection finish, then returns from [`Server::serve`].

use std::any::Any;
use std::fmt::Display;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, HeaderName, HeaderValue, ORIGIN, VARY};
use http::{HeaderMap, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use serde_json::{Map, Value, json};
use sysinfo::System;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::api::Api;
use crate::codec::{Codec, PassThrough};
use crate::config::{Config, HeaderSet};
use crate::context::{Context, client_ip};
use crate::error::{Error, RpcError};
use crate::handler::Handler;
use crate::hooks::{Hooks, NoHooks};
use crate::protocol;
use crate::registry::{HandlerRegistry, Matcher};
use crate::reply::{Reply, ReplyWriter};
use crate::request::Request;
use crate::response::{ContentType, Response};
use crate::targets::{self, Generator};

/// The RPC server.
///
/// Everything is configured up front; once serving, the server is shared
/// read-only by every connection task.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rpcgate::{Api, Config, Context, FunctionDescriptor, RpcError, Server};
/// use serde_json::Value;
///
/// async fn ping(_ctx: Arc<Context>, _args: Value) -> Result<&'static str, RpcError> {
///     Ok("pong")
/// }
///
/// # async fn run() -> Result<(), rpcgate::Error> {
/// let api = Api::new()
///     .describe("ping", FunctionDescriptor::default())
///     .implement("ping", ping);
///
/// Server::new(Config::default(), api).serve().await
/// # }
/// ```
pub struct Server {
    config: Config,
    api: Api,
    codec: Box<dyn Codec>,
    hooks: Box<dyn Hooks>,
    registry: HandlerRegistry,
    headers: HeaderSet,
    extra_context: Map<String, Value>,
    writer: ReplyWriter,
}

impl Server {
    pub fn new(config: Config, api: Api) -> Self {
        let headers = config.header_set();
        let host = System::host_name().unwrap_or_default();
        Self {
            config,
            api,
            codec: Box::new(PassThrough),
            hooks: Box::new(NoHooks),
            registry: HandlerRegistry::new(),
            headers,
            extra_context: Map::new(),
            writer: ReplyWriter::new(host),
        }
    }

    pub fn hooks(mut self, hooks: impl Hooks) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    pub fn codec(mut self, codec: impl Codec) -> Self {
        self.codec = Box::new(codec);
        self
    }

    /// Registers an auxiliary route, consulted before RPC dispatch.
    pub fn route(mut self, method: Method, matcher: impl Into<Matcher>, handler: impl Handler) -> Self {
        self.registry.register(method, matcher, handler);
        self
    }

    /// Registers the generated-source download routes.
    pub fn generator(mut self, generator: impl Generator) -> Self {
        let description = Arc::new(self.api.description().clone());
        targets::register(&mut self.registry, Arc::new(generator), description);
        self
    }

    /// Adds a header to every response; see [`HeaderSet::add`].
    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Adds a field copied into every call's [`Context::extra`].
    pub fn extra_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra_context.insert(key.to_owned(), value.into());
        self
    }

    /// Overrides the host name reported in reply bodies.
    pub fn host(mut self, host: &str) -> Self {
        self.writer = ReplyWriter::new(host);
        self
    }

    /// Binds `0.0.0.0:<port>` and serves until shutdown.
    pub async fn serve(self) -> Result<(), Error> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port)).await?;
        self.serve_on(listener).await
    }

    /// Serves connections from an already-bound listener until shutdown.
    pub async fn serve_on(self, listener: TcpListener) -> Result<(), Error> {
        let addr = listener.local_addr()?;
        let server = Arc::new(self);

        info!(addr = %addr, "rpcgate listening");

        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Check shutdown first so a SIGTERM stops accepting at once.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let server = Arc::clone(&server);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        let svc = service_fn(move |req| {
                            let server = Arc::clone(&server);
                            async move { server.handle(req, Some(remote_addr)).await }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("rpcgate stopped");
        Ok(())
    }

    /// Runs one request through the pipeline.
    ///
    /// Fails only when the request body cannot be read; hyper then drops the
    /// connection instead of answering.
    pub async fn handle<B>(
        &self,
        req: http::Request<B>,
        remote: Option<SocketAddr>,
    ) -> Result<http::Response<Full<Bytes>>, Error>
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let (parts, body) = req.into_parts();

        let origin = if self.config.dynamic_cors_origin {
            parts.headers.get(ORIGIN).cloned()
        } else {
            None
        };

        let preflight = parts.method == Method::OPTIONS;
        let response = if preflight {
            Response::status(StatusCode::OK)
        } else {
            let body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    error!(method = %parts.method, path = %parts.uri.path(), "failed to read request body: {e}");
                    return Err(Error::Transport(e.to_string()));
                }
            };
            self.dispatch(parts.method, parts.uri.path(), parts.headers, body, remote).await
        };

        let mut res = response.into_inner();
        let headers = res.headers_mut();
        if let Some(origin) = origin {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
            headers.insert(VARY, HeaderValue::from_static("Origin"));
        }
        for (name, value) in self.headers.iter() {
            if preflight && !name.starts_with("access-control-") {
                continue;
            }
            merge_header(headers, name, value);
        }
        Ok(res)
    }

    async fn dispatch(
        &self,
        method: Method,
        raw_path: &str,
        headers: HeaderMap,
        body: Bytes,
        remote: Option<SocketAddr>,
    ) -> Response {
        let path = self.config.route_path(raw_path);

        if let Some(resolved) = self.registry.resolve(&method, path) {
            debug!(method = %method, path = %path, "auxiliary route");
            let req = Request::new(method, path.to_owned(), headers, body, resolved.params);
            return resolved.handler.call(req).await;
        }

        match method {
            Method::HEAD => Response::status(StatusCode::OK),
            Method::GET => self.health_check().await,
            Method::POST => self.call(headers, body, remote).await,
            _ => Response::status(StatusCode::BAD_REQUEST),
        }
    }

    async fn health_check(&self) -> Response {
        let ok = match AssertUnwindSafe(self.hooks.on_health_check()).catch_unwind().await {
            Ok(Ok(ok)) => ok,
            Ok(Err(e)) => {
                warn!(error = %e, "health check failed");
                false
            }
            Err(panic) => {
                error!("health check panicked: {}", panic_message(&*panic));
                false
            }
        };
        let status = if ok { StatusCode::OK } else { StatusCode::INTERNAL_SERVER_ERROR };
        Response::builder()
            .status(status)
            .bytes(ContentType::Json, json!({ "ok": ok }).to_string().into_bytes())
    }

    async fn call(&self, headers: HeaderMap, body: Bytes, remote: Option<SocketAddr>) -> Response {
        let Some(ip) = client_ip(&headers, remote) else {
            warn!("couldn't determine client ip");
            let reply = Reply::Failure(RpcError::fatal("Couldn't determine client IP"));
            return self.writer.write_without_context(&reply);
        };

        let request = match protocol::normalize(&body, &headers) {
            Ok(request) => request,
            Err(e) => {
                warn!(ip = %ip, "rejecting request: {e}");
                return self.writer.write_without_context(&Reply::Failure(RpcError::fatal(e.to_string())));
            }
        };

        let ctx = Arc::new(Context::new(self.extra_context.clone(), ip, request));

        let reply = match AssertUnwindSafe(self.execute(&ctx)).catch_unwind().await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => Reply::Failure(e),
            Err(panic) => {
                let message = panic_message(&*panic);
                error!(request_id = %ctx.request.id, function = %ctx.request.name, "call panicked: {message}");
                Reply::Failure(RpcError::fatal(message))
            }
        };

        let reply = match AssertUnwindSafe(self.hooks.on_request_end(&ctx, &reply)).catch_unwind().await {
            Ok(replaced) => replaced.unwrap_or(reply),
            Err(panic) => {
                let message = panic_message(&*panic);
                error!(request_id = %ctx.request.id, function = %ctx.request.name, "request end hook panicked: {message}");
                Reply::Failure(RpcError::fatal(message))
            }
        };

        self.writer.write(&ctx, &reply)
    }

    async fn execute(&self, ctx: &Arc<Context>) -> Result<Reply, RpcError> {
        let name = &ctx.request.name;
        let (descriptor, function) = self.api.lookup(name)
            .ok_or_else(|| RpcError::fatal(format!("Function does not exist: {name}")))?;

        if let Some(reply) = self.hooks.on_request_start(ctx).await? {
            return Ok(reply);
        }

        let types = &self.api.description().type_table;
        let args = self.codec.decode(types, &format!("{name}.args"), &descriptor.args, ctx.request.args.clone())?;
        let ret = function.call(Arc::clone(ctx), args).await?;
        let ret = self.codec.encode(types, &format!("{name}.ret"), &descriptor.ret, ret)?;
        Ok(Reply::Success(ret))
    }
}

/// Inserts a server-wide header unless the response already set that name.
fn merge_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
        (Ok(name), Ok(value)) => {
            headers.entry(name).or_insert(value);
        }
        _ => warn!(header = %name, "dropping invalid response header"),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_owned()
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or Ctrl-C. Windows only has Ctrl-C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => { signal.recv().await; }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
