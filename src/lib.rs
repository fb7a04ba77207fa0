//! # rpcgate
//!
//! An HTTP-hosted RPC endpoint that keeps serving every client generation at
//! once. Old clients and current clients talk to the same deployed server,
//! and business logic never branches on which one is calling.
//!
//! ## How a call flows
//!
//! ```text
//! POST body ──▶ protocol::normalize ──▶ CanonicalRequest ──▶ Context
//!                (detect generation,                          │
//!                 validate envelope)                          ▼
//!                                         on_request_start ─▶ decode args
//!                                                             ▼
//!                                                       function(ctx, args)
//!                                                             ▼
//!               reply in caller's  ◀── on_request_end ◀── encode result
//!               generation
//! ```
//!
//! Non-RPC routes (generated client downloads and anything else the host
//! registers) are matched first; `GET` is a health check, `HEAD` and
//! `OPTIONS` are empty `200`s.
//!
//! ## What is not here
//!
//! Transport security, authentication and rate limiting belong to the proxy
//! in front. The schema type checker and source generators are plugged in
//! through [`Codec`] and [`Generator`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rpcgate::{Api, Config, Context, FunctionDescriptor, RpcError, Server};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Greet { name: String }
//!
//! async fn greet(_ctx: Arc<Context>, args: Greet) -> Result<String, RpcError> {
//!     if args.name.is_empty() {
//!         return Err(RpcError::new("InvalidArgument", "name is empty"));
//!     }
//!     Ok(format!("hello, {}", args.name))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rpcgate::Error> {
//!     let api = Api::new()
//!         .describe("greet", FunctionDescriptor::default())
//!         .implement("greet", greet);
//!
//!     Server::new(Config::default(), api).serve().await
//! }
//! ```

mod api;
mod codec;
mod config;
mod context;
mod error;
mod handler;
mod hooks;
mod registry;
mod reply;
mod request;
mod response;
mod server;

pub mod protocol;
pub mod targets;

pub use api::{Api, ApiDescription, FunctionDescriptor, TypeTable};
pub use codec::{Codec, CodecError, PassThrough};
pub use config::{Config, ConfigError, HeaderSet};
pub use context::Context;
pub use error::{Error, FATAL, RpcError};
pub use handler::{BoxFuture, Function, Handler};
pub use hooks::{Hooks, NoHooks};
pub use protocol::{CanonicalRequest, DeviceInfo, ProtocolVersion};
pub use registry::{HandlerRegistry, Matcher};
pub use reply::Reply;
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use server::Server;
pub use targets::{GenerateError, Generator, Target};
