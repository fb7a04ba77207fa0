//! Minimal rpcgate example: two functions, an auth hook and a health check.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -X POST http://localhost:8000/ \
//!        -d '{"version":3,"name":"add","args":{"a":1,"b":2}}'
//!   curl -X POST http://localhost:8000/ \
//!        -d '{"id":"r1","name":"ping","args":{}}'
//!   curl http://localhost:8000/

use std::sync::Arc;

use rpcgate::{Api, BoxFuture, Config, Context, FunctionDescriptor, Hooks, Reply, RpcError, Server};
use serde::Deserialize;
use serde_json::Value;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), rpcgate::Error> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "rpcgate=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let api = Api::new()
        .describe("ping", FunctionDescriptor::default())
        .describe("add", FunctionDescriptor::default())
        .implement("ping", ping)
        .implement("add", add);

    Server::new(Config::default(), api)
        .hooks(BlockList)
        .serve()
        .await
}

async fn ping(_ctx: Arc<Context>, _args: Value) -> Result<&'static str, RpcError> {
    Ok("pong")
}

#[derive(Deserialize)]
struct AddArgs {
    a: i64,
    b: i64,
}

async fn add(_ctx: Arc<Context>, args: AddArgs) -> Result<i64, RpcError> {
    args.a.checked_add(args.b).ok_or_else(|| RpcError::new("Overflow", "sum does not fit in i64"))
}

// Rejects calls from one address before the function runs.
struct BlockList;

impl Hooks for BlockList {
    fn on_request_start<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<Option<Reply>, RpcError>> {
        Box::pin(async move {
            if ctx.ip == "192.0.2.1" {
                return Ok(Some(Reply::Failure(RpcError::new("Forbidden", "blocked"))));
            }
            Ok(None)
        })
    }
}
