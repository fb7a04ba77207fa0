//! Lifecycle hooks supplied by the host application.
//!
//! Every method has a default, so a host implements only what it needs:
//!
//! ```rust
//! use rpcgate::{BoxFuture, Context, Hooks, Reply, RpcError};
//!
//! struct RequireToken;
//!
//! impl Hooks for RequireToken {
//!     fn on_request_start<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<Option<Reply>, RpcError>> {
//!         Box::pin(async move {
//!             if ctx.request.headers.contains_key("authorization") {
//!                 Ok(None)
//!             } else {
//!                 Ok(Some(Reply::Failure(RpcError::new("Unauthorized", "missing token"))))
//!             }
//!         })
//!     }
//! }
//! ```

use crate::context::Context;
use crate::error::RpcError;
use crate::handler::BoxFuture;
use crate::reply::Reply;

/// Callbacks invoked at fixed points of the request lifecycle.
///
/// For the two request hooks, `None` means "carry on" and `Some(reply)`
/// takes over: before the call it stands in for executing the function, after
/// the call it replaces the reply about to be written.
pub trait Hooks: Send + Sync + 'static {
    /// Answers the `GET` liveness probe. Errors and panics report `ok: false`.
    fn on_health_check(&self) -> BoxFuture<'_, Result<bool, RpcError>> {
        Box::pin(async { Ok(true) })
    }

    /// Runs before argument decoding. An error becomes the reply.
    fn on_request_start<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, Result<Option<Reply>, RpcError>> {
        Box::pin(async { Ok(None) })
    }

    /// Runs after the reply is known and before it is written.
    fn on_request_end<'a>(&'a self, _ctx: &'a Context, _reply: &'a Reply) -> BoxFuture<'a, Option<Reply>> {
        Box::pin(async { None })
    }
}

/// The hooks used when the host supplies none.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl Hooks for NoHooks {}
