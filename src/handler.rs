//! Handler traits and type erasure.
//!
//! # How async callables are stored
//!
//! The server holds two kinds of user code: auxiliary route handlers
//! (`Request -> Response`) and remote-callable functions
//! (`(Arc<Context>, Args) -> Result<Ret, RpcError>`). Each kind comes in many
//! concrete types, so both are hidden behind a trait object and stored
//! uniformly.
//!
//! ```text
//! async fn ping(ctx: Arc<Context>, args: Value) -> Result<String, RpcError>
//!        ↓ api.implement("ping", ping)
//! ping.into_boxed_function()                    ← Function blanket impl
//!        ↓
//! Arc::new(FnFunction(ping))                     ← heap-allocated wrapper
//!        ↓  stored as BoxedFunction = Arc<dyn ErasedFunction>
//! function.call(ctx, json)  at request time      ← one vtable dispatch
//!        ↓
//! Box::pin(async { to_value(ping(ctx, from_value(json)?).await?) })
//! ```
//!
//! The JSON boundary lives inside the wrapper: argument values are
//! deserialized into the implementation's own type and its return value is
//! serialized back, so the dispatcher only ever sees `serde_json::Value`.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::context::Context;
use crate::error::RpcError;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// A heap-allocated, type-erased future.
///
/// `Send` lets tokio move the future across worker threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ── Auxiliary route handlers ──────────────────────────────────────────────────

#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture<'static, Response>;
}

#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Implemented for every valid auxiliary route handler.
///
/// Automatically satisfied for any `async fn(Request) -> impl IntoResponse`.
/// Sealed: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

// ── Remote-callable functions ─────────────────────────────────────────────────

#[doc(hidden)]
pub trait ErasedFunction {
    fn call(&self, ctx: Arc<Context>, args: Value) -> BoxFuture<'static, Result<Value, RpcError>>;
}

#[doc(hidden)]
pub type BoxedFunction = Arc<dyn ErasedFunction + Send + Sync + 'static>;

/// Implemented for every valid function implementation.
///
/// Automatically satisfied for any
/// `async fn(Arc<Context>, A) -> Result<R, RpcError>` where `A` is
/// deserializable and `R` serializable. `A` is a trait parameter because the
/// argument type is not determined by the closure type alone.
pub trait Function<A>: private::SealedFunction<A> + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_function(self) -> BoxedFunction;
}

mod private {
    pub trait Sealed {}
    pub trait SealedFunction<A> {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

impl<F, A, Fut, R> private::SealedFunction<A> for F
where
    F: Fn(Arc<Context>, A) -> Fut + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    Fut: Future<Output = Result<R, RpcError>> + Send + 'static,
    R: Serialize + Send + 'static,
{
}

impl<F, A, Fut, R> Function<A> for F
where
    F: Fn(Arc<Context>, A) -> Fut + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    Fut: Future<Output = Result<R, RpcError>> + Send + 'static,
    R: Serialize + Send + 'static,
{
    fn into_boxed_function(self) -> BoxedFunction {
        Arc::new(FnFunction(self, PhantomData))
    }
}

// ── Concrete wrappers ─────────────────────────────────────────────────────────

struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<'static, Response> {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}

// `fn(A)` keeps the wrapper Send + Sync whatever `A` is.
struct FnFunction<F, A>(F, PhantomData<fn(A)>);

impl<F, A, Fut, R> ErasedFunction for FnFunction<F, A>
where
    F: Fn(Arc<Context>, A) -> Fut + Send + Sync,
    A: DeserializeOwned + Send + 'static,
    Fut: Future<Output = Result<R, RpcError>> + Send + 'static,
    R: Serialize + Send + 'static,
{
    fn call(&self, ctx: Arc<Context>, args: Value) -> BoxFuture<'static, Result<Value, RpcError>> {
        let args: A = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(e) => return Box::pin(async move { Err(RpcError::from(e)) }),
        };
        let fut = (self.0)(ctx, args);
        Box::pin(async move {
            let ret = fut.await?;
            Ok(serde_json::to_value(ret)?)
        })
    }
}
