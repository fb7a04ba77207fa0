//! Argument/result coding boundary.
//!
//! The schema-driven type checker is not part of this crate. The dispatcher
//! hands it the service's type table, a path for error messages, the type to
//! check against and the value, and gets back either the (possibly
//! transformed) value or a [`CodecError`].

use serde_json::Value;

use crate::api::TypeTable;
use crate::error::RpcError;

/// A schema violation. Always reported to the caller as a `Fatal` error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CodecError(pub String);

impl From<CodecError> for RpcError {
    fn from(e: CodecError) -> Self {
        RpcError::fatal(e.0)
    }
}

/// Schema-driven value codec.
pub trait Codec: Send + Sync + 'static {
    /// Checks and converts a wire value into its in-process form.
    fn decode(&self, types: &TypeTable, path: &str, ty: &Value, value: Value) -> Result<Value, CodecError>;

    /// Checks and converts a return value into its wire form.
    fn encode(&self, types: &TypeTable, path: &str, ty: &Value, value: Value) -> Result<Value, CodecError>;
}

/// Accepts every value unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThrough;

impl Codec for PassThrough {
    fn decode(&self, _: &TypeTable, _: &str, _: &Value, value: Value) -> Result<Value, CodecError> {
        Ok(value)
    }

    fn encode(&self, _: &TypeTable, _: &str, _: &Value, value: Value) -> Result<Value, CodecError> {
        Ok(value)
    }
}
