//! Function table: interface description plus implementations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::handler::{BoxedFunction, Function};

/// Named type definitions the codec resolves type references against.
pub type TypeTable = Map<String, Value>;

/// Argument and return types of one function, as opaque codec descriptors.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub ret: Value,
}

/// The service's interface description.
///
/// Served as-is at `/ast.json` and handed to source generators.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDescription {
    #[serde(default)]
    pub type_table: TypeTable,
    #[serde(default)]
    pub function_table: HashMap<String, FunctionDescriptor>,
}

impl ApiDescription {
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Description plus the implementation of each function.
///
/// Descriptors and implementations are registered separately; a call needs
/// both to exist.
///
/// ```rust
/// use std::sync::Arc;
/// use rpcgate::{Api, Context, FunctionDescriptor, RpcError};
/// use serde_json::Value;
///
/// async fn ping(_ctx: Arc<Context>, _args: Value) -> Result<&'static str, RpcError> {
///     Ok("pong")
/// }
///
/// let api = Api::new()
///     .describe("ping", FunctionDescriptor::default())
///     .implement("ping", ping);
/// ```
#[derive(Default)]
pub struct Api {
    description: ApiDescription,
    implementations: HashMap<String, BoxedFunction>,
}

impl Api {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_description(description: ApiDescription) -> Self {
        Self { description, implementations: HashMap::new() }
    }

    /// Adds or replaces a function descriptor.
    pub fn describe(mut self, name: &str, descriptor: FunctionDescriptor) -> Self {
        self.description.function_table.insert(name.to_owned(), descriptor);
        self
    }

    /// Adds or replaces a function implementation.
    pub fn implement<A>(mut self, name: &str, function: impl Function<A>) -> Self {
        self.implementations.insert(name.to_owned(), function.into_boxed_function());
        self
    }

    pub fn description(&self) -> &ApiDescription {
        &self.description
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<(&FunctionDescriptor, &BoxedFunction)> {
        let descriptor = self.description.function_table.get(name)?;
        let implementation = self.implementations.get(name)?;
        Some((descriptor, implementation))
    }
}
