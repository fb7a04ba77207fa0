//! Downloadable client/server sources generated from the interface
//! description.
//!
//! Source generation itself lives outside this crate; a [`Generator`] turns
//! an [`ApiDescription`] into the text of one [`Target`]. Installing one with
//! [`Server::generator`](crate::Server::generator) registers these routes:
//!
//! | Path | Target |
//! |---|---|
//! | `GET /targets/web/api.ts` | browser client |
//! | `GET /targets/node/api.ts` | node client |
//! | `GET /targets/node/server.ts` | node server stub |
//! | `GET /targets/flutter/api.dart` | mobile client |
//! | `GET /ast.json` | the description itself |

use std::sync::Arc;

use http::{Method, StatusCode};

use crate::api::ApiDescription;
use crate::registry::HandlerRegistry;
use crate::request::Request;
use crate::response::{ContentType, Response};

/// A generated artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    WebClient,
    NodeClient,
    NodeServer,
    DartClient,
}

impl Target {
    pub const ALL: [Target; 4] = [Self::WebClient, Self::NodeClient, Self::NodeServer, Self::DartClient];

    pub fn path(self) -> &'static str {
        match self {
            Self::WebClient  => "/targets/web/api.ts",
            Self::NodeClient => "/targets/node/api.ts",
            Self::NodeServer => "/targets/node/server.ts",
            Self::DartClient => "/targets/flutter/api.dart",
        }
    }
}

/// Why generation failed. The text is sent to the client verbatim.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct GenerateError(pub String);

/// Produces artifact sources.
pub trait Generator: Send + Sync + 'static {
    fn generate(&self, target: Target, api: &ApiDescription) -> Result<String, GenerateError>;
}

pub(crate) fn register(registry: &mut HandlerRegistry, generator: Arc<dyn Generator>, description: Arc<ApiDescription>) {
    for target in Target::ALL {
        let generator = Arc::clone(&generator);
        let description = Arc::clone(&description);
        registry.register(Method::GET, target.path(), move |_: Request| {
            let source = generator.generate(target, &description);
            async move { download(source.map(String::into_bytes).map_err(|e| e.to_string())) }
        });
    }

    registry.register(Method::GET, "/ast.json", move |_: Request| {
        let json = serde_json::to_vec(&*description);
        async move { download(json.map_err(|e| e.to_string())) }
    });
}

fn download(result: Result<Vec<u8>, String>) -> Response {
    match result {
        Ok(bytes) => Response::builder().bytes(ContentType::OctetStream, bytes),
        Err(message) => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .text(message),
    }
}
