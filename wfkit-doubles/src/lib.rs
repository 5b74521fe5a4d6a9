//! Local stand-ins for the services a pipeline talks to.
//!
//! The HTTP doubles are reachable from the test process ([`HttpDouble::url`])
//! and from act's job containers ([`HttpDouble::container_url`]). They
//! record every request and stop when dropped. [`MockStorage`] is a plain
//! directory that the mocked upload steps copy into.

pub mod bridge;
pub mod registry;
pub mod server;
pub mod spy;
pub mod storage;

use std::path::PathBuf;

use thiserror::Error;

pub use bridge::{FALLBACK_GATEWAY, docker_bridge_gateway};
pub use registry::GcomMock;
pub use server::{DoubleState, HttpDouble, MockResponse, PathParams, RecordedRequest, RoutePattern};
pub use spy::HttpSpy;
pub use storage::{MockStorage, StorageView};

#[derive(Debug, Error)]
pub enum DoubleError {
    #[error("failed to bind HTTP double: {0}")]
    Bind(#[source] std::io::Error),

    #[error("failed to start HTTP double runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("invalid route pattern {pattern:?}: {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("path {0:?} escapes the storage root")]
    InvalidPath(String),

    #[error("{0} is not UTF-8")]
    NotText(PathBuf),
}
