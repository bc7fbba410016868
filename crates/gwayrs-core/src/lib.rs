pub mod auth;
pub mod bootstrap;
pub mod classify;
pub mod client_ip;
pub mod dialect_ops;
pub mod error;
pub mod resolver;
pub mod retry;
pub mod state;
pub mod stream_tee;
pub mod upstream_client;

pub use auth::{authenticate, AuthContext};
pub use bootstrap::{bootstrap, bootstrap_from_env, AppConfig, Bootstrap, CliArgs};
pub use classify::{classify, Route};
pub use client_ip::resolve_client_ip;
pub use dialect_ops::CallKind;
pub use error::ProxyError;
pub use resolver::{resolve, LogicalModelMeta, ResolvedCandidates};
pub use retry::{dispatch, DispatchOutcome, RequestContext};
pub use state::AppState;
pub use stream_tee::{finish_nonstream, response_headers, tee_stream, StreamTee};
