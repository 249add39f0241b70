//! Control-plane and data-plane for a fleet of HTTP reverse proxies and
//! multi-hop tunnels.
//!
//! [`Supervisor`] owns the registry of running servers and is the entry
//! point for both the CLI bootstrap and the REST control plane built by
//! [`api::build_router`].

pub mod api;
pub mod error;
pub mod hopper_server;
mod listener;
mod model;
pub mod proxy_server;
mod reverse_proxy;
mod rewriter;
pub mod supervisor;

pub use error::{MiniHyperProxyError, Result};
pub use hopper_server::HopperServer;
pub use model::{ServerInfo, ServerKind, Status};
pub use proxy_server::ProxyServer;
pub use supervisor::{PortConfig, Supervisor};
