use std::collections::BTreeMap;

use serde::Serialize;

/// Lifecycle state of a managed listener. `Serve()` transitions
/// `Down` → `Up`; `Stop()` transitions `Up` → `Down`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    Down,
    Up,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Down => "Down",
            Status::Up => "Up",
        }
    }
}

/// The `Type` discriminant in a [`ServerInfo`] projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServerKind {
    Proxy,
    Hopper,
}

impl ServerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerKind::Proxy => "Proxy",
            ServerKind::Hopper => "Hopper",
        }
    }
}

/// The `{Name, Type, Status, Port(s)}` projection returned by control-plane
/// GETs. `ports` holds one entry for a Proxy (`Port`) and two for a Hopper
/// (`IncomingPort`, `OutgoingPort`).
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Type")]
    pub kind: &'static str,
    #[serde(rename = "Status")]
    pub status: &'static str,
    #[serde(flatten)]
    pub ports: BTreeMap<String, String>,
}
