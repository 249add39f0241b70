use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;
use url::Url;

use crate::error::{MiniHyperProxyError, Result};
use crate::hopper_server::HopperServer;
use crate::model::{ServerInfo, ServerKind};
use crate::proxy_server::ProxyServer;

const DEFAULT_HOSTNAME: &str = "localhost";

/// One managed server, polymorphic across the two kinds the Supervisor
/// can own. Typed accessors on [`Supervisor`] perform the tag check and
/// return [`MiniHyperProxyError::WrongServerType`] on mismatch, rather
/// than modeling this with inheritance.
pub enum Server {
    Proxy(Arc<ProxyServer>),
    Hopper(Arc<HopperServer>),
}

impl Server {
    async fn info(&self) -> ServerInfo {
        match self {
            Server::Proxy(p) => p.info().await,
            Server::Hopper(h) => h.info().await,
        }
    }

    fn kind(&self) -> ServerKind {
        match self {
            Server::Proxy(_) => ServerKind::Proxy,
            Server::Hopper(_) => ServerKind::Hopper,
        }
    }

    async fn stop(&self) {
        match self {
            Server::Proxy(p) => p.stop().await,
            Server::Hopper(h) => h.stop().await,
        }
    }
}

/// Initial values for the three port counters, read once from
/// `PROXY_SERVER` / `HOPPER_SERVER_INCOMING` / `HOPPER_SERVER_OUTGOING`
/// with the documented fallbacks.
#[derive(Debug, Clone, Copy)]
pub struct PortConfig {
    pub proxy: u16,
    pub hopper_incoming: u16,
    pub hopper_outgoing: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            proxy: 7053,
            hopper_incoming: 7053,
            hopper_outgoing: 7054,
        }
    }
}

impl PortConfig {
    pub fn from_env() -> Self {
        Self {
            proxy: read_env_port("PROXY_SERVER", 7053),
            hopper_incoming: read_env_port("HOPPER_SERVER_INCOMING", 7053),
            hopper_outgoing: read_env_port("HOPPER_SERVER_OUTGOING", 7054),
        }
    }
}

fn read_env_port(key: &str, fallback: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

struct PortCounters {
    next_proxy: u16,
    next_hopper_incoming: u16,
    next_hopper_outgoing: u16,
}

/// Owns the named-server registry and the port allocator. Port allocation
/// combines peek and commit into a single locked critical section: the
/// two-call peek-then-commit pattern described in older drafts of this
/// design is a refactor artifact and is not reproduced here.
pub struct Supervisor {
    servers: Mutex<HashMap<String, Server>>,
    bound: Mutex<BTreeSet<String>>,
    counters: Mutex<PortCounters>,
}

impl Supervisor {
    pub fn new(ports: PortConfig) -> Self {
        Self {
            servers: Mutex::new(HashMap::new()),
            bound: Mutex::new(BTreeSet::new()),
            counters: Mutex::new(PortCounters {
                next_proxy: ports.proxy,
                next_hopper_incoming: ports.hopper_incoming,
                next_hopper_outgoing: ports.hopper_outgoing,
            }),
        }
    }

    fn default_hostname(hostname: &str) -> String {
        if hostname.is_empty() {
            DEFAULT_HOSTNAME.to_string()
        } else {
            hostname.to_string()
        }
    }

    async fn reserve_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(MiniHyperProxyError::EmptyField);
        }
        let servers = self.servers.lock().await;
        if servers.contains_key(name) {
            return Err(MiniHyperProxyError::ServerNameAlreadyExists);
        }
        Ok(())
    }

    pub async fn start_proxy_server(&self, name: &str, hostname: &str) -> Result<u16> {
        self.reserve_name(name).await?;
        let hostname = Self::default_hostname(hostname);

        let port = {
            let mut counters = self.counters.lock().await;
            loop {
                let candidate = counters.next_proxy;
                let key = format!("{hostname}:{candidate}");
                let mut bound = self.bound.lock().await;
                if bound.contains(&key) {
                    counters.next_proxy += 1;
                    continue;
                }
                bound.insert(key);
                counters.next_proxy += 1;
                break candidate;
            }
        };

        let server = Arc::new(ProxyServer::new(name, hostname, port));
        server.serve().await.map_err(|_| MiniHyperProxyError::ServerHostnamePortTaken)?;
        self.servers
            .lock()
            .await
            .insert(name.to_string(), Server::Proxy(server));
        Ok(port)
    }

    pub async fn start_hopper_server(&self, name: &str, hostname: &str) -> Result<(u16, u16)> {
        self.reserve_name(name).await?;
        let hostname = Self::default_hostname(hostname);

        let (incoming, outgoing) = {
            let mut counters = self.counters.lock().await;
            let mut bound = self.bound.lock().await;

            let incoming = loop {
                let candidate = counters.next_hopper_incoming;
                counters.next_hopper_incoming += 1;
                let key = format!("{hostname}:{candidate}");
                if bound.contains(&key) {
                    continue;
                }
                bound.insert(key);
                break candidate;
            };
            let outgoing = loop {
                let candidate = counters.next_hopper_outgoing;
                counters.next_hopper_outgoing += 1;
                let key = format!("{hostname}:{candidate}");
                if bound.contains(&key) {
                    continue;
                }
                bound.insert(key);
                break candidate;
            };
            (incoming, outgoing)
        };

        let server = Arc::new(HopperServer::new(name, hostname, incoming, outgoing));
        server
            .serve()
            .await
            .map_err(|_| MiniHyperProxyError::ServerHostnamePortTaken)?;
        self.servers
            .lock()
            .await
            .insert(name.to_string(), Server::Hopper(server));
        Ok((incoming, outgoing))
    }

    pub async fn stop_server(&self, name: &str) -> Result<()> {
        let servers = self.servers.lock().await;
        let server = servers.get(name).ok_or(MiniHyperProxyError::NoServerFound)?;
        server.stop().await;
        Ok(())
    }

    async fn get_proxy(&self, name: &str) -> Result<Arc<ProxyServer>> {
        let servers = self.servers.lock().await;
        match servers.get(name) {
            Some(Server::Proxy(p)) => Ok(p.clone()),
            Some(Server::Hopper(_)) => Err(MiniHyperProxyError::WrongServerType),
            None => Err(MiniHyperProxyError::NoServerFound),
        }
    }

    async fn get_hopper(&self, name: &str) -> Result<Arc<HopperServer>> {
        let servers = self.servers.lock().await;
        match servers.get(name) {
            Some(Server::Hopper(h)) => Ok(h.clone()),
            Some(Server::Proxy(_)) => Err(MiniHyperProxyError::WrongServerType),
            None => Err(MiniHyperProxyError::NoServerFound),
        }
    }

    pub async fn add_proxy_redirect(&self, name: &str, path: &str, target: Url) -> Result<()> {
        let proxy = self.get_proxy(name).await?;
        proxy.new_proxy(path, target).await;
        Ok(())
    }

    pub async fn delete_proxy_redirect(&self, name: &str, path: &str) -> Result<()> {
        let proxy = self.get_proxy(name).await?;
        proxy.delete_proxy(path).await;
        Ok(())
    }

    pub async fn add_hop(&self, name: &str, target: Url, hop: Url) -> Result<()> {
        let hopper = self.get_hopper(name).await?;
        hopper.build_new_outgoing_hop(target, hop).await;
        Ok(())
    }

    pub async fn receive_hop(&self, name: &str, target: Url, hop: Url) -> Result<()> {
        let hopper = self.get_hopper(name).await?;
        hopper.build_new_incoming_hop(target, hop).await;
        Ok(())
    }

    pub async fn get_outgoing_hops(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let hopper = self.get_hopper(name).await?;
        Ok(hopper.outgoing_hops_snapshot().await)
    }

    pub async fn get_incoming_hops(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let hopper = self.get_hopper(name).await?;
        Ok(hopper.incoming_hops_snapshot().await)
    }

    pub async fn get_proxy_map(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let proxy = self.get_proxy(name).await?;
        Ok(proxy.proxy_map().await)
    }

    pub async fn get_servers_info(&self) -> Vec<ServerInfo> {
        let servers = self.servers.lock().await;
        let mut infos = Vec::with_capacity(servers.len());
        for server in servers.values() {
            infos.push(server.info().await);
        }
        infos
    }

    pub async fn get_proxies_info(&self) -> Vec<ServerInfo> {
        self.filter_info(ServerKind::Proxy).await
    }

    pub async fn get_hoppers_info(&self) -> Vec<ServerInfo> {
        self.filter_info(ServerKind::Hopper).await
    }

    async fn filter_info(&self, kind: ServerKind) -> Vec<ServerInfo> {
        let servers = self.servers.lock().await;
        let mut infos = Vec::new();
        for server in servers.values() {
            if server.kind() == kind {
                infos.push(server.info().await);
            }
        }
        infos
    }

    pub async fn get_server_info(&self, name: &str) -> Result<ServerInfo> {
        let servers = self.servers.lock().await;
        let server = servers.get(name).ok_or(MiniHyperProxyError::NoServerFound)?;
        Ok(server.info().await)
    }

    pub async fn get_proxy_info(&self, name: &str) -> Result<ServerInfo> {
        let proxy = self.get_proxy(name).await?;
        Ok(proxy.info().await)
    }

    pub async fn get_hopper_info(&self, name: &str) -> Result<ServerInfo> {
        let hopper = self.get_hopper(name).await?;
        Ok(hopper.info().await)
    }
}
