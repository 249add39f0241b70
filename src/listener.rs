use std::convert::Infallible;
use std::net::{SocketAddr, TcpListener as StdTcpListener};

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::model::Status;

/// A single HTTP listener with start/stop lifecycle, shared by
/// [`crate::proxy_server::ProxyServer`] and the two sub-listeners of
/// [`crate::hopper_server::HopperServer`]. Binds synchronously so a
/// failure to acquire the port is reported to the caller before the
/// listener is considered running, matching `cmux-novnc-proxy`'s
/// `TcpListener::bind` + `set_nonblocking` + `Server::from_tcp` sequence.
pub struct ManagedListener {
    name: String,
    status: RwLock<Status>,
    control: tokio::sync::Mutex<Option<Control>>,
}

struct Control {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ManagedListener {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: RwLock::new(Status::Down),
            control: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn status(&self) -> Status {
        *self.status.read().await
    }

    /// Binds `addr` and serves every request through `handler`. Returns
    /// once the listener is bound and the accept loop has been spawned as
    /// a background task; does not wait for the listener to stop.
    pub async fn serve<F, Fut>(&self, addr: SocketAddr, handler: F) -> std::io::Result<SocketAddr>
    where
        F: Fn(Request<Body>) -> Fut + Clone + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Response<Body>, Infallible>> + Send + 'static,
    {
        let std_listener = StdTcpListener::bind(addr)?;
        std_listener.set_nonblocking(true)?;
        let local_addr = std_listener.local_addr()?;

        let make_svc = make_service_fn(move |_conn| {
            let handler = handler.clone();
            async move { Ok::<_, Infallible>(service_fn(handler)) }
        });

        let server = Server::from_tcp(std_listener)
            .map_err(std::io::Error::other)?
            .http1_only(true)
            .serve(make_svc);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let graceful = server.with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });

        let name = self.name.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                tracing::error!(server = %name, error = %err, "listener exited with error");
            }
        });

        *self.control.lock().await = Some(Control {
            shutdown: shutdown_tx,
            handle,
        });
        *self.status.write().await = Status::Up;
        info!(server = %self.name, addr = %local_addr, "listener up");
        Ok(local_addr)
    }

    /// Signals graceful shutdown and waits for in-flight requests to
    /// finish. A no-op (with a warning) if the listener is already down.
    pub async fn stop(&self) {
        let control = self.control.lock().await.take();
        match control {
            Some(Control { shutdown, handle }) => {
                let _ = shutdown.send(());
                let _ = handle.await;
                *self.status.write().await = Status::Down;
                info!(server = %self.name, "listener down");
            }
            None => {
                warn!(server = %self.name, "stop requested on a listener that is already down");
            }
        }
    }
}
