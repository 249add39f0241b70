use hyper::client::HttpConnector;
use hyper::{Body, Client, Request, Response, StatusCode};
use tracing::{error, warn};

/// Signalled by a [`Director`] to short-circuit a request before it is
/// dialed upstream. Mirrors cancelling the request's context in the
/// original design; here it is just the `Err` arm of an ordinary
/// `Result`, so the engine can never forget to check it.
#[derive(Debug, Clone)]
pub struct Cancelled(pub String);

/// Rewrites an outbound request in place (scheme, host, path, query,
/// headers) before it is dialed upstream, or cancels it.
pub trait Director: Send + Sync {
    fn direct(&self, req: &mut Request<Body>) -> Result<(), Cancelled>;
}

impl<F> Director for F
where
    F: Fn(&mut Request<Body>) -> Result<(), Cancelled> + Send + Sync,
{
    fn direct(&self, req: &mut Request<Body>) -> Result<(), Cancelled> {
        self(req)
    }
}

/// A generic HTTP reverse proxy parameterized by a [`Director`]. Streams
/// response bodies and headers verbatim, including chunked transfer
/// encoding, since `hyper::Body` is passed straight through without
/// buffering.
#[derive(Clone)]
pub struct ReverseProxyEngine {
    client: Client<HttpConnector>,
}

impl Default for ReverseProxyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReverseProxyEngine {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Runs the director, then — unless it cancelled the request — dials
    /// upstream and returns the response unmodified. A cancelled request
    /// never reaches the upstream dial: this is the serve-guard admission
    /// check from the design, collapsed into the director's error path.
    pub async fn serve<D: Director>(&self, mut req: Request<Body>, director: &D) -> Response<Body> {
        if let Err(Cancelled(reason)) = director.direct(&mut req) {
            return admission_rejected(&reason);
        }
        self.dial(req).await
    }

    async fn dial(&self, req: Request<Body>) -> Response<Body> {
        let upstream = req.uri().clone();
        match self.client.request(req).await {
            Ok(resp) => resp,
            Err(err) => {
                error!(%upstream, error = %err, "upstream dial failed");
                diagnostic_response(format!("upstream dial failed: {err}"))
            }
        }
    }
}

fn admission_rejected(reason: &str) -> Response<Body> {
    warn!(%reason, "request rejected before upstream dial");
    diagnostic_response(reason.to_string())
}

fn diagnostic_response(message: String) -> Response<Body> {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header("content-type", "text/plain; charset=utf-8")
        .body(Body::from(message))
        .expect("status and header are always valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_director_short_circuits_before_dial() {
        let engine = ReverseProxyEngine::new();
        let director = |_: &mut Request<Body>| Err(Cancelled("no hop registered".into()));
        let req = Request::builder()
            .uri("http://127.0.0.1:1/unreachable")
            .body(Body::empty())
            .unwrap();
        let resp = engine.serve(req, &director).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
