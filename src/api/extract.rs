use axum::async_trait;
use axum::body::Body;
use axum::extract::FromRequest;
use axum::http::Request;
use serde::de::DeserializeOwned;
use serde_json::error::Category;

use crate::error::MiniHyperProxyError;

/// Request bodies over this size fail with `RequestUnmarshall` (422).
pub const MAX_BODY_BYTES: usize = 1_048_576;

/// A JSON body extractor mapping failures onto the control-plane error
/// taxonomy instead of axum's generic rejection types: malformed or
/// oversized bodies become `RequestUnmarshall`, JSON that parses but
/// doesn't match the expected shape becomes `BodyUnmarshall`.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S, Body> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = MiniHyperProxyError;

    async fn from_request(req: Request<Body>, _state: &S) -> Result<Self, Self::Rejection> {
        let bytes = hyper::body::to_bytes(req.into_body())
            .await
            .map_err(|_| MiniHyperProxyError::RequestUnmarshall)?;
        if bytes.len() > MAX_BODY_BYTES {
            return Err(MiniHyperProxyError::RequestUnmarshall);
        }
        serde_json::from_slice::<T>(&bytes)
            .map(ApiJson)
            .map_err(|err| match err.classify() {
                Category::Data => MiniHyperProxyError::BodyUnmarshall,
                Category::Syntax | Category::Eof | Category::Io => {
                    MiniHyperProxyError::RequestUnmarshall
                }
            })
    }
}
