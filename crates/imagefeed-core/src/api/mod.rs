mod error;
mod transport;

pub use error::{ApiError, ApiResult, TransportError};
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};

use serde::de::DeserializeOwned;

/// Execute `request` and return the body of a 2xx response.
pub async fn send(transport: &dyn Transport, request: ApiRequest) -> ApiResult<Vec<u8>> {
    let method = request.method.clone();
    let url = request.url.clone();
    tracing::debug!(%method, %url, "sending request");

    let response = transport.execute(request).await?;
    if !response.status.is_success() {
        let body = String::from_utf8_lossy(&response.body).into_owned();
        tracing::debug!(%method, %url, status = %response.status, "request rejected");
        return Err(ApiError::HttpStatus {
            status: response.status,
            body,
        });
    }
    Ok(response.body)
}

/// Decode a JSON payload returned by [`send`].
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::InvalidResponse("empty body".into()));
    }
    serde_json::from_slice(body).map_err(ApiError::from)
}
