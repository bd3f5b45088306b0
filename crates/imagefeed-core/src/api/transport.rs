use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use url::Url;

use super::{ApiError, ApiResult, TransportError};

const USER_AGENT: &str = "imagefeed/0.1.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A fully built HTTP request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<Vec<u8>>,
}

impl ApiRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    pub fn accept_json(self) -> Self {
        self.header("Accept", "application/json")
    }

    /// Attach an `application/x-www-form-urlencoded` body.
    pub fn form<'a, I>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        self.body = Some(encoded.into_bytes());
        self.header(
            "Content-Type",
            "application/x-www-form-urlencoded; charset=utf-8",
        )
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn query_value(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

/// Raw response: status plus body bytes.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Executes one request.
///
/// Implementations must be cancel-safe: callers cancel an in-flight call by
/// dropping (aborting) the future returned by `execute`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    pub fn new() -> ApiResult<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| ApiError::Transport(err.into()))?;
        Ok(Self { http })
    }

    fn header_map(headers: &[(&'static str, String)]) -> Result<HeaderMap, TransportError> {
        let mut map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            let key = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
                TransportError::Connection(format!("invalid header name {name}: {err}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|err| {
                TransportError::Connection(format!("invalid header value for {name}: {err}"))
            })?;
            map.append(key, value);
        }
        Ok(map)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let headers = Self::header_map(&request.headers)?;
        let mut builder = self
            .http
            .request(request.method, request.url)
            .headers(headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        Ok(ApiResponse::new(status, body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn forwards_method_headers_and_body() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/oauth/token")
                .header("content-type", "application/x-www-form-urlencoded; charset=utf-8")
                .header("accept", "application/json")
                .body_contains("grant_type=authorization_code")
                .body_contains("redirect_uri=imagefeed%3A%2F%2Fauth");
            then.status(200).body("{\"ok\":true}");
        });

        let transport = ReqwestTransport::new().unwrap();
        let request = ApiRequest::post(Url::parse(&server.url("/oauth/token")).unwrap())
            .accept_json()
            .form([
                ("grant_type", "authorization_code"),
                ("redirect_uri", "imagefeed://auth"),
            ]);
        let response = transport.execute(request).await.unwrap();

        mock.assert();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, b"{\"ok\":true}");
    }

    #[tokio::test]
    async fn non_success_status_is_not_a_transport_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(DELETE).path("/photos/p1/like");
            then.status(403).body("forbidden");
        });

        let transport = ReqwestTransport::new().unwrap();
        let request = ApiRequest::new(
            Method::DELETE,
            Url::parse(&server.url("/photos/p1/like")).unwrap(),
        );
        let response = transport.execute(request).await.unwrap();
        assert_eq!(response.status, StatusCode::FORBIDDEN);
        assert_eq!(response.body, b"forbidden");
    }

    #[tokio::test]
    async fn unreachable_host_maps_to_connection_error() {
        let transport = ReqwestTransport::new().unwrap();
        let request = ApiRequest::get(Url::parse("http://127.0.0.1:1/photos").unwrap());
        let err = transport.execute(request).await.unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }

    #[test]
    fn bearer_and_query_helpers() {
        let url = Url::parse("https://x.test/photos?page=2&per_page=10").unwrap();
        let request = ApiRequest::get(url).bearer("tok");
        assert_eq!(request.header_value("authorization"), Some("Bearer tok"));
        assert_eq!(request.query_value("page").as_deref(), Some("2"));
        assert_eq!(request.query_value("missing"), None);
    }
}
