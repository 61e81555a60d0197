//! HTTP transport shared by the connector API clients.
//!
//! Every call checks the status explicitly: anything outside 2xx becomes a
//! [`ToolError`] carrying the status code and status text. There is no retry;
//! the calling agent decides whether to invoke the tool again.

use bytes::Bytes;
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::time::Duration;
use switchboard_core::{BinaryBlob, ToolError, ToolOutput, ToolResult};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::debug;
use url::Url;

const USER_AGENT: &str = concat!("switchboard/", env!("CARGO_PKG_VERSION"));

/// Everything except RFC 3986 unreserved characters.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// How requests authenticate against the upstream API.
#[derive(Clone)]
pub enum Auth {
    None,
    Bearer(String),
    Basic { username: String, password: String },
    /// Custom header, e.g. `X-Api-Key`.
    Header { name: String, value: String },
    /// Session cookie captured from a login flow.
    Cookie(String),
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print secret material.
        let kind = match self {
            Auth::None => "None",
            Auth::Bearer(_) => "Bearer(..)",
            Auth::Basic { .. } => "Basic(..)",
            Auth::Header { .. } => "Header(..)",
            Auth::Cookie(_) => "Cookie(..)",
        };
        f.write_str(kind)
    }
}

/// Resolved client settings for one upstream API.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub auth: Auth,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: &str, auth: Auth) -> ToolResult<Self> {
        // A trailing slash keeps `join` from dropping the last path segment.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized).map_err(|e| {
            ToolError::configuration(format!("Invalid base URL `{}`: {}", base_url, e))
        })?;

        Ok(Self {
            base_url,
            auth,
            timeout: Duration::from_secs(30),
        })
    }
}

/// Body of a successful upstream response, classified by content type.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Binary { bytes: Bytes, mime_type: String },
}

impl ResponseBody {
    /// Classify purely by `content-type`; absent or unrecognized types fall back to text.
    pub fn classify(content_type: Option<&str>, bytes: Bytes) -> Self {
        let Some(content_type) = content_type else {
            return Self::Text(String::from_utf8_lossy(&bytes).into_owned());
        };
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if mime == "application/json" || mime.ends_with("+json") {
            return match serde_json::from_slice(&bytes) {
                Ok(value) => Self::Json(value),
                Err(_) => Self::Text(String::from_utf8_lossy(&bytes).into_owned()),
            };
        }

        if is_binary_mime(&mime) {
            return Self::Binary {
                bytes,
                mime_type: mime,
            };
        }

        Self::Text(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn into_output(self) -> ToolOutput {
        match self {
            Self::Json(value) => ToolOutput::Json(value),
            Self::Text(text) => ToolOutput::Text(text),
            Self::Binary { bytes, mime_type } => {
                ToolOutput::Blob(BinaryBlob::from_bytes(&bytes, mime_type))
            }
        }
    }
}

fn is_binary_mime(mime: &str) -> bool {
    const BINARY_PREFIXES: [&str; 4] = ["image/", "audio/", "video/", "font/"];
    const BINARY_TYPES: [&str; 8] = [
        "application/octet-stream",
        "application/pdf",
        "application/zip",
        "application/gzip",
        "application/x-gzip",
        "application/x-tar",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ];

    BINARY_PREFIXES.iter().any(|p| mime.starts_with(p)) || BINARY_TYPES.contains(&mime)
}

/// A successful response with its headers.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl UpstreamResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// All `Set-Cookie` values reduced to `name=value` pairs.
    pub fn cookies(&self) -> Vec<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .map(|pair| pair.trim().to_string())
            .filter(|pair| pair.contains('=') && !pair.starts_with('='))
            .collect()
    }
}

/// Immutable HTTP client bound to one base URL and credential.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: ClientConfig,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> ToolResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ToolError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn base_url(&self) -> &Url {
        &self.config.base_url
    }

    /// Build a URL for the given path, relative to the base URL.
    fn build_url(&self, path: &str) -> ToolResult<Url> {
        self.config
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ToolError::internal(format!("Invalid request path `{}`: {}", path, e)))
    }

    fn request(&self, method: Method, path: &str) -> ToolResult<RequestBuilder> {
        let url = self.build_url(path)?;
        debug!(method = %method, url = %url, "Upstream request");

        let builder = self.client.request(method, url);
        let builder = match &self.config.auth {
            Auth::None => builder,
            Auth::Bearer(token) => builder.bearer_auth(token),
            Auth::Basic { username, password } => builder.basic_auth(username, Some(password)),
            Auth::Header { name, value } => builder.header(name.as_str(), value.as_str()),
            Auth::Cookie(cookie) => builder.header(header::COOKIE, cookie.as_str()),
        };
        Ok(builder)
    }

    /// Send and fail on anything outside 2xx.
    async fn send(&self, builder: RequestBuilder) -> ToolResult<Response> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), "Upstream returned error status");
        Err(ToolError::from_status(
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown Status"),
            &body,
        ))
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> ToolResult<T> {
        let bytes = response.bytes().await.map_err(transport_error)?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|e| {
                ToolError::internal(format!("Unexpected response from upstream: {}", e))
            })?
        };
        serde_json::from_value(value)
            .map_err(|e| ToolError::internal(format!("Unexpected response from upstream: {}", e)))
    }

    async fn into_upstream(response: Response) -> ToolResult<UpstreamResponse> {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(transport_error)?;

        Ok(UpstreamResponse {
            status,
            headers,
            body: ResponseBody::classify(content_type.as_deref(), bytes),
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ToolResult<T> {
        let response = self.send(self.request(Method::GET, path)?).await?;
        Self::decode(response).await
    }

    pub async fn get_with_query<T: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &Q,
    ) -> ToolResult<T> {
        let response = self
            .send(self.request(Method::GET, path)?.query(query))
            .await?;
        Self::decode(response).await
    }

    /// GET keeping headers and classifying the body by content type.
    pub async fn get_raw<Q: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &Q,
    ) -> ToolResult<UpstreamResponse> {
        let response = self
            .send(self.request(Method::GET, path)?.query(query))
            .await?;
        Self::into_upstream(response).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> ToolResult<T> {
        let response = self
            .send(self.request(Method::POST, path)?.json(body))
            .await?;
        Self::decode(response).await
    }

    /// Form-encoded POST keeping headers, for login flows.
    pub async fn post_form<B: Serialize + ?Sized>(
        &self,
        path: &str,
        form: &B,
    ) -> ToolResult<UpstreamResponse> {
        let response = self
            .send(self.request(Method::POST, path)?.form(form))
            .await?;
        Self::into_upstream(response).await
    }

    /// Fetch an absolute URL without credentials, e.g. a pre-signed download link.
    pub async fn fetch(&self, url: &str) -> ToolResult<UpstreamResponse> {
        let url = Url::parse(url)
            .map_err(|e| ToolError::internal(format!("Invalid download URL: {}", e)))?;
        debug!(url = %url, "Upstream download");

        let response = self.send(self.client.get(url)).await?;
        Self::into_upstream(response).await
    }
}

/// Encode a caller-supplied value for use as a single URL path segment.
///
/// Reserved characters are escaped, so `/`, `?` and `#` cannot change the
/// request target. Empty values and dot segments are rejected.
pub fn path_segment(field: &str, value: &str) -> ToolResult<String> {
    if matches!(value, "" | "." | "..") {
        return Err(ToolError::validation(format!(
            "{} must be a non-empty identifier, got `{}`",
            field, value
        )));
    }
    Ok(utf8_percent_encode(value, PATH_SEGMENT).to_string())
}

fn transport_error(e: reqwest::Error) -> ToolError {
    if e.is_timeout() {
        ToolError::Transport("request timed out".to_string())
    } else if e.is_connect() {
        ToolError::Transport(format!("could not connect to upstream: {}", e))
    } else {
        ToolError::Transport(e.to_string())
    }
}
