use std::future::Future;
use std::sync::OnceLock;

use reqwest::{
    Client, Method, RequestBuilder,
    header::{HeaderName, HeaderValue},
};
use url::Url;

use crate::{Configuration, OAuthError};

pub const USER_AGENT: &str = "User-Agent";
pub const X_SPARK_API_USER_AGENT: &str = "X-SparkApi-User-Agent";
pub const AUTHORIZATION: &str = "Authorization";

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Sets `name`, replacing any existing header of the same name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Status and body of a completed exchange. Any status counts as completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// The HTTP layer the client drives. Implementations own connection
/// handling, TLS and timeouts; an `Err` means no response was obtained.
pub trait HttpTransport: Send + Sync {
    /// Receives the frozen configuration before every call the client makes.
    fn prepare(&self, _config: &Configuration) -> Result<(), OAuthError> {
        Ok(())
    }

    fn send(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, OAuthError>> + Send;
}

/// reqwest-backed transport. Unless a client is supplied, the reqwest client
/// is built on the first `prepare`, from `user_agent`, `timeout` and
/// `use_tls` as they stand once the configuration is frozen.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    http: OnceLock<Client>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `http` as is; configuration transport options are ignored.
    pub fn with_http_client(http: Client) -> Self {
        Self {
            http: OnceLock::from(http),
        }
    }
}

fn build_client(config: &Configuration) -> Result<Client, OAuthError> {
    let mut builder = Client::builder()
        .user_agent(config.user_agent.clone())
        .https_only(config.use_tls);
    if let Some(timeout) = config.timeout {
        builder = builder.timeout(timeout);
    }
    Ok(builder.build()?)
}

impl HttpTransport for ReqwestTransport {
    fn prepare(&self, config: &Configuration) -> Result<(), OAuthError> {
        if self.http.get().is_none() {
            // Racing first calls build from the same frozen snapshot.
            let _ = self.http.set(build_client(config)?);
        }
        Ok(())
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, OAuthError> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let http = self.http.get().ok_or(OAuthError::TransportNotPrepared)?;
        let mut builder = http.request(method, url);
        builder = apply_headers(builder, &headers)?;
        builder = match &body {
            Some(RequestBody::Form(fields)) => builder.form(fields),
            Some(RequestBody::Json(value)) => builder.json(value),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

fn apply_headers(
    mut builder: RequestBuilder,
    headers: &[(String, String)],
) -> Result<RequestBuilder, OAuthError> {
    for (name, value) in headers {
        let name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| OAuthError::InvalidHeader {
                name: name.clone(),
                value: value.clone(),
            })?;
        let value = HeaderValue::from_str(value).map_err(|_| OAuthError::InvalidHeader {
            name: name.to_string(),
            value: value.clone(),
        })?;
        builder = builder.header(name, value);
    }
    Ok(builder)
}
