//! Authenticated resource calls with one refresh-and-retry per call.

use reqwest::Method;
use tracing::{debug, info, warn};

use crate::credential::CredentialCell;
use crate::exchange::exchange;
use crate::transport::{AUTHORIZATION, USER_AGENT, X_SPARK_API_USER_AGENT};
use crate::{ApiResponse, Configuration, HttpRequest, HttpTransport, OAuthError, RequestBody};

/// Caller-supplied parts of a resource call.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    /// JSON body, sent for methods other than GET.
    pub body: Option<serde_json::Value>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Retry budget of one logical call. Never shared between calls.
#[derive(Debug, Default)]
struct RequestChain {
    retried: bool,
}

impl RequestChain {
    fn attempts(&self) -> u8 {
        if self.retried { 2 } else { 1 }
    }
}

pub(crate) fn build_request(
    config: &Configuration,
    method: &Method,
    path: &str,
    options: &RequestOptions,
    access_token: &str,
) -> Result<HttpRequest, OAuthError> {
    let url = config.resource_url(path, &options.query)?;
    let mut request = HttpRequest::new(method.clone(), url);
    for (name, value) in &options.headers {
        request.set_header(name, value.clone());
    }
    // Required headers win over caller headers of the same name.
    request.set_header(USER_AGENT, config.user_agent.clone());
    request.set_header(X_SPARK_API_USER_AGENT, config.user_agent.clone());
    request.set_header(AUTHORIZATION, format!("OAuth {access_token}"));
    if *method != Method::GET {
        request.body = options.body.clone().map(RequestBody::Json);
    }
    Ok(request)
}

/// Issues the call with the current access token. A non-200 answer buys
/// exactly one refresh and one retry; a second non-200 is final.
pub(crate) async fn send_authorized<T: HttpTransport>(
    transport: &T,
    config: &Configuration,
    cell: &CredentialCell,
    method: Method,
    path: &str,
    options: &RequestOptions,
) -> Result<ApiResponse, OAuthError> {
    let mut chain = RequestChain::default();

    loop {
        let access_token = cell.access_token();
        let request = build_request(config, &method, path, options, &access_token)?;

        debug!(%method, path, attempt = chain.attempts(), "requesting resource");
        let response = transport.send(request).await?;
        debug!(status = response.status, path, "resource responded");

        if response.status == 200 {
            return Ok(ApiResponse {
                status: response.status,
                body: response.body,
            });
        }

        let failure = OAuthError::RequestFailed {
            status: response.status,
            body: response.body,
            attempts: chain.attempts(),
        };

        if chain.retried {
            warn!(status = response.status, path, "retried authorization, but failed");
            return Err(failure);
        }
        chain.retried = true;

        info!(
            status = response.status,
            path, "re-establishing authorization before retrying"
        );
        if let Err(error) = refresh_rejected(transport, config, cell, &access_token).await {
            warn!(%error, path, "refresh failed, abandoning request");
            return Err(failure);
        }
    }
}

/// Refreshes after `rejected_token` was refused, unless another call
/// already replaced it while this one waited for the exchange guard.
async fn refresh_rejected<T: HttpTransport>(
    transport: &T,
    config: &Configuration,
    cell: &CredentialCell,
    rejected_token: &str,
) -> Result<(), OAuthError> {
    let _exchange = cell.lock_exchange().await;
    if cell.is_authorized() && cell.access_token() != rejected_token {
        debug!("access token already refreshed by a concurrent request");
        return Ok(());
    }
    exchange(transport, config, cell).await
}
