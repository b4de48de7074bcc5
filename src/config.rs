use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::OAuthError;

const DEFAULT_API_KEY: &str = "YourAPIKey";
const DEFAULT_API_SECRET: &str = "YourAPISecret";
const DEFAULT_ENDPOINT: &str = "https://developers.sparkapi.com";
const DEFAULT_AUTH_ENDPOINT: &str = "https://sparkplatform.com/oauth2";
const DEFAULT_AUTH_GRANT_URL: &str = "https://api.sparkapi.com/v1/oauth2/grant";
const DEFAULT_CALLBACK: &str = "https://sparkplatform.com/oauth2/callback";
const DEFAULT_API_VERSION: &str = "v1";
const DEFAULT_USER_AGENT: &str = concat!("Spark API Rust Client ", env!("CARGO_PKG_VERSION"));

/// Encoding of the token endpoint body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenRequestFormat {
    Json,
    #[default]
    Form,
}

/// Client settings. Frozen by the owning client once authorization starts.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub api_key: String,
    pub api_secret: String,
    /// Base URL for resource calls.
    pub endpoint: String,
    /// Consent page the user is sent to.
    pub auth_endpoint: String,
    /// Token endpoint used for both grants.
    pub auth_grant_url: String,
    /// Redirect URI registered with the authorization server.
    pub callback: String,
    pub api_version: String,
    pub user_agent: String,
    pub use_tls: bool,
    pub timeout: Option<Duration>,
    /// How long to wait for the consent collaborator to report a code.
    pub consent_timeout: Option<Duration>,
    pub token_request_format: TokenRequestFormat,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            api_key: DEFAULT_API_KEY.to_string(),
            api_secret: DEFAULT_API_SECRET.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            auth_endpoint: DEFAULT_AUTH_ENDPOINT.to_string(),
            auth_grant_url: DEFAULT_AUTH_GRANT_URL.to_string(),
            callback: DEFAULT_CALLBACK.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            use_tls: true,
            timeout: None,
            consent_timeout: None,
            token_request_format: TokenRequestFormat::Form,
        }
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .field("auth_endpoint", &self.auth_endpoint)
            .field("auth_grant_url", &self.auth_grant_url)
            .field("callback", &self.callback)
            .field("api_version", &self.api_version)
            .field("user_agent", &self.user_agent)
            .field("use_tls", &self.use_tls)
            .field("timeout", &self.timeout)
            .field("consent_timeout", &self.consent_timeout)
            .field("token_request_format", &self.token_request_format)
            .finish()
    }
}

impl Configuration {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            ..Self::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_auth_endpoint(mut self, auth_endpoint: impl Into<String>) -> Self {
        self.auth_endpoint = auth_endpoint.into();
        self
    }

    pub fn with_auth_grant_url(mut self, auth_grant_url: impl Into<String>) -> Self {
        self.auth_grant_url = auth_grant_url.into();
        self
    }

    pub fn with_callback(mut self, callback: impl Into<String>) -> Self {
        self.callback = callback.into();
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_consent_timeout(mut self, timeout: Duration) -> Self {
        self.consent_timeout = Some(timeout);
        self
    }

    pub fn with_token_request_format(mut self, format: TokenRequestFormat) -> Self {
        self.token_request_format = format;
        self
    }

    /// URL the user must visit to grant access.
    pub fn consent_url(&self) -> Result<String, OAuthError> {
        let mut url = Url::parse(&self.auth_endpoint)?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.api_key)
            .append_pair("redirect_uri", &self.callback);
        Ok(url.to_string())
    }

    /// `<endpoint>/<api_version><path>` with `query` appended.
    pub fn resource_url(&self, path: &str, query: &[(String, String)]) -> Result<Url, OAuthError> {
        let base = format!(
            "{}/{}{}",
            self.endpoint.trim_end_matches('/'),
            self.api_version,
            normalize_path(path)
        );
        let mut url = Url::parse(&base)?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

fn normalize_path(path: &str) -> String {
    if path.is_empty() || path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
