use thiserror::Error;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("http transport used before a configuration was applied")]
    TransportNotPrepared,

    #[error("invalid header: {name}={value}")]
    InvalidHeader { name: String, value: String },

    #[error("invalid response: {message}")]
    InvalidResponse { message: String, body: String },

    #[error("no refresh token or authorization code available for a token exchange")]
    MissingGrant,

    #[error("configuration is frozen once authorization has started")]
    ConfigurationFrozen,

    #[error("credential was cleared while a token exchange was in flight")]
    CredentialCleared,

    #[error("token exchange failed with status {status}: {error} ({error_description})")]
    Exchange {
        status: u16,
        error: String,
        error_description: String,
    },

    #[error("request failed with status {status} after {attempts} attempt(s): {body}")]
    RequestFailed {
        status: u16,
        body: String,
        attempts: u8,
    },

    #[error("missing authorization code in callback url")]
    MissingAuthorizationCode,

    #[error("consent denied: {error} ({description})")]
    ConsentDenied { error: String, description: String },

    #[error("consent was abandoned before an authorization code arrived")]
    ConsentAbandoned,

    #[error("no authorization code arrived within {timeout:?}")]
    ConsentTimeout { timeout: std::time::Duration },

    #[error("no consent is waiting for an authorization code")]
    NoPendingConsent,

    #[error("a consent request is already waiting for an authorization code")]
    ConsentPending,

    #[cfg(feature = "local-server")]
    #[error("invalid redirect uri: {0}")]
    InvalidRedirectUri(String),

    #[cfg(feature = "local-server")]
    #[error("local server timed out after {timeout:?}")]
    LocalServerTimeout { timeout: std::time::Duration },
}

impl OAuthError {
    /// HTTP status carried by the error, if the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Exchange { status, .. } | Self::RequestFailed { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}
