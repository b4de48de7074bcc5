use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::OAuthError;

/// Authorization code captured from the consent redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResponse {
    pub code: String,
}

impl AuthorizationResponse {
    /// Reads `code` from a redirect such as `https://host/callback?code=abc`.
    ///
    /// A redirect carrying `error` (the user declined, or the server refused
    /// the client) becomes [`OAuthError::ConsentDenied`].
    pub fn from_url(callback_url: &str) -> Result<Self, OAuthError> {
        let url = Url::parse(callback_url)?;
        let mut code = None;
        let mut error = None;
        let mut description = None;

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.to_string()),
                "error" => error = Some(value.to_string()),
                "error_description" => description = Some(value.to_string()),
                _ => {}
            }
        }

        if let Some(error) = error {
            return Err(OAuthError::ConsentDenied {
                error,
                description: description.unwrap_or_default(),
            });
        }

        match code {
            Some(code) if !code.is_empty() => Ok(Self { code }),
            _ => Err(OAuthError::MissingAuthorizationCode),
        }
    }
}

/// Successful token endpoint body.
///
/// Usual shape: `{"expires_in":86400,"refresh_token":"...","access_token":"..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Error body returned by the token endpoint on a non-200 status.
///
/// Usual shape: `{"error":"invalid_grant","error_description":"The access grant you supplied is invalid"}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenErrorResponse {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub error_description: String,
}

impl TokenErrorResponse {
    /// Lenient parse: an unparseable body still yields a diagnostic.
    pub fn from_body(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|_| Self {
            error: "unknown_error".to_string(),
            error_description: body.trim().to_string(),
        })
    }
}

/// Raw body of a successful resource call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, OAuthError> {
        serde_json::from_str(&self.body).map_err(|err| OAuthError::InvalidResponse {
            message: err.to_string(),
            body: self.body.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_url_parses_code() {
        let response =
            AuthorizationResponse::from_url("https://sparkplatform.com/oauth2/callback?code=abc123")
                .unwrap();
        assert_eq!(response.code, "abc123");
    }

    #[test]
    fn from_url_requires_code() {
        let result = AuthorizationResponse::from_url("http://localhost/callback?state=xyz");
        assert!(matches!(result, Err(OAuthError::MissingAuthorizationCode)));
    }

    #[test]
    fn from_url_surfaces_denied_consent() {
        let result = AuthorizationResponse::from_url(
            "http://localhost/callback?error=access_denied&error_description=User%20said%20no",
        );
        match result {
            Err(OAuthError::ConsentDenied { error, description }) => {
                assert_eq!(error, "access_denied");
                assert_eq!(description, "User said no");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn token_response_tolerates_missing_refresh_token() {
        let token: TokenResponse =
            serde_json::from_str(r#"{"access_token":"AT1","expires_in":3600}"#).unwrap();
        assert_eq!(token.access_token, "AT1");
        assert!(token.refresh_token.is_none());
        assert_eq!(token.expires_in, 3600);
    }

    #[test]
    fn error_response_falls_back_to_raw_body() {
        let parsed = TokenErrorResponse::from_body("<html>bad gateway</html>");
        assert_eq!(parsed.error, "unknown_error");
        assert_eq!(parsed.error_description, "<html>bad gateway</html>");

        let parsed = TokenErrorResponse::from_body(
            r#"{"error":"invalid_grant","error_description":"The access grant you supplied is invalid"}"#,
        );
        assert_eq!(parsed.error, "invalid_grant");
    }
}
