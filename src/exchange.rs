//! Authorization-code and refresh-token grants against the token endpoint.

use reqwest::Method;
use tracing::{debug, info, warn};
use url::Url;

use crate::credential::{Applied, CredentialCell};
use crate::transport::{USER_AGENT, X_SPARK_API_USER_AGENT};
use crate::{
    Configuration, Credential, HttpRequest, HttpTransport, OAuthError, RequestBody,
    TokenErrorResponse, TokenRequestFormat, TokenResponse,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    AuthorizationCode(String),
    RefreshToken(String),
}

impl Grant {
    /// Refresh when already authorized, otherwise redeem a pending code.
    pub fn select(credential: &Credential) -> Result<Self, OAuthError> {
        if credential.is_authorized() {
            return Ok(Self::RefreshToken(credential.refresh_token.clone()));
        }
        match credential.authorization_code.as_deref() {
            Some(code) if !code.is_empty() => Ok(Self::AuthorizationCode(code.to_string())),
            _ => Err(OAuthError::MissingGrant),
        }
    }

    pub fn grant_type(&self) -> &'static str {
        match self {
            Self::AuthorizationCode(_) => "authorization_code",
            Self::RefreshToken(_) => "refresh_token",
        }
    }
}

pub fn token_payload(config: &Configuration, grant: &Grant) -> Vec<(String, String)> {
    let mut payload = vec![
        ("client_id".to_string(), config.api_key.clone()),
        ("client_secret".to_string(), config.api_secret.clone()),
        ("redirect_uri".to_string(), config.callback.clone()),
    ];
    match grant {
        Grant::AuthorizationCode(code) => payload.push(("code".to_string(), code.clone())),
        Grant::RefreshToken(token) => payload.push(("refresh_token".to_string(), token.clone())),
    }
    payload.push(("grant_type".to_string(), grant.grant_type().to_string()));
    payload
}

pub(crate) fn token_request(
    config: &Configuration,
    grant: &Grant,
) -> Result<HttpRequest, OAuthError> {
    let payload = token_payload(config, grant);
    let mut request = HttpRequest::new(Method::POST, Url::parse(&config.auth_grant_url)?);
    request.set_header(USER_AGENT, config.user_agent.clone());
    request.set_header(X_SPARK_API_USER_AGENT, config.user_agent.clone());
    request.body = Some(match config.token_request_format {
        TokenRequestFormat::Form => RequestBody::Form(payload),
        TokenRequestFormat::Json => RequestBody::Json(serde_json::Value::Object(
            payload
                .into_iter()
                .map(|(key, value)| (key, serde_json::Value::String(value)))
                .collect(),
        )),
    });
    Ok(request)
}

/// Runs one exchange using whichever grant the credential allows.
///
/// Callers hold the cell's exchange guard. Nothing here retries.
pub(crate) async fn exchange<T: HttpTransport>(
    transport: &T,
    config: &Configuration,
    cell: &CredentialCell,
) -> Result<(), OAuthError> {
    let (credential, epoch) = cell.snapshot_with_epoch();
    let grant = Grant::select(&credential)?;
    let request = token_request(config, &grant)?;

    let _refreshing = match grant {
        Grant::RefreshToken(_) => Some(cell.refreshing()),
        Grant::AuthorizationCode(_) => {
            // Codes are single use, whatever the outcome.
            cell.take_code();
            None
        }
    };

    debug!(grant_type = grant.grant_type(), "requesting tokens");
    let response = transport.send(request).await?;

    if response.status != 200 {
        let error = TokenErrorResponse::from_body(&response.body);
        cell.mark_failed();
        warn!(
            status = response.status,
            grant_type = grant.grant_type(),
            error = %error.error,
            description = %error.error_description,
            "token exchange failed"
        );
        return Err(OAuthError::Exchange {
            status: response.status,
            error: error.error,
            error_description: error.error_description,
        });
    }

    let token: TokenResponse = match serde_json::from_str(&response.body) {
        Ok(token) => token,
        Err(err) => {
            cell.mark_failed();
            return Err(OAuthError::InvalidResponse {
                message: err.to_string(),
                body: response.body,
            });
        }
    };
    let expires_in = token.expires_in;

    match cell.apply_tokens(epoch, token) {
        Applied::Stored => {
            info!(
                grant_type = grant.grant_type(),
                expires_in, "client is now authorized"
            );
            Ok(())
        }
        Applied::Stale => {
            warn!("discarding tokens issued for a cleared credential");
            Err(OAuthError::CredentialCleared)
        }
        Applied::Incomplete => Err(OAuthError::InvalidResponse {
            message: "token response is missing an access or refresh token".to_string(),
            body: response.body,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::AuthState;
    use crate::test_support::ScriptedTransport;

    fn config() -> Configuration {
        Configuration::new("key", "secret")
            .with_callback("https://sparkplatform.com/oauth2/callback")
            .with_auth_grant_url("https://api.example.test/v1/oauth2/grant")
    }

    fn authorized_cell(access: &str, refresh: &str) -> CredentialCell {
        CredentialCell::new(Credential {
            authorization_code: None,
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
            expires_in: 3600,
            authorized: true,
        })
    }

    fn form(request: &HttpRequest) -> HashMap<String, String> {
        match &request.body {
            Some(RequestBody::Form(fields)) => fields.iter().cloned().collect(),
            other => panic!("expected form body, got {other:?}"),
        }
    }

    #[test]
    fn selects_refresh_grant_when_authorized() {
        let credential = Credential {
            authorization_code: Some("abc".to_string()),
            access_token: "AT1".to_string(),
            refresh_token: "RT1".to_string(),
            expires_in: 0,
            authorized: true,
        };
        assert_eq!(
            Grant::select(&credential).unwrap(),
            Grant::RefreshToken("RT1".to_string())
        );
    }

    #[test]
    fn selects_code_grant_when_unauthorized() {
        let credential = Credential {
            authorization_code: Some("abc".to_string()),
            refresh_token: "RT-old".to_string(),
            ..Credential::default()
        };
        assert_eq!(
            Grant::select(&credential).unwrap(),
            Grant::AuthorizationCode("abc".to_string())
        );
    }

    #[test]
    fn no_grant_without_code_or_authorization() {
        assert!(matches!(
            Grant::select(&Credential::default()),
            Err(OAuthError::MissingGrant)
        ));
    }

    #[test]
    fn json_token_request_carries_same_fields() {
        let config = config().with_token_request_format(TokenRequestFormat::Json);
        let request = token_request(&config, &Grant::RefreshToken("RT1".to_string())).unwrap();
        match request.body {
            Some(RequestBody::Json(value)) => {
                assert_eq!(value["grant_type"], "refresh_token");
                assert_eq!(value["refresh_token"], "RT1");
                assert_eq!(value["client_secret"], "secret");
            }
            other => panic!("expected json body, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn code_exchange_authorizes_client() {
        let transport = ScriptedTransport::new();
        transport.push(
            200,
            r#"{"access_token":"AT1","refresh_token":"RT1","expires_in":3600}"#,
        );
        let cell = CredentialCell::default();
        cell.install_code("abc".to_string());

        exchange(&transport, &config(), &cell).await.unwrap();

        let credential = cell.snapshot();
        assert_eq!(credential.access_token, "AT1");
        assert_eq!(credential.refresh_token, "RT1");
        assert_eq!(credential.expires_in, 3600);
        assert!(credential.authorized);
        assert!(credential.authorization_code.is_none());

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::POST);
        assert_eq!(
            requests[0].url.as_str(),
            "https://api.example.test/v1/oauth2/grant"
        );
        assert!(requests[0].header(X_SPARK_API_USER_AGENT).is_some());
        let fields = form(&requests[0]);
        assert_eq!(fields["grant_type"], "authorization_code");
        assert_eq!(fields["code"], "abc");
        assert_eq!(fields["client_id"], "key");
        assert_eq!(fields["client_secret"], "secret");
        assert_eq!(
            fields["redirect_uri"],
            "https://sparkplatform.com/oauth2/callback"
        );
        assert!(!fields.contains_key("refresh_token"));
    }

    #[tokio::test]
    async fn refresh_exchange_replaces_tokens() {
        let transport = ScriptedTransport::new();
        transport.push(
            200,
            r#"{"access_token":"AT2","refresh_token":"RT2","expires_in":7200}"#,
        );
        let cell = authorized_cell("AT1", "RT1");

        exchange(&transport, &config(), &cell).await.unwrap();

        let credential = cell.snapshot();
        assert_eq!(credential.access_token, "AT2");
        assert_eq!(credential.refresh_token, "RT2");
        assert_eq!(cell.state(), AuthState::Authorized);
        let fields = form(&transport.requests()[0]);
        assert_eq!(fields["grant_type"], "refresh_token");
        assert_eq!(fields["refresh_token"], "RT1");
        assert!(!fields.contains_key("code"));
    }

    #[tokio::test]
    async fn failed_exchange_drops_flag_but_keeps_tokens() {
        let transport = ScriptedTransport::new();
        transport.push(
            400,
            r#"{"error":"invalid_grant","error_description":"The access grant you supplied is invalid"}"#,
        );
        let cell = authorized_cell("AT1", "RT1");

        let err = exchange(&transport, &config(), &cell).await.unwrap_err();
        match err {
            OAuthError::Exchange {
                status,
                error,
                error_description,
            } => {
                assert_eq!(status, 400);
                assert_eq!(error, "invalid_grant");
                assert_eq!(error_description, "The access grant you supplied is invalid");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let credential = cell.snapshot();
        assert!(!credential.authorized);
        assert_eq!(credential.access_token, "AT1");
        assert_eq!(credential.refresh_token, "RT1");
        assert_eq!(cell.state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn failed_code_exchange_consumes_code() {
        let transport = ScriptedTransport::new();
        transport.push(401, r#"{"error":"invalid_client"}"#);
        let cell = CredentialCell::default();
        cell.install_code("abc".to_string());

        assert!(exchange(&transport, &config(), &cell).await.is_err());
        assert_eq!(cell.state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn missing_grant_issues_no_request() {
        let transport = ScriptedTransport::new();
        let cell = CredentialCell::default();

        let err = exchange(&transport, &config(), &cell).await.unwrap_err();
        assert!(matches!(err, OAuthError::MissingGrant));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn malformed_success_body_is_invalid_response() {
        let transport = ScriptedTransport::new();
        transport.push(200, "not json");
        let cell = authorized_cell("AT1", "RT1");

        let err = exchange(&transport, &config(), &cell).await.unwrap_err();
        assert!(matches!(err, OAuthError::InvalidResponse { .. }));
        assert!(!cell.is_authorized());
    }

    #[tokio::test]
    async fn transport_error_leaves_authorization_untouched() {
        let transport = ScriptedTransport::new();
        let cell = authorized_cell("AT1", "RT1");

        // An empty script answers with a transport-level error.
        assert!(exchange(&transport, &config(), &cell).await.is_err());
        assert!(cell.is_authorized());
        assert_eq!(cell.state(), AuthState::Authorized);
    }
}
