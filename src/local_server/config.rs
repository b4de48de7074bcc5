use std::net::SocketAddr;
use std::time::Duration;

use url::Url;

use crate::OAuthError;

/// Loopback redirect target the consent redirect is expected on.
#[derive(Debug, Clone)]
pub struct LocalServerConfig {
    redirect: Url,
    pub timeout: Option<Duration>,
}

impl LocalServerConfig {
    /// Derives the listener from a registered `callback` such as
    /// `http://localhost:8765/callback`. Query and fragment are dropped.
    pub fn from_redirect_uri(redirect_uri: &str) -> Result<Self, OAuthError> {
        let mut redirect = Url::parse(redirect_uri)?;
        if redirect.scheme() != "http" {
            return Err(OAuthError::InvalidRedirectUri(format!(
                "{redirect_uri}: a loopback callback must use http"
            )));
        }
        if redirect.host_str().is_none_or(str::is_empty) {
            return Err(OAuthError::InvalidRedirectUri(format!(
                "{redirect_uri}: no host to listen on"
            )));
        }
        redirect.set_query(None);
        redirect.set_fragment(None);
        Ok(Self {
            redirect,
            timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn redirect_uri(&self) -> &str {
        self.redirect.as_str()
    }

    /// Always starts with `/`.
    pub fn path(&self) -> &str {
        self.redirect.path()
    }

    pub(crate) fn socket_addrs(&self) -> Result<Vec<SocketAddr>, OAuthError> {
        Ok(self.redirect.socket_addrs(|| None)?)
    }

    /// The redirect URL as the browser hit it, given the raw query it sent.
    pub(crate) fn callback_url(&self, query: &str) -> String {
        let mut url = self.redirect.clone();
        url.set_query(Some(query).filter(|query| !query.is_empty()));
        url.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_listens_on_root_path() {
        let config = LocalServerConfig::from_redirect_uri("http://127.0.0.1:9000").unwrap();
        assert_eq!(config.path(), "/");
        assert_eq!(config.redirect_uri(), "http://127.0.0.1:9000/");
    }

    #[test]
    fn parses_redirect_uri() {
        let config =
            LocalServerConfig::from_redirect_uri("http://127.0.0.1:8765/oauth2/callback?x=1")
                .unwrap();
        assert_eq!(config.path(), "/oauth2/callback");
        assert_eq!(config.redirect_uri(), "http://127.0.0.1:8765/oauth2/callback");
        assert_eq!(
            config.socket_addrs().unwrap(),
            vec!["127.0.0.1:8765".parse::<SocketAddr>().unwrap()]
        );
    }

    #[test]
    fn default_http_port_is_used() {
        let config = LocalServerConfig::from_redirect_uri("http://127.0.0.1/callback").unwrap();
        assert_eq!(config.socket_addrs().unwrap()[0].port(), 80);
    }

    #[test]
    fn rejects_https_redirect() {
        let result =
            LocalServerConfig::from_redirect_uri("https://sparkplatform.com/oauth2/callback");
        assert!(matches!(result, Err(OAuthError::InvalidRedirectUri(_))));
    }

    #[test]
    fn callback_url_keeps_query() {
        let config = LocalServerConfig::from_redirect_uri("http://localhost:8765/callback").unwrap();
        assert_eq!(
            config.callback_url("code=abc"),
            "http://localhost:8765/callback?code=abc"
        );
        assert_eq!(config.callback_url(""), "http://localhost:8765/callback");
    }
}
