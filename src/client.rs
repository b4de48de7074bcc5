use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use reqwest::Method;
use tracing::info;

use crate::consent::obtain_code;
use crate::credential::{Applied, CredentialCell};
use crate::exchange::exchange;
use crate::request::send_authorized;
use crate::{
    ApiResponse, AuthState, Configuration, ConsentHandle, ConsentPresenter, Credential,
    HttpTransport, OAuthError, ReqwestTransport, RequestOptions, TokenResponse,
};

/// OAuth 2.0 client for one set of credentials.
///
/// Cloning is cheap and clones share the same credential, so one client can
/// serve many concurrent calls.
pub struct OAuth2Client<T: HttpTransport = ReqwestTransport> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    transport: T,
    config: RwLock<Arc<Configuration>>,
    frozen: AtomicBool,
    credential: CredentialCell,
    consent: ConsentHandle,
    presenter: Box<dyn ConsentPresenter>,
}

impl<T: HttpTransport> Clone for OAuth2Client<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl OAuth2Client<ReqwestTransport> {
    /// Builds a client over reqwest. Transport options (`timeout`, `use_tls`)
    /// take effect from the configuration frozen by the first call, so
    /// `configure` may still change them.
    pub fn new(config: Configuration, presenter: impl ConsentPresenter + 'static) -> Self {
        Self::with_transport(config, ReqwestTransport::new(), presenter)
    }
}

impl<T: HttpTransport> OAuth2Client<T> {
    pub fn with_transport(
        config: Configuration,
        transport: T,
        presenter: impl ConsentPresenter + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                config: RwLock::new(Arc::new(config)),
                frozen: AtomicBool::new(false),
                credential: CredentialCell::default(),
                consent: ConsentHandle::default(),
                presenter: Box::new(presenter),
            }),
        }
    }

    /// Applies a batch of settings. Fails once authorization has started.
    pub fn configure<F>(&self, apply: F) -> Result<&Self, OAuthError>
    where
        F: FnOnce(&mut Configuration),
    {
        let mut config = self
            .inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if self.inner.frozen.load(Ordering::Acquire) {
            return Err(OAuthError::ConfigurationFrozen);
        }
        let mut updated = Configuration::clone(&config);
        apply(&mut updated);
        *config = Arc::new(updated);
        Ok(self)
    }

    pub fn config(&self) -> Arc<Configuration> {
        Arc::clone(
            &self
                .inner
                .config
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    // The flag is set under the read lock so it cannot interleave with a
    // `configure` holding the write lock.
    fn freeze(&self) -> Result<Arc<Configuration>, OAuthError> {
        let config = {
            let config = self
                .inner
                .config
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            self.inner.frozen.store(true, Ordering::Release);
            Arc::clone(&config)
        };
        self.inner.transport.prepare(&config)?;
        Ok(config)
    }

    pub fn is_configuration_frozen(&self) -> bool {
        self.inner.frozen.load(Ordering::Acquire)
    }

    /// Handle through which a redirect handler reports the authorization code.
    pub fn consent_handle(&self) -> ConsentHandle {
        self.inner.consent.clone()
    }

    pub fn consent_url(&self) -> Result<String, OAuthError> {
        self.config().consent_url()
    }

    /// Installs a code obtained outside the consent flow; the next
    /// [`authorize`](Self::authorize) redeems it.
    pub fn set_authorization_code(&self, code: impl Into<String>) {
        self.inner.credential.install_code(code.into());
    }

    /// Resumes a session from tokens issued earlier. Waits for any exchange
    /// in flight so its result cannot overwrite the resumed tokens.
    pub async fn resume(
        &self,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in: u64,
    ) -> Result<(), OAuthError> {
        let token = TokenResponse {
            access_token: access_token.into(),
            refresh_token: Some(refresh_token.into()),
            expires_in,
            extra: HashMap::new(),
        };
        let credential = &self.inner.credential;
        let _exchange = credential.lock_exchange().await;
        match credential.apply_tokens(credential.snapshot_with_epoch().1, token) {
            Applied::Stored => Ok(()),
            Applied::Stale => Err(OAuthError::CredentialCleared),
            Applied::Incomplete => Err(OAuthError::InvalidResponse {
                message: "a resumed session needs both an access and a refresh token".to_string(),
                body: String::new(),
            }),
        }
    }

    /// Runs one token exchange: a refresh when authorized, otherwise the
    /// redemption of a pending authorization code.
    pub async fn authorize(&self) -> Result<(), OAuthError> {
        let config = self.freeze()?;
        let _exchange = self.inner.credential.lock_exchange().await;
        exchange(&self.inner.transport, &config, &self.inner.credential).await
    }

    pub async fn refresh(&self) -> Result<(), OAuthError> {
        self.authorize().await
    }

    /// Presents the consent URL, waits for the code and redeems it.
    /// Does nothing when already authorized; `logout` first to start over.
    pub async fn request_consent(&self) -> Result<(), OAuthError> {
        let config = self.freeze()?;
        let _exchange = self.inner.credential.lock_exchange().await;
        if self.inner.credential.is_authorized() {
            return Ok(());
        }
        self.consent_and_exchange(&config).await
    }

    async fn consent_and_exchange(&self, config: &Configuration) -> Result<(), OAuthError> {
        let credential = &self.inner.credential;
        if credential.state() != AuthState::CodeReceived {
            let consent_url = config.consent_url()?;
            let code = obtain_code(
                self.inner.presenter.as_ref(),
                &self.inner.consent,
                &consent_url,
                config.consent_timeout,
            )
            .await?;
            credential.install_code(code);
        }
        exchange(&self.inner.transport, config, credential).await
    }

    async fn ensure_authorized(&self, config: &Configuration) -> Result<(), OAuthError> {
        let credential = &self.inner.credential;
        if credential.is_authorized() {
            return Ok(());
        }
        let _exchange = credential.lock_exchange().await;
        // Another call may have finished consent while this one waited.
        if credential.is_authorized() {
            return Ok(());
        }
        info!("authorization required, obtaining consent before requesting");
        self.consent_and_exchange(config).await
    }

    /// `GET <endpoint>/<api_version><path>`.
    pub async fn get(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, OAuthError> {
        self.request(Method::GET, path, options).await
    }

    /// Authenticated call through the same consent, refresh and retry rules
    /// as [`get`](Self::get).
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, OAuthError> {
        let config = self.freeze()?;
        self.ensure_authorized(&config).await?;
        send_authorized(
            &self.inner.transport,
            &config,
            &self.inner.credential,
            method,
            path,
            &options,
        )
        .await
    }

    /// Drops every token and abandons a pending consent. Idempotent.
    pub fn logout(&self) {
        self.inner.credential.clear();
        self.inner.consent.cancel();
        info!("logged out");
    }

    pub fn is_authorized(&self) -> bool {
        self.inner.credential.is_authorized()
    }

    pub fn state(&self) -> AuthState {
        self.inner.credential.state()
    }

    pub fn credential(&self) -> Credential {
        self.inner.credential.snapshot()
    }
}
