//! Human consent: presenting the consent URL and receiving the code.
//!
//! The presenter is handed a [`ConsentHandle`] bound to the client that
//! asked for consent. Whatever captures the redirect (a deep-link handler,
//! a webview, the loopback `LocalServer`) reports back through that handle.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::{AuthorizationResponse, OAuthError};

type Outcome = Result<String, OAuthError>;

/// Shows the consent URL to the user. Must not block waiting for the code;
/// the code is reported later through `handle`.
pub trait ConsentPresenter: Send + Sync {
    fn present(&self, consent_url: &str, handle: ConsentHandle) -> Result<(), OAuthError>;
}

impl<F> ConsentPresenter for F
where
    F: Fn(&str, ConsentHandle) -> Result<(), OAuthError> + Send + Sync,
{
    fn present(&self, consent_url: &str, handle: ConsentHandle) -> Result<(), OAuthError> {
        self(consent_url, handle)
    }
}

/// Delivery side of a client's consent subscription.
#[derive(Debug, Clone, Default)]
pub struct ConsentHandle {
    pending: Arc<Mutex<Option<oneshot::Sender<Outcome>>>>,
}

impl ConsentHandle {
    /// Reports the authorization code captured from the redirect.
    pub fn deliver_code(&self, code: impl Into<String>) -> Result<(), OAuthError> {
        self.complete(Ok(code.into()))
    }

    /// Reports the full redirect URL. A URL without `code` is rejected and
    /// the consent keeps waiting; a URL carrying `error` ends the consent.
    pub fn deliver_callback_url(&self, callback_url: &str) -> Result<(), OAuthError> {
        match AuthorizationResponse::from_url(callback_url) {
            Ok(response) => self.deliver_code(response.code),
            Err(denied @ OAuthError::ConsentDenied { .. }) => self.complete(Err(denied)),
            Err(error) => Err(error),
        }
    }

    /// Ends the pending consent with `error`.
    pub fn reject(&self, error: OAuthError) -> Result<(), OAuthError> {
        self.complete(Err(error))
    }

    pub fn is_pending(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<oneshot::Sender<Outcome>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, outcome: Outcome) -> Result<(), OAuthError> {
        let sender = self.lock().take().ok_or(OAuthError::NoPendingConsent)?;
        sender.send(outcome).map_err(|_| OAuthError::NoPendingConsent)
    }

    /// Registers the single subscription for this client. A slot whose
    /// waiter has gone away is replaced; a live one is not.
    pub(crate) fn subscribe(&self) -> Result<oneshot::Receiver<Outcome>, OAuthError> {
        let mut pending = self.lock();
        if let Some(existing) = pending.as_ref() {
            if !existing.is_closed() {
                return Err(OAuthError::ConsentPending);
            }
            debug!("replacing abandoned consent subscription");
        }
        let (sender, receiver) = oneshot::channel();
        *pending = Some(sender);
        Ok(receiver)
    }

    pub(crate) fn cancel(&self) {
        self.lock().take();
    }
}

/// Presents the consent URL and waits for the code to arrive.
pub(crate) async fn obtain_code(
    presenter: &dyn ConsentPresenter,
    handle: &ConsentHandle,
    consent_url: &str,
    timeout: Option<Duration>,
) -> Result<String, OAuthError> {
    let receiver = handle.subscribe()?;

    if let Err(error) = presenter.present(consent_url, handle.clone()) {
        handle.cancel();
        return Err(error);
    }

    let outcome = match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, receiver).await {
            Ok(outcome) => outcome,
            Err(_) => {
                handle.cancel();
                return Err(OAuthError::ConsentTimeout { timeout });
            }
        },
        None => receiver.await,
    };

    outcome.map_err(|_| OAuthError::ConsentAbandoned)?
}
