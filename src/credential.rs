//! In-memory token state for one client.
//!
//! The token pair lives behind a `std::sync::RwLock` so a reader always sees
//! either the pre-exchange or the post-exchange pair, never a mix. Writers
//! additionally hold the async exchange guard for the duration of a token
//! exchange, so two refreshes cannot race and overwrite each other.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::{Mutex, MutexGuard};

use crate::TokenResponse;

/// Where a client sits in the authorization lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    CodeReceived,
    Authorized,
    Refreshing,
}

/// Current token set. Empty strings mean "absent".
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub authorization_code: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds-to-live hint from the last exchange. Advisory only.
    pub expires_in: u64,
    pub authorized: bool,
}

impl Credential {
    /// True iff a refresh token is held and the last exchange succeeded.
    pub fn is_authorized(&self) -> bool {
        self.authorized && !self.refresh_token.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(value: &str) -> &'static str {
            if value.is_empty() { "" } else { "[REDACTED]" }
        }

        f.debug_struct("Credential")
            .field(
                "authorization_code",
                &self.authorization_code.as_deref().map(redact),
            )
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("expires_in", &self.expires_in)
            .field("authorized", &self.authorized)
            .finish()
    }
}

/// Outcome of writing an exchange result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Applied {
    Stored,
    /// The credential was cleared after the exchange started.
    Stale,
    /// The response lacked an access token or any refresh token.
    Incomplete,
}

#[derive(Debug, Default)]
struct Slot {
    credential: Credential,
    // Bumped by `clear` so an exchange started before a logout is discarded.
    epoch: u64,
}

#[derive(Debug, Default)]
pub(crate) struct CredentialCell {
    slot: RwLock<Slot>,
    exchange: Mutex<()>,
    refreshing: AtomicBool,
}

impl CredentialCell {
    #[cfg(test)]
    pub(crate) fn new(credential: Credential) -> Self {
        Self {
            slot: RwLock::new(Slot {
                credential,
                epoch: 0,
            }),
            ..Self::default()
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Slot> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slot> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn snapshot(&self) -> Credential {
        self.read().credential.clone()
    }

    pub(crate) fn snapshot_with_epoch(&self) -> (Credential, u64) {
        let slot = self.read();
        (slot.credential.clone(), slot.epoch)
    }

    pub(crate) fn is_authorized(&self) -> bool {
        self.read().credential.is_authorized()
    }

    pub(crate) fn access_token(&self) -> String {
        self.read().credential.access_token.clone()
    }

    pub(crate) fn state(&self) -> AuthState {
        let slot = self.read();
        if slot.credential.is_authorized() {
            if self.refreshing.load(Ordering::Acquire) {
                AuthState::Refreshing
            } else {
                AuthState::Authorized
            }
        } else if slot.credential.authorization_code.is_some() {
            AuthState::CodeReceived
        } else {
            AuthState::Unauthenticated
        }
    }

    pub(crate) fn install_code(&self, code: String) {
        self.write().credential.authorization_code = Some(code);
    }

    pub(crate) fn take_code(&self) -> Option<String> {
        self.write().credential.authorization_code.take()
    }

    /// Writes a successful exchange read against `epoch`.
    pub(crate) fn apply_tokens(&self, epoch: u64, token: TokenResponse) -> Applied {
        let mut slot = self.write();
        if slot.epoch != epoch {
            return Applied::Stale;
        }

        let credential = &mut slot.credential;
        let refresh_token = token
            .refresh_token
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| credential.refresh_token.clone());
        if token.access_token.is_empty() || refresh_token.is_empty() {
            credential.authorized = false;
            return Applied::Incomplete;
        }

        credential.access_token = token.access_token;
        credential.refresh_token = refresh_token;
        credential.expires_in = token.expires_in;
        credential.authorized = true;
        Applied::Stored
    }

    /// Failed exchange: the flag drops, the tokens stay.
    pub(crate) fn mark_failed(&self) {
        self.write().credential.authorized = false;
    }

    /// Back to the unauthenticated state.
    pub(crate) fn clear(&self) {
        let mut slot = self.write();
        slot.credential = Credential::default();
        slot.epoch = slot.epoch.wrapping_add(1);
    }

    pub(crate) async fn lock_exchange(&self) -> MutexGuard<'_, ()> {
        self.exchange.lock().await
    }

    pub(crate) fn refreshing(&self) -> RefreshingGuard<'_> {
        self.refreshing.store(true, Ordering::Release);
        RefreshingGuard { cell: self }
    }
}

/// Resets the refreshing marker even if the exchange future is dropped.
pub(crate) struct RefreshingGuard<'a> {
    cell: &'a CredentialCell,
}

impl Drop for RefreshingGuard<'_> {
    fn drop(&mut self) {
        self.cell.refreshing.store(false, Ordering::Release);
    }
}
