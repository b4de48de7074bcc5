//! OAuth 2.0 credential lifecycle for the Spark API.
//!
//! [`OAuth2Client`] obtains consent when no credential exists, redeems the
//! authorization code, applies the bearer token to every call and, when a
//! call is rejected, refreshes once and retries once before giving up.
//! Presenting the consent page and carrying HTTP are left to collaborators
//! ([`ConsentPresenter`], [`HttpTransport`]).

mod client;
mod config;
mod consent;
mod credential;
mod error;
mod exchange;
#[cfg(feature = "local-server")]
mod local_server;
mod request;
#[cfg(test)]
mod test_support;
mod transport;
mod types;

pub use client::OAuth2Client;
pub use config::{Configuration, TokenRequestFormat};
pub use consent::{ConsentHandle, ConsentPresenter};
pub use credential::{AuthState, Credential};
pub use error::OAuthError;
pub use exchange::{Grant, token_payload};
#[cfg(feature = "local-server")]
pub use local_server::{LocalServer, LocalServerConfig};
pub use request::RequestOptions;
pub use reqwest::Method;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, RequestBody, ReqwestTransport};
pub use types::{ApiResponse, AuthorizationResponse, TokenErrorResponse, TokenResponse};
