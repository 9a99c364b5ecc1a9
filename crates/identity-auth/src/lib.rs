//! OAuth2/OIDC protocol library for the identity core
//!
//! Everything needed to acquire tokens except the runtime that schedules
//! commands and waits on the user agent (see `identity-dispatch`). This crate
//! has no dependency on the runtime and can be tested on its own.
//!
//! Interactive flow:
//! 1. `OAuth2Strategy::create_authorization_request_builder()` seeds an
//!    `AuthorizationRequest` with fresh `state` and PKCE pair
//! 2. The user agent opens `AuthorizationRequest::to_url()`
//! 3. The redirect becomes a `RedirectPayload`, classified by
//!    `OAuth2Strategy::create_authorization_result()`
//! 4. `OAuth2Strategy::create_token_request()` binds code and verifier;
//!    `request_token()` redeems it through a `TokenTransport`
//! 5. `OAuth2Strategy::create_account()` derives the account; tokens are
//!    saved through a `TokenCache`
//!
//! Failures along the way are normalized by `adapter` into `Error`.

pub mod account;
pub mod adapter;
pub mod authorization;
pub mod cache;
pub mod cloud;
pub mod constants;
pub mod correlation;
pub mod error;
pub mod metadata;
pub mod pkce;
pub mod result;
pub mod strategy;
pub mod token;
pub mod transport;

pub use account::{Account, ClientInfo, IdToken};
pub use adapter::{error_from_acquire_token_result, error_from_failure, error_from_panic};
pub use authorization::{
    AuthorizationErrorResponse, AuthorizationRequest, AuthorizationRequestBuilder,
    AuthorizationResponse, AuthorizationResult, RedirectPayload, ResultCode, Slice,
};
pub use cache::{CacheLookup, CachedCredential, CredentialStore, TokenCache};
pub use cloud::{CloudDescriptor, CloudRegistry, StaticCloudRegistry};
pub use constants::BROWSER_FLOW;
pub use correlation::{CorrelationContext, current_correlation_id};
pub use error::{Error, Result};
pub use metadata::ApplicationMetadata;
pub use pkce::PkceChallenge;
pub use result::{AcquireTokenResult, AuthenticationResult};
pub use strategy::{MicrosoftStsStrategy, OAuth2Strategy, StrategyConfig};
pub use token::{TokenErrorResponse, TokenRequest, TokenResponse, TokenResult};
pub use transport::{BoxFuture, HttpResponse, ReqwestTransport, TokenTransport};
