//! Outcomes of a token acquisition

use common::Secret;

use crate::account::Account;
use crate::authorization::AuthorizationResult;
use crate::token::TokenResult;

/// Tokens handed to the caller on success.
#[derive(Debug, Clone)]
pub struct AuthenticationResult {
    pub access_token: Secret<String>,
    pub id_token: Option<String>,
    pub account: Account,
    /// Unix milliseconds.
    pub expires_on: u64,
    pub scopes: Vec<String>,
    pub tenant_id: Option<String>,
    pub correlation_id: Option<String>,
    /// Served from the credential store without a network call.
    pub from_cache: bool,
}

/// Result of one acquisition attempt.
///
/// The raw authorization and token results are kept even on success so a
/// failure can be classified from whichever leg produced it.
#[derive(Debug, Clone)]
pub struct AcquireTokenResult {
    local_result: Option<AuthenticationResult>,
    authorization_result: Option<AuthorizationResult>,
    token_result: Option<TokenResult>,
}

impl AcquireTokenResult {
    pub fn success(
        result: AuthenticationResult,
        authorization_result: Option<AuthorizationResult>,
        token_result: Option<TokenResult>,
    ) -> Self {
        Self {
            local_result: Some(result),
            authorization_result,
            token_result,
        }
    }

    pub fn failure(authorization_result: Option<AuthorizationResult>, token_result: Option<TokenResult>) -> Self {
        Self {
            local_result: None,
            authorization_result,
            token_result,
        }
    }

    /// True exactly when a local authentication result is present.
    pub fn succeeded(&self) -> bool {
        self.local_result.is_some()
    }

    pub fn local_result(&self) -> Option<&AuthenticationResult> {
        self.local_result.as_ref()
    }

    pub fn into_local_result(self) -> Option<AuthenticationResult> {
        self.local_result
    }

    pub fn authorization_result(&self) -> Option<&AuthorizationResult> {
        self.authorization_result.as_ref()
    }

    pub fn token_result(&self) -> Option<&TokenResult> {
        self.token_result.as_ref()
    }
}
