//! Error taxonomy for token acquisition
//!
//! Every failure surfaced to a caller is one of five kinds. `Service` and
//! `UiRequired` carry the protocol error code returned by the authorization
//! server; `Client` carries one of the locally defined codes in
//! `constants::client_error`. All variants carry the correlation id of the
//! request that produced them once the dispatcher stamps it.

use crate::constants::{oauth2_error, oauth2_sub_error};

/// Boxed cause preserved by `Error::Unknown`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors from token acquisition.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input, missing PKCE binding, no agent available, misuse of a
    /// disposed orchestrator, undecodable responses.
    #[error("client error ({code}): {message}")]
    Client {
        code: String,
        message: String,
        correlation_id: Option<String>,
    },

    /// The token or authorization endpoint returned a protocol error.
    #[error("service error ({code}): {message}")]
    Service {
        code: String,
        subcode: Option<String>,
        message: String,
        status_code: Option<u16>,
        correlation_id: Option<String>,
    },

    /// A fresh interactive flow is required to recover.
    #[error("interaction required ({code}): {message}")]
    UiRequired {
        code: String,
        subcode: Option<String>,
        message: String,
        correlation_id: Option<String>,
    },

    /// The user cancelled the authorization flow.
    #[error("user cancelled the authorization flow")]
    UserCancel { correlation_id: Option<String> },

    /// Anything not classified above. The original cause is kept as `source`.
    #[error("unknown error: {message}")]
    Unknown {
        message: String,
        #[source]
        source: Option<BoxError>,
        correlation_id: Option<String>,
    },
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn client(code: &str, message: impl Into<String>) -> Self {
        Error::Client {
            code: code.to_string(),
            message: message.into(),
            correlation_id: None,
        }
    }

    pub fn service(code: impl Into<String>, subcode: Option<String>, message: impl Into<String>) -> Self {
        Error::Service {
            code: code.into(),
            subcode,
            message: message.into(),
            status_code: None,
            correlation_id: None,
        }
    }

    pub fn ui_required(
        code: impl Into<String>,
        subcode: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::UiRequired {
            code: code.into(),
            subcode,
            message: message.into(),
            correlation_id: None,
        }
    }

    pub fn user_cancel() -> Self {
        Error::UserCancel {
            correlation_id: None,
        }
    }

    pub fn unknown(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Error::Unknown {
            message: message.into(),
            source,
            correlation_id: None,
        }
    }

    /// Attach an HTTP status code. Only meaningful for `Service` errors.
    pub fn with_status_code(mut self, status: u16) -> Self {
        if let Error::Service { status_code, .. } = &mut self {
            *status_code = Some(status);
        }
        self
    }

    /// Stamp the correlation id of the request that produced this error.
    ///
    /// An id already present is kept: the innermost context wins.
    pub fn with_correlation_id(mut self, id: Option<String>) -> Self {
        let slot = match &mut self {
            Error::Client { correlation_id, .. }
            | Error::Service { correlation_id, .. }
            | Error::UiRequired { correlation_id, .. }
            | Error::UserCancel { correlation_id }
            | Error::Unknown { correlation_id, .. } => correlation_id,
        };
        if slot.is_none() {
            *slot = id;
        }
        self
    }

    /// The error code (protocol or local).
    pub fn code(&self) -> &str {
        match self {
            Error::Client { code, .. } | Error::Service { code, .. } | Error::UiRequired { code, .. } => {
                code
            }
            Error::UserCancel { .. } => oauth2_sub_error::CANCEL,
            Error::Unknown { .. } => crate::constants::client_error::UNKNOWN_ERROR,
        }
    }

    pub fn subcode(&self) -> Option<&str> {
        match self {
            Error::Service { subcode, .. } | Error::UiRequired { subcode, .. } => subcode.as_deref(),
            _ => None,
        }
    }

    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Error::Client { correlation_id, .. }
            | Error::Service { correlation_id, .. }
            | Error::UiRequired { correlation_id, .. }
            | Error::UserCancel { correlation_id }
            | Error::Unknown { correlation_id, .. } => correlation_id.as_deref(),
        }
    }

    /// Whether this is the `invalid_grant` / `bad_token` pair that a fresh
    /// interactive flow can recover from.
    pub fn is_bad_token_sub_error(&self) -> bool {
        is_bad_token(self.code(), self.subcode())
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Client { .. } => "client",
            Error::Service { .. } => "service",
            Error::UiRequired { .. } => "ui_required",
            Error::UserCancel { .. } => "user_cancel",
            Error::Unknown { .. } => "unknown",
        }
    }
}

/// `invalid_grant` with sub-error `bad_token`, both compared case-insensitively.
pub fn is_bad_token(code: &str, subcode: Option<&str>) -> bool {
    code.eq_ignore_ascii_case(oauth2_error::INVALID_GRANT)
        && subcode.is_some_and(|s| s.eq_ignore_ascii_case(oauth2_sub_error::BAD_TOKEN))
}
