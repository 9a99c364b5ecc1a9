//! Failure normalization
//!
//! Everything that can go wrong during a command ends up here before it
//! reaches the caller: typed errors pass through, arbitrary failures and
//! panics become `Error::Unknown`, and an unsuccessful `AcquireTokenResult`
//! is classified from its authorization leg first, then its token leg.
//! The active correlation id is stamped on the way out.

use std::any::Any;

use tracing::warn;

use crate::authorization::AuthorizationResult;
use crate::constants::client_error;
use crate::correlation::current_correlation_id;
use crate::error::{Error, is_bad_token};
use crate::result::AcquireTokenResult;
use crate::token::TokenResult;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Panicked(String);

/// Map an arbitrary failure into the taxonomy.
pub fn error_from_failure(failure: anyhow::Error) -> Error {
    let error = match failure.downcast::<Error>() {
        Ok(typed) => typed,
        Err(other) => Error::unknown(other.to_string(), Some(other.into())),
    };
    error.with_correlation_id(current_correlation_id())
}

/// Map a panic payload into `Error::Unknown`, keeping the panic message as the cause.
pub fn error_from_panic(payload: Box<dyn Any + Send>) -> Error {
    let message = panic_message(payload.as_ref());
    Error::unknown(
        format!("command panicked: {message}"),
        Some(Box::new(Panicked(message))),
    )
    .with_correlation_id(current_correlation_id())
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Classify an unsuccessful acquisition.
pub fn error_from_acquire_token_result(result: &AcquireTokenResult) -> Error {
    let error = classify(result);
    error.with_correlation_id(current_correlation_id())
}

fn classify(result: &AcquireTokenResult) -> Error {
    match result.authorization_result() {
        Some(AuthorizationResult::Cancel) => return Error::user_cancel(),
        Some(AuthorizationResult::Error(response)) => {
            return Error::service(
                response.error.clone(),
                response.subcode.clone(),
                response.message(),
            );
        }
        Some(AuthorizationResult::Success(_)) | None => {}
    }

    match result.token_result() {
        Some(TokenResult::Error(response)) => {
            if is_bad_token(&response.error, response.suberror.as_deref()) {
                Error::ui_required(
                    response.error.clone(),
                    response.suberror.clone(),
                    response.message(),
                )
            } else {
                Error::service(
                    response.error.clone(),
                    response.suberror.clone(),
                    response.message(),
                )
                .with_status_code(response.status_code)
            }
        }
        Some(TokenResult::Success(_)) | None => {
            warn!("unsuccessful result carries no authorization or token error");
            Error::unknown(
                format!(
                    "{}: token acquisition failed without an error response",
                    client_error::UNKNOWN_ERROR
                ),
                None,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorization::AuthorizationErrorResponse;
    use crate::correlation::CorrelationContext;
    use crate::token::TokenErrorResponse;
    use std::error::Error as _;

    fn token_error(error: &str, suberror: Option<&str>, status: u16) -> AcquireTokenResult {
        AcquireTokenResult::failure(
            None,
            Some(TokenResult::Error(TokenErrorResponse {
                error: error.into(),
                error_description: Some("details".into()),
                suberror: suberror.map(str::to_string),
                status_code: status,
                ..Default::default()
            })),
        )
    }

    #[test]
    fn typed_errors_pass_through() {
        let err = error_from_failure(anyhow::Error::new(Error::client(
            client_error::NO_AGENT_AVAILABLE,
            "none",
        )));
        assert!(matches!(err, Error::Client { ref code, .. } if code == client_error::NO_AGENT_AVAILABLE));
    }

    #[test]
    fn foreign_errors_become_unknown_with_cause() {
        let cause = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        let err = error_from_failure(anyhow::Error::new(cause));
        assert_eq!(err.kind(), "unknown");
        assert!(err.source().is_some());
    }

    #[test]
    fn panic_payload_is_preserved() {
        let err = error_from_panic(Box::new("boom"));
        assert_eq!(err.kind(), "unknown");
        assert_eq!(err.source().unwrap().to_string(), "boom");

        let err = error_from_panic(Box::new(String::from("owned boom")));
        assert!(err.to_string().contains("owned boom"));
    }

    #[test]
    fn authorization_cancel_is_user_cancel() {
        let result = AcquireTokenResult::failure(Some(AuthorizationResult::Cancel), None);
        assert!(matches!(error_from_acquire_token_result(&result), Error::UserCancel { .. }));
    }

    #[test]
    fn authorization_error_is_service_error() {
        let result = AcquireTokenResult::failure(
            Some(AuthorizationResult::Error(AuthorizationErrorResponse::new(
                "access_denied",
                Some("consent_declined".into()),
                None,
            ))),
            None,
        );
        let err = error_from_acquire_token_result(&result);
        assert_eq!(err.kind(), "service");
        assert_eq!(err.code(), "access_denied");
        assert_eq!(err.subcode(), Some("consent_declined"));
    }

    #[test]
    fn bad_token_is_ui_required() {
        let err = error_from_acquire_token_result(&token_error("invalid_grant", Some("bad_token"), 400));
        assert_eq!(err.kind(), "ui_required");
        assert!(err.is_bad_token_sub_error());
    }

    #[test]
    fn other_token_errors_are_service_with_status() {
        let err = error_from_acquire_token_result(&token_error("invalid_grant", None, 400));
        assert!(matches!(
            err,
            Error::Service {
                status_code: Some(400),
                ..
            }
        ));
    }

    #[test]
    fn empty_failure_is_unknown() {
        let err = error_from_acquire_token_result(&AcquireTokenResult::failure(None, None));
        assert_eq!(err.kind(), "unknown");
    }

    #[tokio::test]
    async fn active_correlation_id_is_stamped() {
        let context = CorrelationContext::generate();
        let expected = context.correlation_id().to_string();
        let err = context
            .scope(async { error_from_acquire_token_result(&AcquireTokenResult::failure(None, None)) })
            .await;
        assert_eq!(err.correlation_id(), Some(expected.as_str()));
    }
}
