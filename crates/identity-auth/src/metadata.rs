//! Application metadata persisted next to cached credentials.

use serde::{Deserialize, Serialize};

/// Which application owns credentials for a client id in an environment.
///
/// Equality and hashing cover all four fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationMetadata {
    #[serde(rename = "client_id")]
    pub client_id: String,
    #[serde(rename = "environment")]
    pub environment: String,
    /// Family-of-client-id marker, if the app is in the family.
    #[serde(rename = "foci", default, skip_serializing_if = "Option::is_none")]
    pub foci: Option<String>,
    #[serde(rename = "application_uid")]
    pub application_uid: i32,
}

impl ApplicationMetadata {
    pub fn new(
        client_id: impl Into<String>,
        environment: impl Into<String>,
        foci: Option<String>,
        application_uid: i32,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            environment: environment.into(),
            foci,
            application_uid,
        }
    }

    pub fn is_family_member(&self) -> bool {
        self.foci.as_deref().is_some_and(|f| !f.is_empty())
    }
}
