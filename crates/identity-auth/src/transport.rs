//! Token transport
//!
//! The core never retries: a non-2xx response is handed back as-is and parsed
//! as a protocol error by the strategy. Connection-level failures surface as
//! `Error::Unknown` with the underlying cause preserved.
//!
//! Uses `Pin<Box<dyn Future>>` return types so the transport can be shared as
//! `Arc<dyn TokenTransport>`.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

/// Boxed, sendable future used by the collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Raw HTTP response from the token endpoint.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status_code: u16,
    pub body: String,
    pub headers: BTreeMap<String, Vec<String>>,
}

/// POSTs form bodies to a token endpoint.
pub trait TokenTransport: Send + Sync {
    fn post<'a>(
        &'a self,
        endpoint: &'a Url,
        form: &'a [(String, String)],
        headers: &'a [(String, String)],
    ) -> BoxFuture<'a, Result<HttpResponse>>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl TokenTransport for ReqwestTransport {
    fn post<'a>(
        &'a self,
        endpoint: &'a Url,
        form: &'a [(String, String)],
        headers: &'a [(String, String)],
    ) -> BoxFuture<'a, Result<HttpResponse>> {
        Box::pin(async move {
            let mut request = self.client.post(endpoint.clone()).form(form);
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }

            let response = request
                .send()
                .await
                .map_err(|e| Error::unknown("token request failed", Some(Box::new(e))))?;

            let status_code = response.status().as_u16();
            let mut response_headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for (name, value) in response.headers() {
                response_headers
                    .entry(name.as_str().to_string())
                    .or_default()
                    .push(value.to_str().unwrap_or_default().to_string());
            }

            let body = response
                .text()
                .await
                .map_err(|e| Error::unknown("reading token response body failed", Some(Box::new(e))))?;

            debug!(endpoint = %endpoint, status = status_code, "token endpoint responded");

            Ok(HttpResponse {
                status_code,
                body,
                headers: response_headers,
            })
        })
    }
}
