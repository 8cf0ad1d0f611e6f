//! HTTP Response with body access.

use crate::base::neterror::NetError;
use crate::http::parser::ResponseHead;
use crate::http::ResponseBody;
use http::{HeaderMap, StatusCode, Version};
use url::Url;

/// HTTP Response with accessible body.
/// This is the user-facing response type that owns the body.
#[derive(Debug)]
pub struct HttpResponse {
    status: StatusCode,
    version: Version,
    reason: String,
    headers: HeaderMap,
    url: Url,
    redirects: usize,
    body: Option<ResponseBody>,
}

impl HttpResponse {
    pub(crate) fn new(head: ResponseHead, url: Url, redirects: usize, body: ResponseBody) -> Self {
        Self {
            status: head.status,
            version: head.version,
            reason: head.reason,
            headers: head.headers,
            url,
            redirects,
            body: Some(body),
        }
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the HTTP version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Reason phrase exactly as sent by the server.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Get a reference to the headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// URL of the final response after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Number of redirects followed to get here.
    pub fn redirect_count(&self) -> usize {
        self.redirects
    }

    /// Take the response body for consumption.
    /// Can only be called once - subsequent calls return None.
    pub fn take_body(&mut self) -> Option<ResponseBody> {
        self.body.take()
    }

    fn into_body(mut self) -> Result<ResponseBody, NetError> {
        self.body.take().ok_or(NetError::HttpBodyError)
    }

    /// Convenience method to consume body as bytes.
    pub async fn bytes(self) -> Result<bytes::Bytes, NetError> {
        self.into_body()?.bytes().await
    }

    /// Convenience method to consume body as text.
    pub async fn text(self) -> Result<String, NetError> {
        self.into_body()?.text().await
    }

    /// Convenience method to consume body as JSON.
    #[cfg(feature = "json")]
    pub async fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, NetError> {
        self.into_body()?.json().await
    }
}
