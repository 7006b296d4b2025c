//! Purpose: HTTP client for the card gateway's JSON protocol.
//! Exports: `GatewayClient`.
//! Role: Blocking `ureq` implementation of `RecordsApi` used by the CLI and tests.
//! Invariants: Base URLs are scheme + authority only; routes are appended as path segments.
//! Invariants: Non-success responses are decoded from the gateway's error envelope when possible.
#![allow(clippy::result_large_err)]

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{ApiResult, Card, CardFields, RecordsApi};
use crate::core::endpoint::build_url;
use crate::core::error::{Error, ErrorKind};

#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<GatewayClientInner>,
}

struct GatewayClientInner {
    base_url: Url,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
struct Confirmation {
    id: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: RemoteError,
}

#[derive(Deserialize)]
struct RemoteError {
    kind: String,
    message: Option<String>,
    hint: Option<String>,
    id: Option<String>,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> ApiResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let agent = ureq::AgentBuilder::new().build();
        Ok(Self {
            inner: Arc::new(GatewayClientInner { base_url, agent }),
        })
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            inner: Arc::new(GatewayClientInner {
                base_url: self.inner.base_url.clone(),
                agent,
            }),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    fn request_json<T, R>(&self, method: &str, url: &Url, body: Option<&T>) -> ApiResult<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let request = self
            .inner
            .agent
            .request(method, url.as_str())
            .set("Accept", "application/json");
        let response = match body {
            None => request.call(),
            Some(body) => {
                let payload = serde_json::to_string(body).map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to encode request json")
                        .with_source(err)
                })?;
                request
                    .set("Content-Type", "application/json")
                    .send_string(&payload)
            }
        };
        match response {
            Ok(resp) => read_json_response(resp),
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Err(error_from_body(code, &body))
            }
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Unavailable)
                .with_message("gateway unreachable")
                .with_hint(format!("Is the gateway running at {}?", self.inner.base_url))
                .with_source(err)),
        }
    }

    fn records_url(&self, id: Option<&str>) -> ApiResult<Url> {
        let segments: &[&str] = match id {
            Some(id) => &["records", id],
            None => &["records"],
        };
        build_url(&self.inner.base_url, segments, "gateway base url")
    }
}

impl RecordsApi for GatewayClient {
    fn list(&self) -> ApiResult<Vec<Card>> {
        let url = self.records_url(None)?;
        self.request_json::<(), _>("GET", &url, None)
    }

    fn get(&self, id: &str) -> ApiResult<Card> {
        let url = self.records_url(Some(id))?;
        self.request_json::<(), _>("GET", &url, None)
            .map_err(|err| with_id(err, id))
    }

    fn create(&self, fields: &CardFields) -> ApiResult<String> {
        let url = self.records_url(None)?;
        let confirmation: Confirmation = self.request_json("POST", &url, Some(fields))?;
        Ok(confirmation.id)
    }

    fn update(&self, id: &str, fields: &CardFields) -> ApiResult<String> {
        let url = self.records_url(Some(id))?;
        let confirmation: Confirmation = self
            .request_json("PUT", &url, Some(&fields.to_replacement()))
            .map_err(|err| with_id(err, id))?;
        Ok(confirmation.id)
    }

    fn delete(&self, id: &str) -> ApiResult<String> {
        let url = self.records_url(Some(id))?;
        let confirmation: Confirmation = self
            .request_json::<(), _>("DELETE", &url, None)
            .map_err(|err| with_id(err, id))?;
        Ok(confirmation.id)
    }
}

fn with_id(err: Error, id: &str) -> Error {
    if err.id().is_some() {
        err
    } else {
        err.with_id(id)
    }
}

fn normalize_base_url(raw: String) -> ApiResult<Url> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid gateway base url")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("gateway base url must use http or https scheme"));
    }
    if url.path() != "/" && !url.path().is_empty() {
        return Err(
            Error::new(ErrorKind::Usage).with_message("gateway base url must not include a path")
        );
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn read_json_response<R>(response: ureq::Response) -> ApiResult<R>
where
    R: DeserializeOwned,
{
    let body = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read response body")
            .with_source(err)
    })?;
    serde_json::from_str(&body).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("invalid response json")
            .with_source(err)
    })
}

fn error_from_body(status: u16, body: &str) -> Error {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        let remote = envelope.error;
        let kind = ErrorKind::parse(&remote.kind).unwrap_or_else(|| error_kind_from_status(status));
        let mut err = Error::new(kind)
            .with_message(remote.message.unwrap_or_else(|| format!("status {status}")));
        if let Some(hint) = remote.hint {
            err = err.with_hint(hint);
        }
        if let Some(id) = remote.id {
            err = err.with_id(id);
        }
        return err;
    }
    Error::new(error_kind_from_status(status)).with_message(format!("gateway returned status {status}"))
}

fn error_kind_from_status(status: u16) -> ErrorKind {
    match status {
        400 | 413 | 415 | 422 => ErrorKind::Invalid,
        404 => ErrorKind::NotFound,
        409 => ErrorKind::Conflict,
        502..=504 => ErrorKind::Unavailable,
        500..=599 => ErrorKind::Internal,
        _ => ErrorKind::Io,
    }
}
