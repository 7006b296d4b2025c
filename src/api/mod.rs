//! Purpose: Client-side API boundary for talking to a card gateway.
//! Exports: `RecordsApi`, `GatewayClient`, and the shared card/error types.
//! Role: The record view depends only on `RecordsApi`; `GatewayClient` is the HTTP implementation.
//! Invariants: Every call is one request/response round trip; nothing is retried.

mod client;

pub use crate::core::card::{Card, CardFields};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use client::GatewayClient;

pub type ApiResult<T> = Result<T, Error>;

/// The five gateway operations as seen by a client.
pub trait RecordsApi {
    fn list(&self) -> ApiResult<Vec<Card>>;
    fn get(&self, id: &str) -> ApiResult<Card>;
    /// Returns the identifier assigned by the gateway.
    fn create(&self, fields: &CardFields) -> ApiResult<String>;
    fn update(&self, id: &str, fields: &CardFields) -> ApiResult<String>;
    fn delete(&self, id: &str) -> ApiResult<String>;
}
