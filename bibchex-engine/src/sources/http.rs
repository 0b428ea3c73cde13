//! Shared HTTP plumbing for the sources

use super::ProviderError;
use crate::error::RetrievalError;
use bibchex_common::config::get_user_agent;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

/// Per-request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client shared by all sources of one run
pub fn build_client(mailto: Option<&str>) -> Result<reqwest::Client, RetrievalError> {
    reqwest::Client::builder()
        .user_agent(get_user_agent(mailto))
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(RetrievalError::network)
}

/// Statuses APIs use to signal rate limiting
pub fn is_throttling(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN
}

/// Transport failure (connect, timeout, body read)
pub fn transport_error(err: reqwest::Error) -> ProviderError {
    ProviderError::Failed(RetrievalError::network(err))
}

/// Error status that is not rate limiting
pub fn status_error(status: StatusCode) -> ProviderError {
    ProviderError::Failed(RetrievalError::Provider(format!("HTTP status {}", status.as_u16())))
}

/// Decode a JSON body
pub async fn json_body(response: reqwest::Response) -> Result<Value, ProviderError> {
    response
        .json::<Value>()
        .await
        .map_err(|e| ProviderError::Failed(RetrievalError::parse(e)))
}

/// String values of a JSON field that may be a scalar or a list
///
/// Numbers are rendered as text; anything else is ignored.
pub fn json_strings(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Number(n) => vec![n.to_string()],
        Value::Array(items) => items.iter().flat_map(json_strings).collect(),
        _ => Vec::new(),
    }
}

/// First string value of a JSON field
pub fn json_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}
