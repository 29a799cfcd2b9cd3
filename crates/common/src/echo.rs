//! Echo backend wire contract.
//!
//! A cooperating backend answers every request with an [`EchoRecord`]
//! describing exactly what it received, so assertions can inspect what the
//! gateway did to the request on its way through. Two request headers drive
//! the backend's response:
//!
//! - `Requested-Status: <code>` sets the response status.
//! - `Requested-Header: <name>[, <name>...]` copies the named request
//!   headers onto the response.

use crate::error::{KatError, Result};
use crate::headers::Headers;
use serde::{Deserialize, Serialize};

/// Request header selecting the echo backend's response status.
pub const REQUESTED_STATUS: &str = "requested-status";

/// Request header naming request headers to copy onto the response.
pub const REQUESTED_HEADER: &str = "requested-header";

/// Name reported for responses that are JSON but not echo records.
pub const RAW_BACKEND: &str = "raw";

/// Full echo response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoRecord {
    /// Name of the backend that handled the request.
    pub backend: String,

    /// The request as the backend received it.
    pub request: EchoRequest,

    /// Extra response details the backend chose to emit.
    #[serde(default)]
    pub response: EchoResponse,
}

/// Request as received by the echo backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoRequest {
    pub method: String,
    pub url: EchoUrl,
    pub headers: Headers,
    pub host: String,
    #[serde(default)]
    pub tls: TlsState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoUrl {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

/// TLS state of the connection the backend accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsState {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoResponse {
    #[serde(default)]
    pub headers: Headers,
}

impl EchoRecord {
    /// Parse an echo record from a response body.
    ///
    /// # Errors
    ///
    /// Returns `KatError::Serialization` if the body is not an echo record.
    pub fn from_json(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// Serialize to the JSON body the backend sends.
    ///
    /// # Errors
    ///
    /// Returns `KatError::Serialization` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Status requested through `Requested-Status`, if present and valid.
///
/// # Errors
///
/// Returns `KatError::Configuration` when the header is present but is not
/// a status code in `100..=599`.
pub fn requested_status(headers: &Headers) -> Result<Option<u16>> {
    let Some(raw) = headers.first(REQUESTED_STATUS) else {
        return Ok(None);
    };

    let status: u16 = raw.trim().parse().map_err(|_| {
        KatError::Configuration(format!("{REQUESTED_STATUS} must be numeric, got '{raw}'"))
    })?;

    if !(100..=599).contains(&status) {
        return Err(KatError::Configuration(format!(
            "{REQUESTED_STATUS} out of range: {status}"
        )));
    }

    Ok(Some(status))
}

/// Header names requested through `Requested-Header`.
#[must_use]
pub fn requested_headers(headers: &Headers) -> Vec<String> {
    headers
        .get(REQUESTED_HEADER)
        .unwrap_or_default()
        .iter()
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
