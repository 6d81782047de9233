// src/server/transport.rs

//! Local HTTP transport to the persistent server.
//!
//! Payloads are opaque: only transport-level outcomes (connect failure,
//! timeout, other I/O) are interpreted. Any HTTP status is a response.

use std::time::Duration;

use reqwest::{Client, Method};
use serde_json::Value;
use tracing::debug;

use crate::errors::{BridgeError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct ServerRequest {
    pub method: String,
    pub path: String,
    pub body: Option<Value>,
}

impl ServerRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: "POST".to_string(),
            path: path.into(),
            body: Some(body),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerResponse {
    pub status: u16,
    pub body: String,
}

impl ServerResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone)]
pub struct ServerClient {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl ServerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue one request. Connect failures map to
    /// [`BridgeError::ServerCrash`], elapsed deadlines to
    /// [`BridgeError::RequestTimeout`].
    pub async fn send(&self, request: &ServerRequest) -> Result<ServerResponse> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| BridgeError::Request(format!("invalid method {:?}", request.method)))?;
        let url = join_url(&self.base_url, &request.path);
        debug!(%method, %url, "sending request to server");

        let mut builder = self.http.request(method, &url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.classify(e))?;
        Ok(ServerResponse { status, body })
    }

    fn classify(&self, err: reqwest::Error) -> BridgeError {
        if err.is_timeout() {
            BridgeError::RequestTimeout {
                timeout: self.timeout,
            }
        } else if err.is_connect() {
            BridgeError::ServerCrash(err.to_string())
        } else {
            BridgeError::Request(err.to_string())
        }
    }
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        base.to_string()
    } else if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}
