//! Minimal client for a running daemon's HTTP API.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to reach daemon at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: reqwest::Error,
    },

    #[error("daemon answered {status}")]
    Status { status: reqwest::StatusCode },

    #[error("failed to parse response: {0}")]
    Parse(reqwest::Error),
}

pub struct ApiClient {
    addr: SocketAddr,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            http: reqwest::Client::new(),
        }
    }

    pub async fn status(&self) -> Result<Value, ClientError> {
        self.get("/status").await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = format!("http://{}{}", self.addr, path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| ClientError::Connect {
                addr: self.addr,
                source,
            })?;

        if !response.status().is_success() {
            return Err(ClientError::Status {
                status: response.status(),
            });
        }

        response.json().await.map_err(ClientError::Parse)
    }
}
