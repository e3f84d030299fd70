//! Client SDK
//!
//! A thin pass-through: each call opens one connection to the
//! configured node, sends one protocol request and reads one response.
//! The contacted node routes to the owner transparently, so a client
//! may talk to any cluster member.

use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::protocol::{ProtocolError, Request, Response, Status};

/// Failures surfaced to application code.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A valid Get on a missing or expired key. Distinct from
    /// connection errors so callers can treat it as a normal outcome.
    #[error("key not found")]
    NotFound,
    /// The contacted node answered with an Error status.
    #[error("server error: {0}")]
    Server(String),
    #[error("malformed keys payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Cache client bound to one cluster node address.
#[derive(Debug, Clone)]
pub struct Client {
    addr: String,
}

impl Client {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Store a key-value pair. A zero `ttl` never expires.
    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), ClientError> {
        let response = self.send(&Request::set(key, value, ttl)).await?;
        expect_ok(response).map(|_| ())
    }

    /// Retrieve a value. Returns [`ClientError::NotFound`] for missing
    /// or expired keys.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, ClientError> {
        let response = self.send(&Request::get(key)).await?;
        match response.status {
            Status::Ok => Ok(response.value),
            Status::NotFound => Err(ClientError::NotFound),
            Status::Error => Err(ClientError::Server(response.message)),
        }
    }

    /// Remove a key. Succeeds whether or not the key existed.
    pub async fn delete(&self, key: &str) -> Result<(), ClientError> {
        let response = self.send(&Request::delete(key)).await?;
        expect_ok(response).map(|_| ())
    }

    /// List the non-expired keys held by the contacted node.
    pub async fn keys(&self) -> Result<Vec<String>, ClientError> {
        let response = self.send(&Request::keys()).await?;
        let value = expect_ok(response)?;
        Ok(serde_json::from_slice(&value)?)
    }

    /// Check that the contacted node is up.
    pub async fn ping(&self) -> Result<(), ClientError> {
        let response = self.send(&Request::ping()).await?;
        expect_ok(response).map(|_| ())
    }

    /// One connection, one request, one response.
    async fn send(&self, request: &Request) -> Result<Response, ClientError> {
        debug!("sending {:?} to {}", request.command, self.addr);
        let mut stream = TcpStream::connect(&self.addr).await?;
        stream.write_all(&request.encode()).await?;
        stream.flush().await?;
        Ok(Response::read_from(&mut stream).await?)
    }
}

fn expect_ok(response: Response) -> Result<Vec<u8>, ClientError> {
    match response.status {
        Status::Ok => Ok(response.value),
        Status::NotFound => Err(ClientError::NotFound),
        Status::Error => Err(ClientError::Server(response.message)),
    }
}
