//! Per-destination virtual sessions.
//!
//! A destination only accepts control messages after it has seen a
//! `CONNECT` from this sender on the connection namespace. The set
//! belongs to one link; a reconnect starts from an empty set.

use std::collections::HashSet;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::CastError;
use crate::message::{Request, RequestBody};
use crate::namespace::NS_CONNECTION;
use crate::writer::EnvelopeWriter;

#[derive(Debug, Default)]
pub struct SessionSet {
    established: Mutex<HashSet<String>>,
}

impl SessionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `CONNECT` to `destination` unless that already happened.
    ///
    /// Returns `true` when a handshake was written. The set stays locked
    /// across the write, so no caller can get a message to
    /// `destination` out ahead of its `CONNECT`.
    pub async fn ensure(
        &self,
        destination: &str,
        writer: &EnvelopeWriter,
    ) -> Result<bool, CastError> {
        let mut established = self.established.lock().await;
        if established.contains(destination) {
            return Ok(false);
        }

        writer
            .write_request(
                NS_CONNECTION,
                destination,
                &Request::from(RequestBody::connect()),
                None,
            )
            .await?;
        established.insert(destination.to_owned());
        debug!(destination, "virtual session established");
        Ok(true)
    }

    pub async fn contains(&self, destination: &str) -> bool {
        self.established.lock().await.contains(destination)
    }

    pub async fn len(&self) -> usize {
        self.established.lock().await.len()
    }
}
