//! Device reader abstraction.
//!
//! The collector only sees this trait, so the Bluetooth transport can be
//! swapped for a scripted mock in tests.

use super::DeviceData;
use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error;

/// Errors that can occur while reading from a device.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The wireless link or the local Bluetooth stack failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// The device answered with something that could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Trait for device readers.
///
/// `fetch` blocks for the duration of a wireless transaction. Readers
/// perform no caching and no retries.
pub trait DeviceReader: Send + Sync {
    /// Reads firmware info and sensor values from the device at `address`
    /// through the local adapter `adapter`.
    fn fetch(&self, address: &str, adapter: &str) -> Result<DeviceData, ReadError>;
}

/// Mock reader that replays scripted responses in order.
///
/// Once the script is exhausted every fetch fails with a transport error.
#[derive(Debug, Default)]
pub struct MockDevice {
    script: Mutex<VecDeque<Result<DeviceData, ReadError>>>,
    requests: Mutex<Vec<(String, String)>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful response.
    pub fn push_ok(&self, data: DeviceData) {
        self.lock_script().push_back(Ok(data));
    }

    /// Queues a failed response.
    pub fn push_err(&self, err: ReadError) {
        self.lock_script().push_back(Err(err));
    }

    /// Number of fetches performed so far.
    pub fn calls(&self) -> usize {
        self.lock_requests().len()
    }

    /// Address and adapter of every fetch, oldest first.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.lock_requests().clone()
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<DeviceData, ReadError>>> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_requests(&self) -> std::sync::MutexGuard<'_, Vec<(String, String)>> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DeviceReader for MockDevice {
    fn fetch(&self, address: &str, adapter: &str) -> Result<DeviceData, ReadError> {
        self.lock_requests()
            .push((address.to_string(), adapter.to_string()));

        let response = self.lock_script().pop_front();
        tracing::trace!(address, adapter, scripted = response.is_some(), "MockDevice fetch");

        response.unwrap_or_else(|| Err(ReadError::Transport("no scripted response".into())))
    }
}
