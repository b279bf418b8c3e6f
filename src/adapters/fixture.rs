//! Scripted Provider
//!
//! `QuoteProvider` test double with configurable latency and failures that
//! records every call, for exercising coalescing and gate behaviour
//! without network access.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::domain::ports::QuoteProvider;
use crate::error::{Error, Result};

/// Records calls and answers with `{"key": ..., "call": n}` payloads.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    latency: RwLock<Duration>,
    failing: RwLock<HashSet<String>>,
    calls: RwLock<HashMap<String, usize>>,
    started: RwLock<Vec<String>>,
    total: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    /// Create a provider that answers immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider that sleeps `latency` inside every call
    pub fn with_latency(latency: Duration) -> Self {
        let provider = Self::default();
        *provider.latency.write() = latency;
        provider
    }

    /// Make calls for `key` fail (or succeed again).
    pub fn set_failing(&self, key: &str, failing: bool) {
        let mut set = self.failing.write();
        if failing {
            set.insert(key.to_string());
        } else {
            set.remove(key);
        }
    }

    /// Calls made for one key
    pub fn calls_for(&self, key: &str) -> usize {
        self.calls.read().get(key).copied().unwrap_or(0)
    }

    /// Calls made in total
    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Calls currently inside `fetch`
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous calls observed
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Keys in the order their calls started
    pub fn started(&self) -> Vec<String> {
        self.started.read().clone()
    }

    /// Payload produced for the `call`-th fetch of `key`
    pub fn payload_for(key: &str, call: usize) -> Bytes {
        Bytes::from(format!(r#"{{"key":"{}","call":{}}}"#, key, call))
    }
}

#[async_trait]
impl QuoteProvider for ScriptedProvider {
    async fn fetch(&self, key: &str) -> Result<Bytes> {
        let call = {
            let mut calls = self.calls.write();
            let count = calls.entry(key.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        self.started.write().push(key.to_string());
        self.total.fetch_add(1, Ordering::SeqCst);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.read().contains(key) {
            return Err(Error::ProviderStatus {
                key: key.to_string(),
                status: 503,
            });
        }
        Ok(Self::payload_for(key, call))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
