//! ---
//! ems_section: "12-testing-qa"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "test"
//! ems_description: "Scripted device transports shared by coordinator tests."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use indevolt_catalog::RegisterKey;
use indevolt_core::{CoordinatorUpdate, UpdateListener};
use indevolt_net::{DeviceTransport, FetchError, RegisterValues};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;

pub fn values(pairs: &[(&str, Value)]) -> RegisterValues {
    pairs
        .iter()
        .map(|(key, value)| (RegisterKey::from(*key), value.clone()))
        .collect()
}

pub fn keys(raw: &[&str]) -> Vec<RegisterKey> {
    raw.iter().map(|key| RegisterKey::from(*key)).collect()
}

/// Replays scripted results; once the script runs dry it repeats `fallback`.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<RegisterValues, FetchError>>>,
    fallback: Result<RegisterValues, FetchError>,
    requests: Mutex<Vec<Vec<RegisterKey>>>,
    closes: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(
        script: Vec<Result<RegisterValues, FetchError>>,
        fallback: Result<RegisterValues, FetchError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        })
    }

    pub fn always(result: Result<RegisterValues, FetchError>) -> Arc<Self> {
        Self::new(Vec::new(), result)
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<Vec<RegisterKey>> {
        self.requests.lock().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceTransport for ScriptedTransport {
    async fn fetch(&self, keys: &[RegisterKey]) -> Result<RegisterValues, FetchError> {
        self.requests.lock().push(keys.to_vec());
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Answers every fetch with register `1664` set to 1, 2, 3, ...
#[derive(Default)]
pub struct CountingTransport {
    fetches: AtomicUsize,
}

impl CountingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl DeviceTransport for CountingTransport {
    async fn fetch(&self, _keys: &[RegisterKey]) -> Result<RegisterValues, FetchError> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(values(&[("1664", Value::from(n as u64))]))
    }
}

/// Blocks every fetch until the test releases a permit.
pub struct GatedTransport {
    gate: Semaphore,
    result: Result<RegisterValues, FetchError>,
    started: AtomicUsize,
    closes: AtomicUsize,
}

impl GatedTransport {
    pub fn new(result: Result<RegisterValues, FetchError>) -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            result,
            started: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        })
    }

    pub fn release(&self, fetches: usize) {
        self.gate.add_permits(fetches);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Yield until `count` fetches have entered the transport.
    pub async fn wait_started(&self, count: usize) {
        while self.started() < count {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl DeviceTransport for GatedTransport {
    async fn fetch(&self, _keys: &[RegisterKey]) -> Result<RegisterValues, FetchError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        match self.gate.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return Err(FetchError::Closed),
        }
        self.result.clone()
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Listener recording every update it receives.
#[derive(Default)]
pub struct Recorder {
    updates: Mutex<Vec<CoordinatorUpdate>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn updates(&self) -> Vec<CoordinatorUpdate> {
        self.updates.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.updates.lock().len()
    }
}

impl UpdateListener for Recorder {
    fn on_update(&self, update: &CoordinatorUpdate) {
        self.updates.lock().push(update.clone());
    }
}
