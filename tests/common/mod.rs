//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use hamustro::dialects::convert::{convert_batch_json, convert_json};
use hamustro::dialects::{BatchConverter, Converter, StorageClient};
use hamustro::error::{Error, Result};
use hamustro::event::Event;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory storage that records every payload and can be told to fail.
pub struct RecordingStorage {
    buffered: bool,
    failing: AtomicBool,
    delay_ms: AtomicU64,
    attempts: AtomicUsize,
    saves: Mutex<Vec<Vec<u8>>>,
}

impl RecordingStorage {
    pub fn buffered() -> Arc<Self> {
        Arc::new(Self::new(true))
    }

    pub fn unbuffered() -> Arc<Self> {
        Arc::new(Self::new(false))
    }

    fn new(buffered: bool) -> Self {
        Self {
            buffered,
            failing: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            attempts: AtomicUsize::new(0),
            saves: Mutex::new(Vec::new()),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make every save take at least `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Save calls, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.lock().unwrap().len()
    }

    /// Events of every successful save, grouped per save.
    pub fn batches(&self) -> Vec<Vec<Event>> {
        self.saves
            .lock()
            .unwrap()
            .iter()
            .map(|payload| {
                String::from_utf8(payload.clone())
                    .unwrap()
                    .lines()
                    .map(|line| serde_json::from_str(line).unwrap())
                    .collect()
            })
            .collect()
    }

    pub fn saved_events(&self) -> Vec<Event> {
        self.batches().into_iter().flatten().collect()
    }
}

#[async_trait]
impl StorageClient for RecordingStorage {
    fn name(&self) -> &str {
        "recording"
    }

    fn is_buffered_storage(&self) -> bool {
        self.buffered
    }

    fn converter(&self) -> Option<Converter> {
        (!self.buffered).then_some(convert_json as Converter)
    }

    fn batch_converter(&self) -> Option<BatchConverter> {
        self.buffered.then_some(convert_batch_json as BatchConverter)
    }

    async fn save(&self, payload: Vec<u8>) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Storage("injected failure".to_string()));
        }
        self.saves.lock().unwrap().push(payload);
        Ok(())
    }
}

pub fn event(name: &str) -> Event {
    Event {
        device_id: "a73b1c37-2c24-4786-af7a-16de88fbe23a".to_string(),
        client_id: "bce44f67b2661fd445d469b525b04f68".to_string(),
        session: "244f056dee6d475ec673ea0d20b69bab".to_string(),
        nr: 1,
        env: "DEVELOPMENT".to_string(),
        system_version: "10.10".to_string(),
        product_version: "1.1.2".to_string(),
        at: "2016-02-05T14:05:04".to_string(),
        event: name.to_string(),
        ..Event::default()
    }
}

pub fn event_names(events: &[Event]) -> Vec<String> {
    events.iter().map(|e| e.event.clone()).collect()
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
