//! [`ChannelSink`] – where the registry sends channel work.
//!
//! The registry runs on the tick thread and must never wait on channel
//! creation, so every call here is fire-and-forget.  The production
//! implementation is the Channel Manager in `foxbridge-middleware`;
//! [`RecordingSink`] captures the calls for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use foxbridge_types::SourceKind;

use crate::adapter::SourceHandle;

pub trait ChannelSink: Send + Sync {
    /// A source was registered; open a channel for it.
    fn add_channel(&self, source: SourceHandle);

    /// A source was removed; close its channel if it has one.
    fn remove_channel(&self, path: &str);

    /// Publish one tick's payloads, keyed by source path.
    fn dispatch(&self, payloads: HashMap<String, Vec<u8>>);

    /// Every source is gone; close all channels.
    fn clear(&self);
}

/// One recorded [`ChannelSink`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Added { path: String, kind: SourceKind },
    Removed(String),
    Dispatched(HashMap<String, Vec<u8>>),
    Cleared,
}

#[derive(Default)]
struct Recorded {
    events: Vec<SinkEvent>,
    channels: BTreeMap<String, SourceHandle>,
}

/// A [`ChannelSink`] that opens channels instantly and remembers everything.
#[derive(Default)]
pub struct RecordingSink {
    inner: Mutex<Recorded>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.lock().events.clone()
    }

    /// Paths that currently have a channel.
    pub fn channels(&self) -> Vec<String> {
        self.lock().channels.keys().cloned().collect()
    }

    /// The handle passed with `add_channel`, as a subscriber would see it.
    pub fn handle(&self, path: &str) -> Option<SourceHandle> {
        self.lock().channels.get(path).cloned()
    }

    /// Payload maps passed to `dispatch`, oldest first.
    pub fn dispatched(&self) -> Vec<HashMap<String, Vec<u8>>> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Dispatched(map) => Some(map.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChannelSink for RecordingSink {
    fn add_channel(&self, source: SourceHandle) {
        let mut inner = self.lock();
        inner.events.push(SinkEvent::Added {
            path: source.path.clone(),
            kind: source.kind,
        });
        inner.channels.insert(source.path.clone(), source);
    }

    fn remove_channel(&self, path: &str) {
        let mut inner = self.lock();
        inner.events.push(SinkEvent::Removed(path.to_string()));
        inner.channels.remove(path);
    }

    fn dispatch(&self, payloads: HashMap<String, Vec<u8>>) {
        self.lock().events.push(SinkEvent::Dispatched(payloads));
    }

    fn clear(&self) {
        let mut inner = self.lock();
        inner.events.push(SinkEvent::Cleared);
        inner.channels.clear();
    }
}
