//! In-memory `ConfigStore` used by tests and local development.
//!
//! Mirrors the semantics the gateway relies on from the real store:
//! ordered prefix reads and broadcast watch events. Watchers that fall
//! behind the broadcast buffer observe an error and are expected to
//! re-subscribe, the same contract as a broken remote watch.
use std::{
    collections::BTreeMap,
    sync::Mutex,
};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::ports::config_store::{ConfigStore, EventStream, StoreError, StoreEvent};

pub struct MemoryStore {
    data: Mutex<BTreeMap<String, Vec<u8>>>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            data: Mutex::new(BTreeMap::new()),
            events,
        }
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is fine; events are only for live watchers.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let data = self.data.lock().unwrap();
        Ok(data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<EventStream, StoreError> {
        let prefix = prefix.to_string();
        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(move |item| {
            let prefix = prefix.clone();
            async move {
                match item {
                    Ok(event) if event.key().starts_with(&prefix) => Some(Ok(event)),
                    Ok(_) => None,
                    Err(_) => Some(Err(StoreError::Operation("watch lagged".to_string()))),
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.clone());
        self.publish(StoreEvent::Put {
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let existed = self.data.lock().unwrap().remove(key).is_some();
        if existed {
            self.publish(StoreEvent::Delete {
                key: key.to_string(),
            });
        }
        Ok(())
    }
}
