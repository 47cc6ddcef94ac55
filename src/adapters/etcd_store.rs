//! etcd-backed `ConfigStore`, the authoritative production store.
use std::collections::VecDeque;

use async_trait::async_trait;
use etcd_client::{Client, Event, EventType, GetOptions, WatchOptions};
use futures_util::stream;

use crate::ports::config_store::{ConfigStore, EventStream, StoreError, StoreEvent};

pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// Connect to the cluster. Failure here is fatal for the gateway.
    pub async fn connect(endpoints: &[String]) -> Result<Self, StoreError> {
        let client = Client::connect(endpoints, None)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self { client })
    }
}

fn convert_event(event: &Event) -> Option<StoreEvent> {
    let kv = event.kv()?;
    let key = String::from_utf8_lossy(kv.key()).into_owned();
    match event.event_type() {
        EventType::Put => Some(StoreEvent::Put {
            key,
            value: kv.value().to_vec(),
        }),
        EventType::Delete => Some(StoreEvent::Delete { key }),
    }
}

#[async_trait]
impl ConfigStore for EtcdStore {
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let mut client = self.client.clone();
        let response = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| StoreError::Operation(e.to_string()))?;

        Ok(response
            .kvs()
            .iter()
            .map(|kv| {
                (
                    String::from_utf8_lossy(kv.key()).into_owned(),
                    kv.value().to_vec(),
                )
            })
            .collect())
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<EventStream, StoreError> {
        let mut client = self.client.clone();
        let (watcher, watch_stream) = client
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await
            .map_err(|e| StoreError::Operation(e.to_string()))?;

        // The watcher handle must outlive the stream or etcd cancels the
        // watch, so it rides along in the unfold state.
        let events = stream::unfold(
            (watcher, watch_stream, VecDeque::<StoreEvent>::new(), false),
            |(watcher, mut watch_stream, mut pending, closed)| async move {
                loop {
                    if let Some(event) = pending.pop_front() {
                        return Some((Ok(event), (watcher, watch_stream, pending, closed)));
                    }
                    if closed {
                        return None;
                    }
                    match watch_stream.message().await {
                        Ok(Some(response)) => {
                            for event in response.events() {
                                if let Some(converted) = convert_event(event) {
                                    pending.push_back(converted);
                                }
                            }
                        }
                        Ok(None) => {
                            return Some((
                                Err(StoreError::WatchClosed),
                                (watcher, watch_stream, pending, true),
                            ));
                        }
                        Err(e) => {
                            return Some((
                                Err(StoreError::Operation(e.to_string())),
                                (watcher, watch_stream, pending, true),
                            ));
                        }
                    }
                }
            },
        );

        Ok(Box::pin(events))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        client
            .put(key, value, None)
            .await
            .map_err(|e| StoreError::Operation(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        client
            .delete(key, None)
            .await
            .map_err(|e| StoreError::Operation(e.to_string()))?;
        Ok(())
    }
}
