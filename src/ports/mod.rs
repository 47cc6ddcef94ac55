pub mod config_store;
pub mod http_client;

pub use config_store::{ConfigStore, StoreError, StoreEvent};
pub use http_client::{HttpClient, ProxyError};
