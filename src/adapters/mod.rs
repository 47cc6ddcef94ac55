pub mod admin_api;
pub mod etcd_store;
pub mod health_checker;
pub mod http_client;
pub mod http_handler;
pub mod memory_store;
pub mod watcher;

pub use etcd_store::EtcdStore;
pub use health_checker::HealthChecker;
pub use http_client::HttpClientAdapter;
pub use http_handler::HttpHandler;
pub use memory_store::MemoryStore;
pub use watcher::ConfigWatcher;
