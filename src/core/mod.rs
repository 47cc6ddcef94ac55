pub mod balancer;
pub mod context;
pub mod middleware;
pub mod registry;
pub mod route;
pub mod route_table;
pub mod upstream;

pub use balancer::{Balancer, SelectError};
pub use registry::UpstreamRegistry;
pub use route::Route;
pub use route_table::RouteTable;
pub use upstream::Upstream;
