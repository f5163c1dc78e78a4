pub mod keepalive;
pub mod logging;
pub mod shutdown;
pub mod store;
pub mod tls;
