pub mod api;
pub mod bus;
pub mod config;
pub mod content;
pub mod interceptor;
pub mod prometheus;
pub mod publisher;
pub mod record;
pub mod router;
pub mod server;
pub mod sinks;
