pub mod api;
pub mod config;
pub mod fs;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod router;
pub mod server;
pub mod source;
pub mod test_utils;
