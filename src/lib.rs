pub mod archive;
pub mod config;
pub mod logging;
pub mod resolver;
pub mod server;
