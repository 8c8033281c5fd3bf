pub mod config;
pub mod crawl;
pub mod engine;
pub mod fetch;
pub mod http_client;
pub mod populate;
pub mod roster;
pub mod schema;
pub mod state;
