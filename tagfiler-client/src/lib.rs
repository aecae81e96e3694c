pub mod config;
pub mod http;
pub mod refresh;
pub mod schemas;
pub mod session;
