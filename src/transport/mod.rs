//! Transport layer: terminal and HTTP surfaces

pub mod cli;
pub mod http;

pub use http::{AppState, ServiceInfo};
