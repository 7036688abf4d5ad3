pub mod bridge;
pub mod config;
pub mod document;
pub mod errors;
pub mod executor;
pub mod graph;
pub mod types;
