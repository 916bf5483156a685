pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod provider;
pub mod terminal;
pub mod trends;
