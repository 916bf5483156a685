//! Content pipeline that turns a topic into a script, narration, visuals and
//! an assembly manifest by way of interchangeable external providers.

pub mod cli;
pub mod core;
pub mod interfaces;
mod logging;
