//! Robin Runtime - configuration, pipeline orchestration and callable tools

pub mod config;
pub mod pipeline;
pub mod tools;

#[cfg(test)]
mod testing;

pub use config::*;
pub use pipeline::*;
pub use tools::*;
