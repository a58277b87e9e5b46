pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod git;
pub mod log;
pub mod model;
pub mod orchestration;
pub mod tracker;

pub use error::{Error, Result};
