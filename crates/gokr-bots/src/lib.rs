pub mod bootery;
pub mod config;
pub mod error;
pub mod github;
pub mod log_sanitize;
pub mod logging;
pub mod packer;
pub mod poller;
pub mod tree;
pub mod uboot;
pub mod workspace;

pub use error::{Error, Result};
