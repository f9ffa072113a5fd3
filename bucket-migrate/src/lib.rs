pub mod cache;
pub mod cli;
pub mod load_config;
pub mod report;
pub mod storage;

pub use cli::{run, Cli, Commands};
