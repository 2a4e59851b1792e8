pub mod client;
pub mod config;
pub mod runner;

pub use client::ApiProbe;
pub use config::ProbeConfig;
pub use runner::{run, RunOptions, Selection};
