//! Side-effecting operations: config files, child processes, the embedded
//! store and the remote service.

pub mod client;
pub mod config;
pub mod process;
pub mod store;
