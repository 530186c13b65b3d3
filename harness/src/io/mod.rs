//! Side-effecting modules: filesystem discovery, run context persistence,
//! run storage, heal requests and configuration.

pub mod config;
pub mod context;
pub mod discovery;
pub mod heal;
pub mod storage;
