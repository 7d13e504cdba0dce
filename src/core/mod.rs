//! Core translation engine module

pub mod batch_job;
pub mod client;
pub mod config;
pub mod errors;
pub mod grouper;
pub mod models;
pub mod protocol;
pub mod registry;
pub mod store;
pub mod token_budget;
