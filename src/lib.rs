//! dagrun: run workflows of dependent steps as a DAG

pub mod cli;
pub mod config;
pub mod logging;
pub mod signals;
pub mod workflow;
