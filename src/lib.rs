pub mod config;
pub mod controller;
pub mod error;
pub mod execution;
pub mod feeds;
pub mod models;
pub mod pricing;
pub mod strategies;
pub mod telemetry;
