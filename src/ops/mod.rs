//! Operator commands against a running node

pub mod client;

pub use client::ConfigClient;
