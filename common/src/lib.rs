//! Shared packet record layout for the flow monitor
//!
//! This crate provides the fixed-size record types and constants shared
//! between packet producers, the flow aggregator and the archive readers.

#![no_std]

pub mod constants;
pub mod types;

// Re-export commonly used types
pub use constants::*;
pub use types::{FlowKey, PacketRecord, Timestamp, TimestampParseError};
