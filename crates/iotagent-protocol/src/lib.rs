//! # iotagent-protocol
//!
//! Payload decoding and wire message types for the JSON IoT agent.
//!
//! This crate defines how raw transport bodies are decoded and the messages
//! exchanged with devices during configuration requests.

pub mod codec;
pub mod messages;

pub use codec::*;
pub use messages::*;
