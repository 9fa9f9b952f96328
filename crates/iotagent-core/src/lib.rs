//! # iotagent-core
//!
//! Core data model and measure extraction for the JSON IoT agent.
//!
//! This crate provides:
//! - Data model types (DeviceDescriptor, AttributeRecord, Dialect, etc.)
//! - Attribute type inference
//! - Attribute extraction for plain, NGSIv2 and NGSI-LD payloads
//! - Topic parsing and flow selection
//! - In-memory context store
//! - Configuration storage abstraction
//!
//! This crate is intentionally runtime-agnostic and contains no async code.

pub mod config;
pub mod extract;
pub mod inference;
pub mod model;
pub mod store;
pub mod topic;

pub use extract::extract;
pub use inference::infer_type;
pub use model::*;
pub use store::{ContextStore, MemoryStore};
pub use topic::{route, select_flow, Flow, Route, RouteError, TopicParts};
