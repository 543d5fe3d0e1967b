//! Knowledge: keyed hot-state store and its gRPC surface.
//!
//! The store is authoritative for detection and action lifecycles, registered
//! databases, and system config. Other services reach it through
//! [`KnowledgeApi`]: in production via [`GrpcKnowledge`], in tests directly
//! against the in-process [`KnowledgeStore`].

mod api;
mod client;
mod service;
pub mod store;

pub use api::KnowledgeApi;
pub use client::GrpcKnowledge;
pub use service::KnowledgeRpcService;
pub use store::{DetectionEntry, DetectionState, KnowledgeStore, StoreStatus};
