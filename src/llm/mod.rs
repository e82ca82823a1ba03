//! Model adapter seam.
//!
//! The rest of the crate treats the model endpoints as opaque: `embed`,
//! `reason`, and `generate`. [`HttpModelClient`] speaks JSON over HTTP to a
//! configured endpoint; [`HashEmbeddingClient`] is a deterministic provider
//! used in tests and offline runs.

mod client;
mod types;

pub use client::{HashEmbeddingClient, HttpModelClient, ModelClient, ModelClientConfig};
pub use types::{
    GenerateRequest, PlanData, PlanStepData, ReasonRequest, ReasonResponse, ToolDescriptor,
};
