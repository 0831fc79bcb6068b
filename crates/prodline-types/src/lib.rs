//! Shared prodline spec, result, and error model types.
//!
//! This crate carries no I/O so both the engine and external tooling can
//! depend on it without pulling in the runtime stack.

pub mod codec;
pub mod environment;
pub mod errors;
pub mod node;
pub mod operator;
pub mod pipeline;
pub mod result;
pub mod storage;

pub use errors::PipelineError;
pub use result::{ExecutionResult, OperatorStatus, ResourceSample};
