//! Agent relay: a multi-agent code generation pipeline.
//!
//! A coordinator plans a task, a coder writes Python, a tester writes unit
//! tests for it, and a runner executes both in a subprocess. Agents talk only
//! through typed messages routed by [`agent::MessageBus`].

pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod observer;
pub mod sandbox;
pub mod workspace;

pub use agent::{MessageBus, WorkflowRequest, WorkflowResult};
pub use config::Config;
