//! Agents and message routing.
//!
//! The workflow is driven by:
//! - Typed message envelopes and bounded per-agent memory
//! - A shared agent state machine with per-type dispatch
//! - Coordinator, coder, tester, and runner roles
//! - A factory mapping role tags to constructors
//! - A bus delivering messages depth-first between agents

mod bus;
mod coder;
mod coordinator;
mod core;
mod factory;
mod memory;
mod message;
mod runner;
mod submission;
mod tester;

pub use bus::{DeliveryRecord, DeliveryReport, GeneratedOutput, MessageBus, TranscriptEntry};
pub use coder::CoderAgent;
pub use coordinator::CoordinatorAgent;
pub use self::core::{Agent, AgentCore, AgentStatus, RoleType};
pub use factory::{AgentConstructor, AgentContext, AgentFactory};
pub use memory::{AgentMemory, SHORT_TERM_CAPACITY};
pub use message::{Message, MessageType, Metadata};
pub use runner::RunnerAgent;
pub use submission::{
    AgentDescriptor, AgentSnapshot, COORDINATOR_ID, SYSTEM_SENDER, WorkflowRequest,
    WorkflowResult, default_pipeline,
};
pub use tester::{FALLBACK_TESTS, TesterAgent, finalize_tests, repair_tests};
