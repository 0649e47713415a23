//! Rule-based workflow automation over candidate activities.

pub mod effects;
pub mod engine;
pub mod loader;
pub mod trigger;

pub use effects::{ActionError, Effects, HttpEffects, Notification, TracingEffects};
pub use engine::WorkflowEngine;
