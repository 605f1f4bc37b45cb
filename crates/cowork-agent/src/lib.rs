//! Task execution: conversation state, the task tree, the Approval Gate,
//! and the turn-loop state machine that drives them.

pub mod approval;
pub mod context;
pub mod conversation;
pub mod daemon;
pub mod executor;

pub use approval::{ApprovalGate, TaskApprovalSink};
pub use context::ContextManager;
pub use conversation::Conversation;
pub use daemon::{recv_or_gap, AgentDaemon, MAX_TASK_DEPTH};
pub use executor::{ExecutorConfig, TaskExecutor};
