//! 核心编排层：错误与恢复、运行时构建、状态投影、会话监管、任务调度、主控循环

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod state;
pub mod task_scheduler;

pub use builder::{AgentRuntime, RuntimeBuilder};
pub use error::{AgentError, CatalogError, RecoveryAction, RegistryError, RoutingError, SessionError, ToolError};
pub use orchestrator::{spawn_orchestrator, Command, OrchestratorHandle};
pub use recovery::RecoveryEngine;
pub use session_supervisor::SessionSupervisor;
pub use state::{AgentPhase, UiState};
pub use task_scheduler::TaskScheduler;
