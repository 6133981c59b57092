//! 核心编排层：错误与恢复、循环状态机、任务事件、任务管理、编排器与构建器

pub mod builder;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod recovery;
pub mod state;
pub mod task_manager;

pub use builder::{create_reasoner_from_config, ResearchBuilder};
pub use error::ResearchError;
pub use events::{EventSink, TaskEvent, TaskSubscription};
pub use orchestrator::{Orchestrator, ResearchOutcome, ResearchRequest};
pub use recovery::{LoopFault, RecoveryAction, RecoveryEngine};
pub use state::AgentPhase;
pub use task_manager::{TaskFuture, TaskId, TaskInfo, TaskManager, TaskRunner, TaskStatus};
