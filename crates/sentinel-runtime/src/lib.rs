pub mod approval;
pub mod budget;
pub mod condition;
pub mod control;
pub mod gear;
pub mod json_extract;
pub mod orchestrator;
pub mod planner;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod router;
pub mod stripper;
pub mod validator;
pub mod watchdog;

pub use approval::{ApprovalDecision, ApprovalRegistry};
pub use budget::{CompositeSignal, JobBudgetConfig, TimeoutBudget};
pub use control::{ControlPlane, StatusEvent};
pub use gear::{EchoGear, GearAdapter, GearHandle};
pub use orchestrator::JobOrchestrator;
pub use planner::{FailureHandler, Planner, PlanningFailure};
pub use pool::{JobRunner, WorkerPool, WorkerPoolConfig};
pub use queue::JobQueue;
pub use registry::{ComponentRegistry, Handler};
pub use router::{MessageRouter, NullAuditSink};
pub use validator::Validator;
pub use watchdog::{MemoryWatchdog, PressureLevel, WatchdogConfig};
