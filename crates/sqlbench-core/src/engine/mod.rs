pub mod evaluator;
pub mod orchestrator;
pub mod pool;
pub mod work;

pub use evaluator::{Evaluator, PartitionInputs};
pub use orchestrator::{EngineContext, Orchestrator, RunOutput};
pub use pool::{Completions, WorkerPool};
