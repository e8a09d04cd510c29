//! Phase scheduling and the pipeline driver.
//!
//! ```text
//! Pipeline ──► PhaseScheduler ──► TaskExecutor ──► AgentRunner ──► tools ──► store
//! ```

mod driver;
mod executor;
mod scheduler;

pub use driver::{PhaseObserver, Pipeline, PipelineReport};
pub use executor::{execute_isolated, AgentExecutor, TaskExecutor};
pub use scheduler::{PhaseOutcome, PhaseScheduler, SchedulerError};
