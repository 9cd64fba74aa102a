pub mod error;
pub mod evaluator;
pub mod fallback;
pub mod gateway;
pub mod manager;
pub mod notify;
pub mod orchestrator;
pub mod report;
pub mod repository;
pub mod scenario;
pub mod scoring;
pub mod session;
pub mod step;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{PracticeError, Result, StoreError};
pub use manager::{
    EngineSettings, RespondOutcome, RespondRequest, Repositories, SessionManager,
    SessionStatusView, StartedSession,
};
pub use scenario::{Scenario, StartRequest, UserContext};
pub use session::{Session, SessionStatus};
pub use step::{Evaluation, Step, StepType};
