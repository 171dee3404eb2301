//! Teacher/student VLM workbench session layer.
//!
//! This crate holds the client-side orchestration behind the comparison
//! workbench:
//!
//! - **Comparison Orchestrator** ([`comparison`]): one image + prompt fans
//!   out to two independent inference requests whose results, errors and
//!   loading state are tracked per model.
//! - **Feedback Session** ([`feedback`]): pass/fail labels per model and a
//!   pairwise preference, each with a transient status that expires on its
//!   own timer.
//!
//! Both live inside the [`Workbench`] state container, which is driven by a
//! [`SessionDriver`]. All network traffic goes through the [`Backend`]
//! trait.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut driver = SessionDriver::new(backend, SessionOptions::default());
//! driver.load_image(bytes, "road.jpg");
//! driver.set_prompt("Describe this scene");
//! driver.run_comparison()?;
//! driver.settle_comparison().await;
//! driver.submit_label(ModelIdentity::Student, true)?;
//! ```

pub mod backend;
pub mod comparison;
pub mod driver;
pub mod error;
pub mod feedback;
pub mod history;
pub mod types;
pub mod workbench;

pub use backend::{Backend, DpoFeedback, SftFeedback, SharedBackend};
pub use comparison::{ComparisonState, ComparisonTicket, Settlement, BANNER_SEPARATOR};
pub use driver::{SessionDriver, SessionEvent, SessionOptions};
pub use error::{RequestError, SessionError};
pub use feedback::{ExpiryTimers, FeedbackSession, DEFAULT_FEEDBACK_EXPIRY};
pub use history::{TransitionKind, TransitionLog, TransitionRecord};
pub use types::{
    AttemptId, FeedbackActionKey, FeedbackStatus, HealthStatus, InferenceOutput, InputBundle,
    ModelIdentity, ModelRun, PreferenceSelection,
};
pub use workbench::{ImageSummary, Workbench, WorkbenchSnapshot};
