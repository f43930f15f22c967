//! Bench procedures run against a rig sketch over a [`SerialLineChannel`]
//!
//! - `echo`: send one line and report the sketch's reply (marco/polo)
//! - `speed`: round-trip a payload for a fixed duration
//! - `stepper`: operator console for the stepper motor sketches
//! - `trials`: fixed per-trial command groups with paced replies
//!
//! [`SerialLineChannel`]: crate::serial::SerialLineChannel

pub mod echo;
pub mod speed;
pub mod stepper;
pub mod trials;

pub use echo::{echo, EchoOutcome};
pub use speed::{speed_test, SpeedReport};
pub use stepper::{run_stepper_console, StepperCommand, StepperMode, StepperSession};
pub use trials::{run_trials, TrialPlan, TrialRecord};

use crate::error::ChannelError;
use thiserror::Error;

/// Failures of an interactive exercise
#[derive(Debug, Error)]
pub enum ExerciseError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Operator console input or output failed
    #[error("console I/O failed: {0}")]
    Console(#[from] std::io::Error),
}
