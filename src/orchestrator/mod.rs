//! Application-level orchestration.
//!
//! This module owns the run lifecycle (start/cancel/complete/fail), the session's
//! event subscription, the results availability gate and the form → parameters
//! collector. Front ends only feed it input and render its state.

mod collector;
mod controller;
mod events;
mod results_gate;

pub use collector::{collect, default_results_path, FormField, FormState};
pub(crate) use controller::Resolution;
pub use controller::{Controller, Controls, StartError};
