//! Pure invoice lifecycle rules: totals, numbering, transitions, notice
//! scheduling and display projection. Nothing here performs I/O.

pub mod display;
pub mod numbering;
pub mod schedule;
pub mod totals;
pub mod transitions;

pub use display::{display_status, DisplayStatus, Tone};
pub use numbering::format_invoice_number;
pub use totals::{compute_totals, Totals};
pub use transitions::{
    plan_transition, StatusChange, TransitionEffect, TransitionError, TransitionPlan,
    TransitionPolicy,
};
