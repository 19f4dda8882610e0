//! Alert evaluation engine.

mod alert_dispatcher;
mod alert_evaluator;
mod alert_flags;
mod alert_scheduler;
mod error;

pub use alert_dispatcher::*;
pub use alert_evaluator::*;
pub use alert_flags::*;
pub use alert_scheduler::*;
pub use error::*;
