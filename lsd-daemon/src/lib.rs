//! lsdd: accepts signed power-management requests over UDP and schedules them.

pub mod config;
pub mod engine;
pub mod scheduler;
pub mod sink;

pub use config::Config;
pub use engine::Engine;
pub use scheduler::{ArmedAction, ScheduleError, Scheduler};
pub use sink::{ActionSink, ConfirmationSink, NotificationSink, Sinks};
