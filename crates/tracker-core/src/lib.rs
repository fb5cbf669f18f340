pub mod applier;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod io;
pub mod notify;
pub mod order;
pub mod paths;
pub mod rules;
pub mod selector;
pub mod store;
pub mod trigger;
pub mod types;

pub use error::{ApplyError, CycleError, Result, TrackerError};
