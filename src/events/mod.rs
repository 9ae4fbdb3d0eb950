//! # Listener & Event Dispatch
//!
//! Listener contracts, the dispatcher that fans lifecycle events out to them, and
//! a ready-made logging listener.

pub mod dispatcher;
pub mod listener;
pub mod logging_listener;

pub use dispatcher::{DispatcherStats, EventDispatcher};
pub use listener::{JobEventListener, JobListener};
pub use logging_listener::LoggingEventListener;
