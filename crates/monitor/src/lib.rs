//! Telemetry for chief: the event model, the scheduler-side buffered
//! emitter, and the worker-side client library.

pub mod emitter;
pub mod event;
pub mod worker;

pub use emitter::MonitorEmitter;
pub use event::{Level, MonitorEvent};
pub use worker::{WorkerClient, WorkerContext};
