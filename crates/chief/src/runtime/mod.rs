pub mod dispatcher;
pub mod executor;

pub use dispatcher::{Dispatcher, JobState, TriggerEvent, EXIT_INTERRUPTED};
pub use executor::{build_worker_env, make_run_id, run_job, run_script};
