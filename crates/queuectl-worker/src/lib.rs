pub mod config;
pub mod executor;
pub mod signal;
pub mod worker;

pub use config::WorkerConfig;
pub use executor::{CommandRunner, JobExecutor, ShellCommandRunner, TIMEOUT_MESSAGE};
pub use worker::{Worker, WorkerState, WorkerSummary};
pub use signal::{cancel_on_signal, shutdown_signal};
