//! # shipyard-exec
//!
//! Execution plumbing shared by the reconciliation pipeline:
//!
//! - [`CommandRunner`] runs one external command with a timeout and appends a
//!   [`CommandResult`] to the [`WorkLog`]. It never fails; exit code and
//!   captured output are the only signals.
//! - [`WorkLog`] is the append-only record of every external interaction.
//!   Observers are notified through a leading+trailing [`Debouncer`].
//! - [`Scheduler`] is a FIFO queue drained by a fixed pool of workers, with
//!   jobs that share a key executed one at a time.

pub mod debounce;
pub mod error;
pub mod executor;
pub mod record;
pub mod runner;
pub mod scheduler;
pub mod work_log;

pub use debounce::{Debouncer, Decision};
pub use error::ExecError;
pub use executor::{ProcessExecutor, ProcessOutput, SystemExecutor};
pub use record::{CommandResult, CommandSpec};
pub use runner::CommandRunner;
pub use scheduler::{Job, JobResult, Scheduler, SchedulerHandle};
pub use work_log::{WorkLog, WorkSnapshot};
