//! The shipyard daemon: reconciler wiring, periodic sync and the control
//! socket.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod settings;
pub mod state;

pub use error::DaemonError;
pub use protocol::{
    request_events, request_hook, request_services, request_status, request_stop, request_sync,
    request_update, request_worklog, send_request, watch, DaemonRequest, DaemonResponse,
};
pub use runtime::{build_reconciler, run, run_with, start_blocking};
pub use settings::Settings;
pub use state::{DaemonState, HookEvent, HOOK_HISTORY};
