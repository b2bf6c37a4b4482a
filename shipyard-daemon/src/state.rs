//! Request handling shared by every control connection.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::info;

use shipyard_core::ServiceName;
use shipyard_reconcile::Reconciler;

use crate::error::DaemonError;
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Webhook payloads kept for `events`.
pub const HOOK_HISTORY: usize = 100;

/// One received webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookEvent {
    pub received_at: DateTime<Utc>,
    pub payload: Value,
}

pub struct DaemonState {
    reconciler: Arc<Reconciler>,
    events: Mutex<VecDeque<HookEvent>>,
    started_at: DateTime<Utc>,
    workers: usize,
    socket: PathBuf,
    shutdown: broadcast::Sender<()>,
}

impl DaemonState {
    pub fn new(
        reconciler: Arc<Reconciler>,
        workers: usize,
        socket: PathBuf,
        shutdown: broadcast::Sender<()>,
    ) -> Arc<Self> {
        Arc::new(Self {
            reconciler,
            events: Mutex::new(VecDeque::with_capacity(HOOK_HISTORY)),
            started_at: Utc::now(),
            workers,
            socket,
            shutdown,
        })
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub(crate) fn shutdown_sender(&self) -> &broadcast::Sender<()> {
        &self.shutdown
    }

    /// Answer a one-shot request. `watch` and `stop` need the connection
    /// itself and are handled by the socket server.
    pub fn handle(&self, request: DaemonRequest) -> DaemonResponse {
        match self.dispatch(request) {
            Ok(data) => DaemonResponse::ok(data),
            Err(err) => DaemonResponse::error(err.to_string()),
        }
    }

    fn dispatch(&self, request: DaemonRequest) -> Result<Value, DaemonError> {
        match request.cmd.as_str() {
            "status" => Ok(self.status()),
            "sync" => {
                let reason = request.reason.unwrap_or_else(|| "manual".to_string());
                self.reconciler.trigger_sync(reason.as_str())?;
                Ok(json!({ "scheduled": true, "reason": reason }))
            }
            "hook" => {
                self.record_hook(request.payload.unwrap_or(Value::Null));
                self.reconciler.trigger_sync("webhook")?;
                Ok(json!({ "scheduled": true }))
            }
            "events" => Ok(serde_json::to_value(self.events())?),
            "services" => Ok(serde_json::to_value(self.reconciler.registry().list())?),
            "worklog" => Ok(serde_json::to_value(self.reconciler.work_log().snapshot())?),
            "update" => {
                let service = request
                    .service
                    .ok_or_else(|| DaemonError::Protocol("update requires 'service'".into()))?;
                let descriptor = request
                    .descriptor
                    .ok_or_else(|| DaemonError::Protocol("update requires 'descriptor'".into()))?;
                let updated = self
                    .reconciler
                    .update_descriptor(&ServiceName::from(service), descriptor)?;
                Ok(serde_json::to_value(updated)?)
            }
            cmd @ ("watch" | "stop") => Err(DaemonError::Protocol(format!(
                "'{cmd}' is only available on a socket connection"
            ))),
            other => Err(DaemonError::Protocol(format!("unknown command '{other}'"))),
        }
    }

    pub fn status(&self) -> Value {
        json!({
            "running": true,
            "started_at_unix": self.started_at.timestamp(),
            "workers": self.workers,
            "pending_jobs": self.reconciler.scheduler().pending(),
            "services": self.reconciler.registry().len(),
            "work_log_entries": self.reconciler.work_log().len(),
            "socket": self.socket.display().to_string(),
            "work_dir": self.reconciler.work_root().display().to_string(),
        })
    }

    pub fn record_hook(&self, payload: Value) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() == HOOK_HISTORY {
            events.pop_front();
        }
        events.push_back(HookEvent {
            received_at: Utc::now(),
            payload,
        });
        info!(retained = events.len(), "webhook received");
    }

    /// Retained webhook payloads, oldest first.
    pub fn events(&self) -> Vec<HookEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}
