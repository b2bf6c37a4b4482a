//! Newline-delimited JSON over the daemon's Unix socket.
//!
//! One request line, one response line. `watch` is the exception: after the
//! response the daemon keeps writing one work-log snapshot per line.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use shipyard_core::UpdateDescriptor;
use shipyard_exec::CommandResult;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// JSON newline-delimited request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Raw webhook body for `hook`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<UpdateDescriptor>,
}

impl DaemonRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..Self::default()
        }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn into_data(self) -> Result<Value, DaemonError> {
        if self.ok {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(DaemonError::Protocol(
                self.error
                    .unwrap_or_else(|| "unknown daemon error".to_string()),
            ))
        }
    }
}

fn connect(home: &Path) -> Result<UnixStream, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }
    UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })
}

fn write_request(
    stream: &mut UnixStream,
    home: &Path,
    request: &DaemonRequest,
) -> Result<(), DaemonError> {
    let socket = socket_path(home);
    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .and_then(|()| stream.write_all(b"\n"))
        .and_then(|()| stream.flush())
        .map_err(|e| io_err(&socket, e))
}

fn read_response(
    reader: &mut BufReader<UnixStream>,
    home: &Path,
) -> Result<DaemonResponse, DaemonError> {
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(socket_path(home), e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let mut stream = connect(home)?;
    write_request(&mut stream, home, request)?;
    read_response(&mut BufReader::new(stream), home)
}

fn call(home: &Path, request: DaemonRequest) -> Result<Value, DaemonError> {
    send_request(home, &request)?.into_data()
}

/// Status, retrying briefly while a freshly started daemon binds its socket.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::new("status");
    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => return response.into_data(),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                }
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    call(home, DaemonRequest::new("stop")).map(|_| ())
}

pub fn request_sync(home: &Path, reason: Option<String>) -> Result<Value, DaemonError> {
    call(
        home,
        DaemonRequest {
            reason,
            ..DaemonRequest::new("sync")
        },
    )
}

pub fn request_hook(home: &Path, payload: Value) -> Result<Value, DaemonError> {
    call(
        home,
        DaemonRequest {
            payload: Some(payload),
            ..DaemonRequest::new("hook")
        },
    )
}

pub fn request_events(home: &Path) -> Result<Value, DaemonError> {
    call(home, DaemonRequest::new("events"))
}

pub fn request_services(home: &Path) -> Result<Value, DaemonError> {
    call(home, DaemonRequest::new("services"))
}

pub fn request_worklog(home: &Path) -> Result<Vec<CommandResult>, DaemonError> {
    Ok(serde_json::from_value(call(home, DaemonRequest::new("worklog"))?)?)
}

pub fn request_update(
    home: &Path,
    service: String,
    descriptor: UpdateDescriptor,
) -> Result<Value, DaemonError> {
    call(
        home,
        DaemonRequest {
            service: Some(service),
            descriptor: Some(descriptor),
            ..DaemonRequest::new("update")
        },
    )
}

/// Subscribe to work-log notifications. `on_snapshot` is called for every
/// streamed snapshot until it returns `false` or the daemon hangs up.
pub fn watch<F>(home: &Path, mut on_snapshot: F) -> Result<(), DaemonError>
where
    F: FnMut(Vec<CommandResult>) -> bool,
{
    let mut stream = connect(home)?;
    write_request(&mut stream, home, &DaemonRequest::new("watch"))?;
    let mut reader = BufReader::new(stream);
    read_response(&mut reader, home)?.into_data()?;

    let mut line = String::new();
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .map_err(|e| io_err(socket_path(home), e))?;
        if read == 0 {
            return Ok(());
        }
        let snapshot: Vec<CommandResult> = serde_json::from_str(line.trim_end())?;
        if !on_snapshot(snapshot) {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_request_omits_optional_fields() {
        let encoded = serde_json::to_value(DaemonRequest::new("status")).expect("encode");
        assert_eq!(encoded, json!({"cmd": "status"}));
    }

    #[test]
    fn update_request_carries_descriptor() {
        let raw = r#"{"cmd":"update","service":"svc-a",
            "descriptor":{"artifact":"svc-a:v2","resources":[{"name":"db","type":"postgres"}]}}"#;
        let request: DaemonRequest = serde_json::from_str(raw).expect("decode");
        assert_eq!(request.service.as_deref(), Some("svc-a"));
        let descriptor = request.descriptor.expect("descriptor");
        assert_eq!(descriptor.resources[0].kind, "postgres");
    }

    #[test]
    fn error_response_into_data_is_protocol_error() {
        let err = DaemonResponse::error("service 'x' is not registered")
            .into_data()
            .unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(ref m) if m.contains("'x'")));
    }

    #[test]
    fn missing_socket_is_not_running() {
        let home = tempfile::TempDir::new().expect("home");
        let err = send_request(home.path(), &DaemonRequest::new("status")).unwrap_err();
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
    }
}
