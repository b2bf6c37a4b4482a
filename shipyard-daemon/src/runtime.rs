use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use shipyard_core::ServiceRegistry;
use shipyard_exec::{CommandRunner, Scheduler, SchedulerHandle, WorkLog, WorkSnapshot};
use shipyard_reconcile::{
    Collaborators, ContainerRegistry, GithubOrg, HttpClient, Reconciler, RegistryTarget,
    RouteService,
};

use crate::error::{io_err, DaemonError};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::settings::Settings;
use crate::state::DaemonState;

/// Start the daemon and block the current thread until it exits.
pub fn start_blocking(settings: Settings) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(settings))
}

/// Wire the production collaborators and run until stopped.
pub async fn run(settings: Settings) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&settings)?;
    info!(settings = ?settings, "starting shipyard daemon");

    let log = WorkLog::new();
    let scheduler = Scheduler::start(settings.workers)?;
    let reconciler = build_reconciler(&settings, scheduler.handle(), log);
    run_with(
        reconciler,
        scheduler,
        settings.socket_path(),
        settings.sync_interval,
    )
    .await
}

/// Reconciler over the GitHub listing, the image registry, and the route
/// service, running commands as real child processes.
pub fn build_reconciler(
    settings: &Settings,
    scheduler: SchedulerHandle,
    log: WorkLog,
) -> Arc<Reconciler> {
    let client = HttpClient::new(settings.http_timeout, log.clone());
    let collaborators = Collaborators {
        repos: Arc::new(GithubOrg::new(
            client.clone(),
            settings.github_api.as_str(),
            settings.github_org.as_str(),
            settings.github_token.clone(),
        )),
        images: Arc::new(ContainerRegistry::new(
            client.clone(),
            settings.registry_host.as_str(),
            &settings.registry_user,
            &settings.registry_password,
        )),
        routes: Arc::new(RouteService::new(client, settings.routes_url.as_str())),
    };
    let target = RegistryTarget {
        host: settings.registry_host.clone(),
        namespace: settings.registry_namespace.clone(),
        user: settings.registry_user.clone(),
        password: settings.registry_password.clone(),
    };
    Reconciler::new(
        Arc::new(ServiceRegistry::new()),
        CommandRunner::system(log, settings.command_timeout),
        scheduler,
        collaborators,
        target,
        settings.work_dir(),
    )
}

/// Serve the control socket around an already wired reconciler.
///
/// Queues a startup sync, then runs the socket server, the periodic sync
/// timer and the signal handler until one of them requests shutdown. The
/// scheduler is drained of its workers before returning.
pub async fn run_with(
    reconciler: Arc<Reconciler>,
    scheduler: Scheduler,
    socket: PathBuf,
    sync_interval: Option<Duration>,
) -> Result<(), DaemonError> {
    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let state = DaemonState::new(
        Arc::clone(&reconciler),
        scheduler.pool_size(),
        socket.clone(),
        shutdown_tx.clone(),
    );

    reconciler.trigger_sync("startup")?;

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let result = socket_server_task(socket, state, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let timer_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let reconciler = Arc::clone(&reconciler);
        tokio::spawn(async move {
            let result = sync_timer_task(reconciler, sync_interval, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (socket_result, timer_result, signal_result) =
        tokio::join!(socket_handle, timer_handle, signal_handle);

    scheduler.shutdown().await;
    info!("daemon stopped");

    handle_join("socket_server", socket_result)?;
    handle_join("sync_timer", timer_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn sync_timer_task(
    reconciler: Arc<Reconciler>,
    interval: Option<Duration>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let Some(period) = interval else {
        let _ = shutdown_rx.recv().await;
        return Ok(());
    };

    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately; startup already queued a sync.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => return Ok(()),
            _ = ticker.tick() => {
                debug!(interval_secs = period.as_secs(), "periodic sync");
                reconciler.trigger_sync("timer")?;
            }
        }
    }
}

async fn socket_server_task(
    socket: PathBuf,
    state: Arc<DaemonState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    info!(socket = %socket.display(), "control socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, state).await {
                        error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    state: Arc<DaemonState>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        match request.cmd.as_str() {
            "watch" => {
                let snapshots = state.reconciler().work_log().subscribe();
                let shutdown_rx = state.shutdown_sender().subscribe();
                write_response(&mut writer, &DaemonResponse::ok(json!({ "watching": true })))
                    .await?;
                return stream_work_log(&mut writer, snapshots, shutdown_rx).await;
            }
            "stop" => {
                write_response(&mut writer, &DaemonResponse::ok(json!({ "stopping": true })))
                    .await?;
                let _ = state.shutdown_sender().send(());
                return Ok(());
            }
            _ => {
                let response = state.handle(request);
                write_response(&mut writer, &response).await?;
            }
        }
    }

    Ok(())
}

/// Push one snapshot line per work-log notification until the client hangs
/// up or the daemon shuts down.
async fn stream_work_log(
    writer: &mut OwnedWriteHalf,
    mut snapshots: broadcast::Receiver<WorkSnapshot>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        let snapshot = tokio::select! {
            _ = shutdown_rx.recv() => return Ok(()),
            received = snapshots.recv() => match received {
                Ok(snapshot) => snapshot,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "watcher lagged, waiting for next snapshot");
                    continue;
                }
                Err(RecvError::Closed) => return Ok(()),
            },
        };
        let line = serde_json::to_string(snapshot.as_slice())?;
        if write_line(writer, &line).await.is_err() {
            debug!("watch client disconnected");
            return Ok(());
        }
    }
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(settings: &Settings) -> Result<(), DaemonError> {
    for dir in [settings.home.clone(), settings.work_dir()] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    write_line(writer, &payload)
        .await
        .map_err(|e| io_err("daemon socket write", e))
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var(crate::settings::LOG_FORMAT).as_deref() == Ok("json") {
        let _ = fmt().json().with_env_filter(filter).try_init();
    } else {
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    }
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
