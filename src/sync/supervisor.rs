//! Run a command between a pull and a guaranteed push

use std::process::ExitStatus;
use std::sync::Arc;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::engine::SyncEngine;
use super::hook::ShutdownHook;
use super::SyncError;

/// Hook that pushes the live bundle exactly once.
pub fn push_on_shutdown(engine: Arc<SyncEngine>) -> ShutdownHook {
    ShutdownHook::new(move || {
        let result = engine.push();
        info!("Shutdown push: {}", result.summary());
    })
}

/// Pull, run `command`, then push once whether the command exits on its own
/// or the supervisor receives SIGINT/SIGTERM. Returns the command's exit code.
pub async fn run_supervised(engine: Arc<SyncEngine>, command: &[String]) -> Result<i32, SyncError> {
    let (program, args) = command.split_first().ok_or(SyncError::EmptyCommand)?;

    let pulled = engine.pull()?;
    info!("Startup pull: {}", pulled.summary());

    let hook = push_on_shutdown(engine);

    let mut child = Command::new(program)
        .args(args)
        .spawn()
        .map_err(|source| SyncError::Spawn {
            command: program.clone(),
            source,
        })?;

    let status = tokio::select! {
        status = child.wait() => status,
        signal = shutdown_signal() => {
            info!("Received {}; stopping {}", signal, program);
            terminate(&mut child);
            child.wait().await
        }
    }
    .map_err(|source| SyncError::Spawn {
        command: program.clone(),
        source,
    })?;

    hook.fire();
    Ok(exit_code(status))
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!("Failed to forward SIGTERM to {}: {}", pid, e);
                let _ = child.start_kill();
            }
        }
        None => debug!("Child already exited"),
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        },
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "Ctrl-C"
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::sync::bundle::CredentialBundle;
    use crate::sync::source::DirectorySource;
    use std::fs;

    fn engine(root: &std::path::Path) -> Arc<SyncEngine> {
        let shared = root.join("shared");
        fs::create_dir_all(shared.join(".claude")).unwrap();
        fs::write(shared.join(".claude/.credentials.json"), "creds").unwrap();
        let engine = SyncEngine::new(
            CredentialBundle::standard(),
            root.join("home"),
            root.join("backup"),
        )
        .with_shared_dir(&shared)
        .with_source(DirectorySource::new("shared", &shared));
        Arc::new(engine)
    }

    #[tokio::test]
    async fn test_run_supervised_pushes_after_exit() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine(temp.path());

        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo changed > \"$0\"/.claude/.credentials.json; exit 3".to_string(),
            temp.path().join("home").display().to_string(),
        ];
        let code = run_supervised(engine, &command).await.unwrap();

        assert_eq!(code, 3);
        assert_eq!(
            fs::read_to_string(temp.path().join("shared/.claude/.credentials.json")).unwrap(),
            "changed\n"
        );
        assert_eq!(
            fs::read_to_string(temp.path().join("backup/.claude/.credentials.json")).unwrap(),
            "changed\n"
        );
    }

    #[tokio::test]
    async fn test_run_supervised_empty_command() {
        let temp = tempfile::tempdir().unwrap();
        let err = run_supervised(engine(temp.path()), &[]).await.unwrap_err();
        assert!(matches!(err, SyncError::EmptyCommand));
    }

    #[tokio::test]
    async fn test_run_supervised_spawn_failure_still_pushes() {
        let temp = tempfile::tempdir().unwrap();
        let command = vec!["/definitely/not/a/binary".to_string()];
        let err = run_supervised(engine(temp.path()), &command)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Spawn { .. }));
        assert!(temp.path().join("backup/.claude.json").is_file());
    }

    #[test]
    fn test_push_on_shutdown_runs_once() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine(temp.path());
        engine.pull().unwrap();

        let hook = push_on_shutdown(engine);
        assert!(hook.fire());
        assert!(!hook.fire());
        assert!(temp.path().join("backup/.claude/.credentials.json").is_file());
    }
}
