use super::container_interface::{ContainerConfig, ContainerRuntimeInterface, ContainerState};
use super::error::{Result, RuntimeError};
use serde_json::Value;
use std::process::{Command, Output};

#[derive(Debug, Default, Clone, Copy)]
pub struct Docker;

fn spawn_error(e: std::io::Error) -> RuntimeError {
    if e.kind() == std::io::ErrorKind::NotFound {
        RuntimeError::NotInstalled
    } else {
        RuntimeError::IoError(e)
    }
}

/// Run `docker <args>`, mapping a missing binary to `NotInstalled`.
fn docker(args: &[&str]) -> Result<Output> {
    tracing::debug!("docker {}", args.join(" "));
    Command::new("docker")
        .args(args)
        .output()
        .map_err(spawn_error)
}

/// Map engine-level failures out of stderr; anything else goes to `fallback`.
fn classify_failure(stderr: &str, fallback: impl FnOnce(String) -> RuntimeError) -> RuntimeError {
    if stderr.contains("Cannot connect to the Docker daemon")
        || stderr.contains("Is the docker daemon running")
    {
        return RuntimeError::DaemonNotRunning;
    }
    if stderr.contains("permission denied") && stderr.contains("docker.sock") {
        return RuntimeError::PermissionDenied;
    }
    fallback(stderr.trim().to_string())
}

fn is_missing_container(stderr: &str) -> bool {
    stderr.contains("No such container") || stderr.contains("No such object")
}

/// `docker run -d` can create the container and then fail to start it (bad
/// user, failed mount). Only engine-level failures guarantee nothing exists.
fn leaves_partial_container(err: &RuntimeError) -> bool {
    !err.is_unavailable()
}

fn discard_partial(name: &str) {
    match docker(&["rm", "-f", name]) {
        Ok(output) if output.status.success() => {
            tracing::warn!("Removed container {} left behind by a failed run", name);
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Could not clean up container {}: {}", name, e),
    }
}

/// Arguments for `docker run`, split out so they can be checked without a daemon.
pub fn build_create_args(name: &str, image: &str, config: &ContainerConfig) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        name.to_string(),
        "-w".to_string(),
        config.working_dir.clone(),
    ];

    if let Some(user) = &config.user {
        args.push("-u".to_string());
        args.push(user.clone());
    }

    if let Some(hostname) = &config.hostname {
        args.push("--hostname".to_string());
        args.push(hostname.clone());
    }

    for vol in &config.volumes {
        let mut mount = format!("{}:{}", vol.host_path, vol.container_path);
        if vol.read_only {
            mount.push_str(":ro");
        }
        args.push("-v".to_string());
        args.push(mount);
    }

    for (key, value) in &config.environment {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }

    for (key, value) in &config.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }

    if let Some(cpu) = &config.cpu_limit {
        args.push("--cpus".to_string());
        args.push(cpu.clone());
    }

    if let Some(mem) = &config.memory_limit {
        args.push("-m".to_string());
        args.push(mem.clone());
    }

    args.push(image.to_string());
    args.push("sleep".to_string());
    args.push("infinity".to_string());
    args
}

/// Arguments for a non-interactive `docker exec`.
pub fn build_exec_args(handle: &str, user: Option<&str>, command: &[String]) -> Vec<String> {
    let mut args = vec!["exec".to_string()];
    if let Some(user) = user {
        args.push("-u".to_string());
        args.push(user.to_string());
    }
    args.push(handle.to_string());
    args.extend(command.iter().cloned());
    args
}

/// Parse `docker inspect` output into a container state.
fn parse_inspect(stdout: &[u8]) -> Result<ContainerState> {
    let out_json: Value =
        serde_json::from_slice(stdout).map_err(|e| RuntimeError::CommandFailed(e.to_string()))?;

    match out_json.pointer("/0/State/Status").and_then(Value::as_str) {
        Some("running") => Ok(ContainerState::Running),
        Some(status) => Ok(ContainerState::Stopped(status.to_string())),
        None => Ok(ContainerState::Missing),
    }
}

impl ContainerRuntimeInterface for Docker {
    fn is_daemon_running(&self) -> bool {
        docker(&["info"])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn ensure_available(&self) -> Result<()> {
        let output = docker(&["info"])?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_failure(&stderr, |_| RuntimeError::DaemonNotRunning))
    }

    fn image_exists_locally(&self, image: &str) -> bool {
        docker(&["image", "inspect", image])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn pull_image(&self, image: &str) -> Result<()> {
        let output = docker(&["pull", image])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr, |reason| RuntimeError::ImagePull {
                image: image.to_string(),
                reason,
            }));
        }

        Ok(())
    }

    fn create_container(
        &self,
        name: &str,
        image: &str,
        config: &ContainerConfig,
    ) -> Result<String> {
        if self.inspect(name)?.exists() {
            return Err(RuntimeError::ContainerAlreadyExists(name.to_string()));
        }

        let args = build_create_args(name, image, config);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = docker(&arg_refs)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::debug!("stderr: {}", stderr);
            let missing_image =
                stderr.contains("No such image") || stderr.contains("Unable to find image");
            let err = if missing_image {
                RuntimeError::ImagePull {
                    image: image.to_string(),
                    reason: stderr.trim().to_string(),
                }
            } else {
                classify_failure(&stderr, RuntimeError::CreateFailed)
            };
            if leaves_partial_container(&err) {
                discard_partial(name);
            }
            return Err(err);
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(container_id)
    }

    fn inspect(&self, handle: &str) -> Result<ContainerState> {
        let output = docker(&["inspect", "--type", "container", handle])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_container(&stderr) {
                return Ok(ContainerState::Missing);
            }
            return Err(classify_failure(&stderr, RuntimeError::CommandFailed));
        }

        parse_inspect(&output.stdout)
    }

    fn start_container(&self, handle: &str) -> Result<()> {
        let output = docker(&["start", handle])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_container(&stderr) {
                return Err(RuntimeError::ContainerNotFound(handle.to_string()));
            }
            return Err(classify_failure(&stderr, RuntimeError::StartFailed));
        }

        Ok(())
    }

    fn stop_container(&self, handle: &str, timeout_secs: u64) -> Result<()> {
        let timeout = timeout_secs.to_string();
        let output = docker(&["stop", "-t", &timeout, handle])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_container(&stderr) {
                return Err(RuntimeError::ContainerNotFound(handle.to_string()));
            }
            return Err(classify_failure(&stderr, RuntimeError::StopFailed));
        }

        Ok(())
    }

    fn remove(&self, handle: &str, force: bool) -> Result<()> {
        let mut args = vec!["rm"];
        if force {
            args.push("-f");
        }
        args.push(handle);

        let output = docker(&args)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_container(&stderr) {
                return Err(RuntimeError::ContainerNotFound(handle.to_string()));
            }
            return Err(classify_failure(&stderr, RuntimeError::RemoveFailed));
        }

        Ok(())
    }

    fn list_containers(&self, label: &str) -> Result<Vec<String>> {
        let filter = format!("label={}", label);
        let output = docker(&["ps", "-aq", "--no-trunc", "--filter", &filter])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr, RuntimeError::CommandFailed));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn exec_command(&self, handle: &str, user: Option<&str>) -> Vec<String> {
        let mut cmd = vec!["docker".to_string(), "exec".to_string(), "-it".to_string()];
        if let Some(user) = user {
            cmd.push("-u".to_string());
            cmd.push(user.to_string());
        }
        cmd.push(handle.to_string());
        cmd.push("/bin/bash".to_string());
        cmd
    }

    fn exec(&self, handle: &str, user: Option<&str>, command: &[String]) -> Result<i32> {
        let args = build_exec_args(handle, user, command);
        tracing::debug!("docker {}", args.join(" "));
        let status = Command::new("docker")
            .args(&args)
            .status()
            .map_err(spawn_error)?;
        Ok(status.code().unwrap_or(1))
    }
}
