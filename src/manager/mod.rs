//! Container lifecycle manager
//!
//! Every runtime operation is bracketed by registry reads and writes. The
//! registry holds what was last recorded; the runtime is asked what is true
//! now. `list` only annotates disagreements, `reconcile` persists them.

pub mod error;
pub mod mounts;
pub mod selector;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::{Config, Paths};
use crate::containers::{
    hostname_for, sandbox_labels, short_ref, ContainerConfig, ContainerRuntimeInterface,
    ContainerState, RuntimeError, LABEL_VERSION,
};
use crate::naming::{generate_identifier, validate_name, NameError};
use crate::registry::{
    now, ConfigMode, RecordFilter, ReconcileReport, Registry, RegistryError, SandboxRecord,
    SandboxStatus,
};
use crate::sync::{self, CredentialBundle, StageResult};

pub use error::{Result, SandboxError};
pub use selector::Selector;

/// Identifier collisions are astronomically unlikely; this bounds the retry.
pub const MAX_IDENTIFIER_ATTEMPTS: usize = 5;

/// Produces a candidate identifier for `(project, feature)`.
pub type IdentifierGenerator =
    Box<dyn FnMut(&str, &str) -> std::result::Result<String, NameError> + Send>;

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Return the latest live sandbox for the pair instead of creating one.
    pub reuse: bool,
    pub image: Option<String>,
    pub config_mode: Option<ConfigMode>,
    /// Host directory mounted at `/workspace`.
    pub workspace: PathBuf,
    pub environment: Vec<(String, String)>,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
}

impl CreateOptions {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            ..Self::default()
        }
    }

    pub fn reuse(mut self, reuse: bool) -> Self {
        self.reuse = reuse;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub record: SandboxRecord,
    /// An existing sandbox was returned; nothing was created.
    pub reused: bool,
    pub staged: Option<StageResult>,
}

#[derive(Debug, Clone)]
pub struct AttachTarget {
    pub record: SandboxRecord,
    /// Interactive shell command for the container.
    pub command: Vec<String>,
    /// The container had to be started first.
    pub started: bool,
}

#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub record: SandboxRecord,
    pub exit_code: i32,
    /// The container had to be started first.
    pub started: bool,
}

/// Recorded status disagreeing with what the runtime reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    /// The container no longer exists.
    Vanished,
    /// The container exists in a different state than recorded.
    Mismatch { observed: String },
}

#[derive(Debug, Clone)]
pub struct ListedSandbox {
    pub record: SandboxRecord,
    /// `None` for removed records or when the runtime could not be asked.
    pub observed: Option<ContainerState>,
    pub drift: Option<Drift>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// The container was already gone; recorded as stopped.
    AlreadyGone,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    /// Record was already `removed`; nothing done.
    AlreadyRemoved,
    Failed(String),
}

fn detect_drift(status: SandboxStatus, observed: &ContainerState) -> Option<Drift> {
    match (status, observed) {
        (_, ContainerState::Missing) => Some(Drift::Vanished),
        (SandboxStatus::Running, ContainerState::Running) => None,
        (SandboxStatus::Stopped | SandboxStatus::Created, ContainerState::Stopped(_)) => None,
        (_, state) => Some(Drift::Mismatch {
            observed: state.describe().to_string(),
        }),
    }
}

pub struct LifecycleManager<R: ContainerRuntimeInterface> {
    registry: Registry,
    runtime: R,
    config: Config,
    paths: Paths,
    bundle: CredentialBundle,
    generate_id: IdentifierGenerator,
}

impl<R: ContainerRuntimeInterface> LifecycleManager<R> {
    pub fn new(registry: Registry, runtime: R, config: Config, paths: Paths) -> Self {
        let bundle = CredentialBundle::with_auxiliary(&config.sync.auxiliary_files);
        Self {
            registry,
            runtime,
            config,
            paths,
            bundle,
            generate_id: Box::new(generate_identifier),
        }
    }

    /// Replace the identifier source used by `create_or_reuse`.
    pub fn with_identifier_generator<F>(mut self, generator: F) -> Self
    where
        F: FnMut(&str, &str) -> std::result::Result<String, NameError> + Send + 'static,
    {
        self.generate_id = Box::new(generator);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    fn ensure_runtime(&self) -> Result<()> {
        self.runtime
            .ensure_available()
            .map_err(SandboxError::RuntimeUnavailable)
    }

    fn inspect(&self, record: &SandboxRecord) -> Result<ContainerState> {
        self.runtime
            .inspect(&record.container_ref)
            .map_err(|e| SandboxError::runtime(format!("inspect {}", record.identifier), e))
    }

    /// Create a sandbox for `(project, feature)`, or with `options.reuse`
    /// return the newest live one.
    pub fn create_or_reuse(
        &mut self,
        project: &str,
        feature: &str,
        options: CreateOptions,
    ) -> Result<CreateOutcome> {
        validate_name("project", project)?;
        validate_name("feature", feature)?;
        self.ensure_runtime()?;

        if options.reuse {
            if let Some(record) = self.try_reuse(project, feature)? {
                return Ok(CreateOutcome {
                    record,
                    reused: true,
                    staged: None,
                });
            }
        }

        let image = options
            .image
            .clone()
            .unwrap_or_else(|| self.config.sandbox.default_image.clone());
        self.runtime
            .ensure_image(&image)
            .map_err(|e| SandboxError::runtime(format!("resolve image {}", image), e))?;

        let workspace = options
            .workspace
            .canonicalize()
            .map_err(|_| SandboxError::WorkspaceMissing(options.workspace.clone()))?;
        if !workspace.is_dir() {
            return Err(SandboxError::WorkspaceMissing(workspace));
        }
        let mode = options
            .config_mode
            .unwrap_or(self.config.sandbox.default_config_mode);

        for attempt in 1..=MAX_IDENTIFIER_ATTEMPTS {
            let identifier = (self.generate_id)(project, feature)?;
            if self.registry.get(&identifier)?.is_some() {
                debug!(
                    "Identifier {} already taken (attempt {})",
                    identifier, attempt
                );
                continue;
            }

            let staged = self.stage_config(&identifier, mode, &workspace)?;
            let container_config =
                self.container_config(&identifier, project, feature, mode, &workspace, &options);

            let container_ref = match self
                .runtime
                .create_container(&identifier, &image, &container_config)
            {
                Ok(handle) => handle,
                Err(e) => {
                    self.cleanup_staging(&identifier, mode);
                    return Err(SandboxError::runtime(format!("create {}", identifier), e));
                }
            };

            let record = SandboxRecord::new(
                &identifier,
                project,
                feature,
                &container_ref,
                &image,
                mode,
            );
            match self.registry.insert(&record) {
                Ok(()) => {}
                Err(RegistryError::DuplicateIdentifier(_)) => {
                    warn!("Identifier {} collided on insert; retrying", identifier);
                    self.discard_container(&container_ref);
                    self.cleanup_staging(&identifier, mode);
                    continue;
                }
                Err(e) => {
                    self.discard_container(&container_ref);
                    self.cleanup_staging(&identifier, mode);
                    return Err(e.into());
                }
            }

            let record = self
                .registry
                .update_status(&identifier, SandboxStatus::Running, now())?;
            info!(
                "Created sandbox {} (container {}, image {}, config {})",
                identifier,
                short_ref(&container_ref),
                image,
                mode
            );
            return Ok(CreateOutcome {
                record,
                reused: false,
                staged,
            });
        }

        Err(SandboxError::DuplicateIdentifier {
            project: project.to_string(),
            feature: feature.to_string(),
            attempts: MAX_IDENTIFIER_ATTEMPTS,
        })
    }

    /// Newest non-removed sandbox for the pair whose container still exists.
    /// A stopped container is started; a vanished one is recorded as removed.
    fn try_reuse(&mut self, project: &str, feature: &str) -> Result<Option<SandboxRecord>> {
        let record = match self
            .registry
            .find_latest(&RecordFilter::for_pair(project, feature).active())
        {
            Ok(record) => record,
            Err(RegistryError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match self.inspect(&record)? {
            ContainerState::Running => {}
            ContainerState::Stopped(_) => {
                self.runtime
                    .start_container(&record.container_ref)
                    .map_err(|e| SandboxError::runtime(format!("start {}", record.identifier), e))?;
            }
            ContainerState::Missing => {
                warn!(
                    "Sandbox {} lost its container; creating a new one",
                    record.identifier
                );
                self.registry
                    .update_status(&record.identifier, SandboxStatus::Removed, now())?;
                return Ok(None);
            }
        }

        let record = self
            .registry
            .update_status(&record.identifier, SandboxStatus::Running, now())?;
        info!("Reusing sandbox {}", record.identifier);
        Ok(Some(record))
    }

    fn stage_config(
        &self,
        identifier: &str,
        mode: ConfigMode,
        workspace: &Path,
    ) -> Result<Option<StageResult>> {
        let staging_dir = self.paths.staging_dir(identifier);
        let Some(target) = mounts::staging_target(mode, &staging_dir, workspace) else {
            return Ok(None);
        };

        if mode == ConfigMode::Mounted {
            // Must exist before docker bind-mounts it, or docker creates it root-owned.
            if let Err(e) = std::fs::create_dir_all(&self.paths.shared_dir) {
                warn!(
                    "Cannot create shared dir {}: {}",
                    self.paths.shared_dir.display(),
                    e
                );
            }
        }

        let sources = sync::host_sources(&self.paths.shared_dir, &self.paths.home);
        Ok(Some(sync::stage(&self.bundle, &sources, &target)?))
    }

    fn container_config(
        &self,
        identifier: &str,
        project: &str,
        feature: &str,
        mode: ConfigMode,
        workspace: &Path,
        options: &CreateOptions,
    ) -> ContainerConfig {
        let user = self.config.sandbox.container_user();

        let mut volumes = mounts::workspace_mounts(workspace);
        volumes.extend(mounts::config_mounts(
            mode,
            &self.paths.shared_dir,
            &self.paths.staging_dir(identifier),
        ));
        volumes.extend(mounts::gitconfig_mount(&self.paths.home, user));

        let mut environment = mounts::sandbox_environment(identifier, project, feature, mode);
        environment.extend(self.config.sandbox.resolved_environment());
        environment.extend(options.environment.iter().cloned());

        ContainerConfig {
            working_dir: sync::CONTAINER_WORKSPACE.to_string(),
            user: user.map(str::to_string),
            hostname: Some(hostname_for(identifier)),
            volumes,
            environment,
            labels: sandbox_labels(identifier, project, feature, now()),
            cpu_limit: options
                .cpu_limit
                .clone()
                .or_else(|| self.config.sandbox.cpu_limit.clone()),
            memory_limit: options
                .memory_limit
                .clone()
                .or_else(|| self.config.sandbox.memory_limit.clone()),
        }
    }

    fn discard_container(&self, container_ref: &str) {
        if let Err(e) = self.runtime.remove(container_ref, true) {
            warn!(
                "Failed to discard container {}: {}",
                short_ref(container_ref),
                e
            );
        }
    }

    /// Per-sandbox staging is only ours to delete in `mounted` mode; the
    /// workspace copy travels with the checkout.
    fn cleanup_staging(&self, identifier: &str, mode: ConfigMode) {
        if mode != ConfigMode::Mounted {
            return;
        }
        let dir = self.paths.staging_dir(identifier);
        if dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!("Failed to clean staging dir {}: {}", dir.display(), e);
            }
        }
    }

    /// Resolve `selector` to one live sandbox, starting it if stopped.
    pub fn attach(&mut self, selector: &Selector) -> Result<AttachTarget> {
        let (record, started) = self.resolve_running(selector)?;
        let command = self
            .runtime
            .exec_command(&record.container_ref, self.config.sandbox.container_user());
        Ok(AttachTarget {
            record,
            command,
            started,
        })
    }

    /// Run `command` without a TTY in the sandbox `selector` resolves to,
    /// starting it if stopped. The command's exit code is returned, not
    /// treated as an error.
    pub fn exec(&mut self, selector: &Selector, command: &[String]) -> Result<ExecOutcome> {
        if command.is_empty() {
            return Err(SandboxError::EmptyCommand);
        }
        let (record, started) = self.resolve_running(selector)?;
        let user = self.config.sandbox.container_user();
        let exit_code = self
            .runtime
            .exec(&record.container_ref, user, command)
            .map_err(|e| SandboxError::runtime(format!("exec in {}", record.identifier), e))?;
        debug!(
            "{} in {} exited with {}",
            command.join(" "),
            record.identifier,
            exit_code
        );
        Ok(ExecOutcome {
            record,
            exit_code,
            started,
        })
    }

    /// One non-removed sandbox with a running container. Returns whether it
    /// had to be started.
    fn resolve_running(&mut self, selector: &Selector) -> Result<(SandboxRecord, bool)> {
        let record = selector::resolve_one(&self.registry, selector)?;
        if record.is_removed() {
            return Err(SandboxError::TerminalState(record.identifier));
        }
        self.ensure_runtime()?;

        let started = match self.inspect(&record)? {
            ContainerState::Running => false,
            ContainerState::Stopped(_) => {
                self.runtime
                    .start_container(&record.container_ref)
                    .map_err(|e| SandboxError::runtime(format!("start {}", record.identifier), e))?;
                info!("Started sandbox {}", record.identifier);
                true
            }
            ContainerState::Missing => {
                self.registry
                    .update_status(&record.identifier, SandboxStatus::Removed, now())?;
                return Err(SandboxError::NotFound(format!(
                    "{} (container {} no longer exists)",
                    record.identifier,
                    short_ref(&record.container_ref)
                )));
            }
        };

        let record = self
            .registry
            .update_status(&record.identifier, SandboxStatus::Running, now())?;
        Ok((record, started))
    }

    /// Stop every matched non-removed sandbox. A container that is already
    /// gone counts as stopped.
    pub fn stop(&mut self, selector: &Selector) -> Result<Vec<(SandboxRecord, StopOutcome)>> {
        let records: Vec<SandboxRecord> = selector::resolve_many(&self.registry, selector, false)?
            .into_iter()
            .filter(|r| !r.is_removed())
            .collect();
        if records.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_runtime()?;

        let timeout = self.config.sandbox.stop_timeout_secs;
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            let outcome = match self.runtime.stop_container(&record.container_ref, timeout) {
                Ok(()) => StopOutcome::Stopped,
                Err(RuntimeError::ContainerNotFound(_)) => StopOutcome::AlreadyGone,
                Err(e) if e.is_unavailable() => return Err(SandboxError::RuntimeUnavailable(e)),
                Err(e) => {
                    warn!("Failed to stop {}: {}", record.identifier, e);
                    outcomes.push((record, StopOutcome::Failed(e.to_string())));
                    continue;
                }
            };
            let updated = self
                .registry
                .update_status(&record.identifier, SandboxStatus::Stopped, now())?;
            info!("Stopped sandbox {}", updated.identifier);
            outcomes.push((updated, outcome));
        }
        Ok(outcomes)
    }

    /// Remove matched sandboxes. Without `force`, a running container is
    /// stopped first. Removing an already-removed record is a no-op.
    pub fn remove(
        &mut self,
        selector: &Selector,
        force: bool,
    ) -> Result<Vec<(SandboxRecord, RemoveOutcome)>> {
        let records = selector::resolve_many(&self.registry, selector, true)?;
        if records.iter().any(|r| !r.is_removed()) {
            self.ensure_runtime()?;
        }

        let timeout = self.config.sandbox.stop_timeout_secs;
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            if record.is_removed() {
                debug!("Sandbox {} already removed", record.identifier);
                outcomes.push((record, RemoveOutcome::AlreadyRemoved));
                continue;
            }

            if !force {
                let stopped = match self.runtime.inspect(&record.container_ref) {
                    Ok(ContainerState::Running) => {
                        self.runtime.stop_container(&record.container_ref, timeout)
                    }
                    Ok(_) => Ok(()),
                    Err(e) => Err(e),
                };
                match stopped {
                    Ok(()) | Err(RuntimeError::ContainerNotFound(_)) => {}
                    Err(e) if e.is_unavailable() => {
                        return Err(SandboxError::RuntimeUnavailable(e));
                    }
                    Err(e) => {
                        warn!("Failed to stop {} before removal: {}", record.identifier, e);
                        outcomes.push((record, RemoveOutcome::Failed(e.to_string())));
                        continue;
                    }
                }
            }

            match self.runtime.remove(&record.container_ref, force) {
                Ok(()) | Err(RuntimeError::ContainerNotFound(_)) => {}
                Err(e) if e.is_unavailable() => return Err(SandboxError::RuntimeUnavailable(e)),
                Err(e) => {
                    warn!("Failed to remove {}: {}", record.identifier, e);
                    outcomes.push((record, RemoveOutcome::Failed(e.to_string())));
                    continue;
                }
            }

            let updated = self
                .registry
                .update_status(&record.identifier, SandboxStatus::Removed, now())?;
            self.cleanup_staging(&updated.identifier, updated.config_mode);
            info!("Removed sandbox {}", updated.identifier);
            outcomes.push((updated, RemoveOutcome::Removed));
        }
        Ok(outcomes)
    }

    /// Registry records annotated with live runtime state. Nothing is
    /// persisted; an unreachable runtime leaves every record unannotated.
    pub fn list(&self, filter: &RecordFilter) -> Result<Vec<ListedSandbox>> {
        let records = self.registry.find(filter)?;
        let has_live = records.iter().any(|r| !r.is_removed());
        let runtime_up = has_live && self.runtime.is_daemon_running();
        if has_live && !runtime_up {
            warn!("Container runtime unavailable; showing recorded status only");
        }

        let mut listed = Vec::with_capacity(records.len());
        for record in records {
            let observed = if runtime_up && !record.is_removed() {
                match self.runtime.inspect(&record.container_ref) {
                    Ok(state) => Some(state),
                    Err(e) => {
                        warn!("Cannot inspect {}: {}", record.identifier, e);
                        None
                    }
                }
            } else {
                None
            };
            let drift = observed
                .as_ref()
                .and_then(|state| detect_drift(record.status, state));
            listed.push(ListedSandbox {
                record,
                observed,
                drift,
            });
        }
        Ok(listed)
    }

    /// Persist drift: records whose containers vanished become `removed`;
    /// labelled containers nobody tracks are reported as orphans.
    pub fn reconcile(&mut self) -> Result<ReconcileReport> {
        self.ensure_runtime()?;
        let live: HashSet<String> = self
            .runtime
            .list_containers(LABEL_VERSION)
            .map_err(|e| SandboxError::runtime("list sandbox containers", e))?
            .into_iter()
            .collect();

        let report = self.registry.reconcile(&live, now())?;
        for identifier in &report.removed {
            self.cleanup_staging(identifier, ConfigMode::Mounted);
        }
        info!(
            "Reconciled {} record(s): {} removed, {} orphan container(s)",
            report.checked,
            report.removed.len(),
            report.orphans.len()
        );
        Ok(report)
    }
}
