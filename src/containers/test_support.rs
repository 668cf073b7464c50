//! In-memory container runtime for tests that must not need a Docker daemon.
//!
//! Clones share state, so a test can hand one clone to the lifecycle manager
//! and keep another to inspect or sabotage containers behind its back.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use super::container_interface::{ContainerConfig, ContainerRuntimeInterface, ContainerState};
use super::error::{Result, RuntimeError};
use crate::registry::DEFAULT_IMAGE;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub name: String,
    pub image: String,
    pub config: ContainerConfig,
    pub running: bool,
}

impl FakeContainer {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.config
            .labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Default)]
struct FakeState {
    available: bool,
    local_images: HashSet<String>,
    remote_images: HashSet<String>,
    containers: BTreeMap<String, FakeContainer>,
    next_id: u64,
    creates: usize,
    pulls: usize,
    exec_exit_code: i32,
    execs: Vec<(String, Vec<String>)>,
}

/// Called with the container name after each successful create.
pub type CreateHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone)]
pub struct FakeRuntime {
    state: Arc<Mutex<FakeState>>,
    on_create: Arc<Mutex<Option<CreateHook>>>,
}

impl fmt::Debug for FakeRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeRuntime")
            .field("state", &*self.state())
            .finish_non_exhaustive()
    }
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    /// Reachable engine with the default sandbox image already present.
    pub fn new() -> Self {
        let state = FakeState {
            available: true,
            local_images: HashSet::from([DEFAULT_IMAGE.to_string()]),
            ..FakeState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            on_create: Arc::new(Mutex::new(None)),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        // A panicking test thread must not wedge the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_available(&self, available: bool) {
        self.state().available = available;
    }

    /// Run `hook` after every create, outside the runtime's lock.
    pub fn on_create(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_create.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(hook));
    }

    /// Exit code every later `exec` reports.
    pub fn set_exec_exit_code(&self, code: i32) {
        self.state().exec_exit_code = code;
    }

    /// `(container handle, command)` for every `exec` so far.
    pub fn exec_calls(&self) -> Vec<(String, Vec<String>)> {
        self.state().execs.clone()
    }

    /// Make `image` pullable without being present locally.
    pub fn add_remote_image(&self, image: &str) {
        self.state().remote_images.insert(image.to_string());
    }

    /// Delete a container as if someone ran `docker rm -f` by hand.
    pub fn kill_externally(&self, handle: &str) -> bool {
        self.state().containers.remove(handle).is_some()
    }

    /// Stop a container without going through the manager.
    pub fn stop_externally(&self, handle: &str) -> bool {
        match self.state().containers.get_mut(handle) {
            Some(c) => {
                c.running = false;
                true
            }
            None => false,
        }
    }

    /// Start a labelled container that no registry record knows about.
    pub fn spawn_foreign(&self, name: &str, labels: Vec<(String, String)>) -> String {
        let config = ContainerConfig {
            labels,
            ..ContainerConfig::default()
        };
        let mut state = self.state();
        insert_container(&mut state, name, DEFAULT_IMAGE, &config)
    }

    pub fn container(&self, handle: &str) -> Option<FakeContainer> {
        self.state().containers.get(handle).cloned()
    }

    pub fn container_count(&self) -> usize {
        self.state().containers.len()
    }

    pub fn running_count(&self) -> usize {
        self.state()
            .containers
            .values()
            .filter(|c| c.running)
            .count()
    }

    pub fn create_calls(&self) -> usize {
        self.state().creates
    }

    pub fn pull_calls(&self) -> usize {
        self.state().pulls
    }
}

fn insert_container(
    state: &mut FakeState,
    name: &str,
    image: &str,
    config: &ContainerConfig,
) -> String {
    state.next_id += 1;
    let handle = format!("{:012x}{:052x}", state.next_id, state.next_id);
    state.containers.insert(
        handle.clone(),
        FakeContainer {
            name: name.to_string(),
            image: image.to_string(),
            config: config.clone(),
            running: true,
        },
    );
    handle
}

fn resolve<'a>(state: &'a mut FakeState, handle: &str) -> Option<&'a mut FakeContainer> {
    let key = state
        .containers
        .iter()
        .find(|(k, c)| k.as_str() == handle || c.name == handle)
        .map(|(k, _)| k.clone())?;
    state.containers.get_mut(&key)
}

impl ContainerRuntimeInterface for FakeRuntime {
    fn is_daemon_running(&self) -> bool {
        self.state().available
    }

    fn image_exists_locally(&self, image: &str) -> bool {
        let state = self.state();
        state.available && state.local_images.contains(image)
    }

    fn pull_image(&self, image: &str) -> Result<()> {
        let mut state = self.state();
        if !state.available {
            return Err(RuntimeError::DaemonNotRunning);
        }
        state.pulls += 1;
        if state.remote_images.contains(image) {
            state.local_images.insert(image.to_string());
            Ok(())
        } else {
            Err(RuntimeError::ImagePull {
                image: image.to_string(),
                reason: "manifest unknown".to_string(),
            })
        }
    }

    fn create_container(
        &self,
        name: &str,
        image: &str,
        config: &ContainerConfig,
    ) -> Result<String> {
        let mut state = self.state();
        if !state.available {
            return Err(RuntimeError::DaemonNotRunning);
        }
        if !state.local_images.contains(image) {
            return Err(RuntimeError::ImagePull {
                image: image.to_string(),
                reason: "No such image".to_string(),
            });
        }
        if state.containers.values().any(|c| c.name == name) {
            return Err(RuntimeError::ContainerAlreadyExists(name.to_string()));
        }
        state.creates += 1;
        let handle = insert_container(&mut state, name, image, config);
        drop(state);

        let hook = self
            .on_create
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(hook) = hook {
            hook(name);
        }
        Ok(handle)
    }

    fn inspect(&self, handle: &str) -> Result<ContainerState> {
        let mut state = self.state();
        if !state.available {
            return Err(RuntimeError::DaemonNotRunning);
        }
        Ok(match resolve(&mut state, handle) {
            Some(c) if c.running => ContainerState::Running,
            Some(_) => ContainerState::Stopped("exited".to_string()),
            None => ContainerState::Missing,
        })
    }

    fn start_container(&self, handle: &str) -> Result<()> {
        let mut state = self.state();
        if !state.available {
            return Err(RuntimeError::DaemonNotRunning);
        }
        let container = resolve(&mut state, handle)
            .ok_or_else(|| RuntimeError::ContainerNotFound(handle.to_string()))?;
        container.running = true;
        Ok(())
    }

    fn stop_container(&self, handle: &str, _timeout_secs: u64) -> Result<()> {
        let mut state = self.state();
        if !state.available {
            return Err(RuntimeError::DaemonNotRunning);
        }
        let container = resolve(&mut state, handle)
            .ok_or_else(|| RuntimeError::ContainerNotFound(handle.to_string()))?;
        container.running = false;
        Ok(())
    }

    fn remove(&self, handle: &str, force: bool) -> Result<()> {
        let mut state = self.state();
        if !state.available {
            return Err(RuntimeError::DaemonNotRunning);
        }
        let running = resolve(&mut state, handle)
            .ok_or_else(|| RuntimeError::ContainerNotFound(handle.to_string()))?
            .running;
        if running && !force {
            return Err(RuntimeError::RemoveFailed(format!(
                "container {} is running: stop it first or force remove",
                handle
            )));
        }
        state
            .containers
            .retain(|k, c| k != handle && c.name != handle);
        Ok(())
    }

    fn list_containers(&self, label: &str) -> Result<Vec<String>> {
        let state = self.state();
        if !state.available {
            return Err(RuntimeError::DaemonNotRunning);
        }
        Ok(state
            .containers
            .iter()
            .filter(|(_, c)| c.label(label).is_some())
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn exec_command(&self, handle: &str, _user: Option<&str>) -> Vec<String> {
        vec!["true".to_string(), handle.to_string()]
    }

    fn exec(&self, handle: &str, _user: Option<&str>, command: &[String]) -> Result<i32> {
        let mut state = self.state();
        if !state.available {
            return Err(RuntimeError::DaemonNotRunning);
        }
        let running = resolve(&mut state, handle)
            .ok_or_else(|| RuntimeError::ContainerNotFound(handle.to_string()))?
            .running;
        if !running {
            return Err(RuntimeError::CommandFailed(format!(
                "container {} is not running",
                handle
            )));
        }
        state.execs.push((handle.to_string(), command.to_vec()));
        Ok(state.exec_exit_code)
    }
}
