//! Stack activation: locate the compose file, probe the runtime, launch once.
//!
//! Activation of a given project id is serialized: the probe-then-launch
//! sequence runs under a per-project async mutex, so concurrent requests
//! for a stack that is down trigger a single launch. Callers that queue
//! behind an in-flight attempt observe its outcome once they get the lock.
//!
//! A launch is fire-and-forget. Compose may need a while before the first
//! container shows up, so each project remembers when it was last
//! launched; within the grace window a "not running" probe is reported
//! as [`Activation::Starting`] instead of launching again.

use crate::compose;
use crate::runtime::{self, SharedRuntime};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Last known activation state of a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationState {
    /// Never activated by this process
    Unknown,
    /// Asking the runtime whether the project is up
    Probing,
    /// A launch was spawned and the project is not visible yet
    Starting,
    /// The runtime reported containers for the project
    Running,
    /// The last attempt could not launch the project
    Failed,
}

/// Successful outcome of an activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Containers of the project are already running; nothing was launched
    AlreadyRunning,
    /// A launch is in progress (spawned now or within the grace window)
    Starting,
}

#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("No se encontró archivo compose en {}", .dir.display())]
    ComposeNotFound { dir: PathBuf },

    #[error("No se pudo lanzar el stack '{project}': {source}")]
    LaunchFailed {
        project: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Per-project slot: the single-flight lock guards the time of the last
/// launch, the state is readable without waiting on it
struct ProjectSlot {
    flight: tokio::sync::Mutex<Option<Instant>>,
    state: Mutex<ActivationState>,
}

impl ProjectSlot {
    fn new() -> Self {
        Self {
            flight: tokio::sync::Mutex::new(None),
            state: Mutex::new(ActivationState::Unknown),
        }
    }

    fn set(&self, state: ActivationState) {
        *self.state.lock() = state;
    }
}

/// Brings compose stacks up on demand
pub struct Activator {
    runtime: SharedRuntime,
    launch_grace: Duration,
    slots: DashMap<String, Arc<ProjectSlot>>,
}

impl Activator {
    pub fn new(runtime: SharedRuntime, launch_grace: Duration) -> Self {
        Self {
            runtime,
            launch_grace,
            slots: DashMap::new(),
        }
    }

    /// Make sure the stack in `stack_dir` with compose project `project`
    /// is running, launching it when it is not.
    pub async fn activate(
        &self,
        stack_dir: &Path,
        project: &str,
    ) -> Result<Activation, ActivationError> {
        let compose_file = match compose::locate(stack_dir) {
            Some(file) => file,
            None => {
                warn!(dir = %stack_dir.display(), project, "No compose file found");
                self.slot(project).set(ActivationState::Failed);
                return Err(ActivationError::ComposeNotFound {
                    dir: stack_dir.to_path_buf(),
                });
            }
        };

        let slot = self.slot(project);
        let mut last_launch = slot.flight.lock().await;

        slot.set(ActivationState::Probing);
        if runtime::is_running(self.runtime.as_ref(), project).await {
            slot.set(ActivationState::Running);
            *last_launch = None;
            debug!(project, "Stack already running");
            return Ok(Activation::AlreadyRunning);
        }

        if let Some(launched_at) = *last_launch {
            if launched_at.elapsed() < self.launch_grace {
                slot.set(ActivationState::Starting);
                debug!(
                    project,
                    since_ms = launched_at.elapsed().as_millis() as u64,
                    "Launch already in progress"
                );
                return Ok(Activation::Starting);
            }
            warn!(project, "Previous launch did not bring the stack up, launching again");
        }

        match self.runtime.compose_up(&compose_file, project).await {
            Ok(()) => {
                *last_launch = Some(Instant::now());
                slot.set(ActivationState::Starting);
                info!(project, file = %compose_file.display(), "Stack launch started");
                Ok(Activation::Starting)
            }
            Err(e) => {
                *last_launch = None;
                slot.set(ActivationState::Failed);
                warn!(project, error = %e, "Failed to launch stack");
                Err(ActivationError::LaunchFailed {
                    project: project.to_string(),
                    source: e,
                })
            }
        }
    }

    /// Last known state of a project
    pub fn state(&self, project: &str) -> ActivationState {
        self.slots
            .get(project)
            .map(|slot| *slot.state.lock())
            .unwrap_or(ActivationState::Unknown)
    }

    fn slot(&self, project: &str) -> Arc<ProjectSlot> {
        // Clone out so the map shard is not held across awaits
        Arc::clone(
            self.slots
                .entry(project.to_string())
                .or_insert_with(|| Arc::new(ProjectSlot::new()))
                .value(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ContainerRuntime;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Runtime double that records launches
    #[derive(Default)]
    struct FakeRuntime {
        running: AtomicBool,
        probe_fails: AtomicBool,
        launch_fails: AtomicBool,
        /// Report running as soon as a launch happened
        up_on_launch: AtomicBool,
        probe_delay_ms: u64,
        launches: Mutex<Vec<(PathBuf, String)>>,
        probes: AtomicUsize,
    }

    impl FakeRuntime {
        fn launch_count(&self) -> usize {
            self.launches.lock().len()
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn count_project_containers(&self, _project: &str) -> anyhow::Result<usize> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.probe_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.probe_delay_ms)).await;
            }
            if self.probe_fails.load(Ordering::SeqCst) {
                anyhow::bail!("daemon unreachable");
            }
            Ok(if self.running.load(Ordering::SeqCst) { 2 } else { 0 })
        }

        async fn compose_up(&self, compose_file: &Path, project: &str) -> anyhow::Result<()> {
            if self.launch_fails.load(Ordering::SeqCst) {
                anyhow::bail!("No such file or directory (os error 2)");
            }
            self.launches
                .lock()
                .push((compose_file.to_path_buf(), project.to_string()));
            if self.up_on_launch.load(Ordering::SeqCst) {
                self.running.store(true, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    fn stack_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("docker-compose.yml"), "services: {}\n").unwrap();
        dir
    }

    fn activator(runtime: &Arc<FakeRuntime>, grace: Duration) -> Activator {
        Activator::new(Arc::clone(runtime) as SharedRuntime, grace)
    }

    #[tokio::test]
    async fn test_launches_stopped_stack() {
        let dir = stack_dir();
        let runtime = Arc::new(FakeRuntime::default());
        let activator = activator(&runtime, Duration::from_secs(30));

        let result = activator.activate(dir.path(), "demo").await.unwrap();

        assert_eq!(result, Activation::Starting);
        assert_eq!(activator.state("demo"), ActivationState::Starting);
        let launches = runtime.launches.lock();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].0, dir.path().join("docker-compose.yml"));
        assert_eq!(launches[0].1, "demo");
    }

    #[tokio::test]
    async fn test_running_stack_is_not_launched() {
        let dir = stack_dir();
        let runtime = Arc::new(FakeRuntime::default());
        runtime.running.store(true, Ordering::SeqCst);
        let activator = activator(&runtime, Duration::from_secs(30));

        assert_eq!(
            activator.activate(dir.path(), "demo").await.unwrap(),
            Activation::AlreadyRunning
        );
        assert_eq!(
            activator.activate(dir.path(), "demo").await.unwrap(),
            Activation::AlreadyRunning
        );
        assert_eq!(runtime.launch_count(), 0);
        assert_eq!(activator.state("demo"), ActivationState::Running);
    }

    #[tokio::test]
    async fn test_missing_compose_file() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::default());
        let activator = activator(&runtime, Duration::from_secs(30));

        let err = activator.activate(dir.path(), "demo").await.unwrap_err();

        assert!(matches!(err, ActivationError::ComposeNotFound { .. }));
        assert!(err.to_string().starts_with("No se encontró archivo compose en"));
        assert_eq!(runtime.probes.load(Ordering::SeqCst), 0);
        assert_eq!(runtime.launch_count(), 0);
        assert_eq!(activator.state("demo"), ActivationState::Failed);
    }

    #[tokio::test]
    async fn test_removed_compose_file_marks_stack_failed() {
        let dir = stack_dir();
        let runtime = Arc::new(FakeRuntime::default());
        let activator = activator(&runtime, Duration::from_secs(30));

        activator.activate(dir.path(), "demo").await.unwrap();
        assert_eq!(activator.state("demo"), ActivationState::Starting);

        std::fs::remove_file(dir.path().join("docker-compose.yml")).unwrap();
        let err = activator.activate(dir.path(), "demo").await.unwrap_err();

        assert!(matches!(err, ActivationError::ComposeNotFound { .. }));
        assert_eq!(activator.state("demo"), ActivationState::Failed);
    }

    #[tokio::test]
    async fn test_launch_failure() {
        let dir = stack_dir();
        let runtime = Arc::new(FakeRuntime::default());
        runtime.launch_fails.store(true, Ordering::SeqCst);
        let activator = activator(&runtime, Duration::from_secs(30));

        let err = activator.activate(dir.path(), "demo").await.unwrap_err();

        assert!(matches!(err, ActivationError::LaunchFailed { ref project, .. } if project == "demo"));
        assert_eq!(activator.state("demo"), ActivationState::Failed);
    }

    #[tokio::test]
    async fn test_failed_launch_is_retried_on_next_request() {
        let dir = stack_dir();
        let runtime = Arc::new(FakeRuntime::default());
        runtime.launch_fails.store(true, Ordering::SeqCst);
        let activator = activator(&runtime, Duration::from_secs(30));

        assert!(activator.activate(dir.path(), "demo").await.is_err());

        runtime.launch_fails.store(false, Ordering::SeqCst);
        assert_eq!(
            activator.activate(dir.path(), "demo").await.unwrap(),
            Activation::Starting
        );
        assert_eq!(runtime.launch_count(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_runtime_still_launches() {
        let dir = stack_dir();
        let runtime = Arc::new(FakeRuntime::default());
        runtime.probe_fails.store(true, Ordering::SeqCst);
        let activator = activator(&runtime, Duration::from_secs(30));

        assert_eq!(
            activator.activate(dir.path(), "demo").await.unwrap(),
            Activation::Starting
        );
        assert_eq!(runtime.launch_count(), 1);
    }

    #[tokio::test]
    async fn test_grace_window_suppresses_relaunch() {
        let dir = stack_dir();
        let runtime = Arc::new(FakeRuntime::default());
        let activator = activator(&runtime, Duration::from_secs(30));

        activator.activate(dir.path(), "demo").await.unwrap();
        let second = activator.activate(dir.path(), "demo").await.unwrap();

        assert_eq!(second, Activation::Starting);
        assert_eq!(runtime.launch_count(), 1);
    }

    #[tokio::test]
    async fn test_relaunch_after_grace_window() {
        let dir = stack_dir();
        let runtime = Arc::new(FakeRuntime::default());
        let activator = activator(&runtime, Duration::ZERO);

        activator.activate(dir.path(), "demo").await.unwrap();
        activator.activate(dir.path(), "demo").await.unwrap();

        assert_eq!(runtime.launch_count(), 2);
    }

    #[tokio::test]
    async fn test_running_after_launch() {
        let dir = stack_dir();
        let runtime = Arc::new(FakeRuntime::default());
        runtime.up_on_launch.store(true, Ordering::SeqCst);
        let activator = activator(&runtime, Duration::from_secs(30));

        assert_eq!(
            activator.activate(dir.path(), "demo").await.unwrap(),
            Activation::Starting
        );
        assert_eq!(
            activator.activate(dir.path(), "demo").await.unwrap(),
            Activation::AlreadyRunning
        );
        assert_eq!(runtime.launch_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_activations_launch_once() {
        let dir = stack_dir();
        let runtime = Arc::new(FakeRuntime {
            probe_delay_ms: 20,
            ..Default::default()
        });
        let activator = Arc::new(activator(&runtime, Duration::from_secs(30)));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let activator = Arc::clone(&activator);
            let path = dir.path().to_path_buf();
            handles.push(tokio::spawn(async move {
                activator.activate(&path, "demo").await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), Activation::Starting);
        }
        assert_eq!(runtime.launch_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_projects_do_not_block_each_other() {
        let dir = stack_dir();
        let runtime = Arc::new(FakeRuntime {
            probe_delay_ms: 20,
            ..Default::default()
        });
        let activator = Arc::new(activator(&runtime, Duration::from_secs(30)));

        let a = {
            let activator = Arc::clone(&activator);
            let path = dir.path().to_path_buf();
            tokio::spawn(async move { activator.activate(&path, "alpha").await })
        };
        let b = {
            let activator = Arc::clone(&activator);
            let path = dir.path().to_path_buf();
            tokio::spawn(async move { activator.activate(&path, "beta").await })
        };

        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
        assert_eq!(runtime.launch_count(), 2);

        assert_eq!(activator.state("alpha"), ActivationState::Starting);
        assert_eq!(activator.state("beta"), ActivationState::Starting);
    }

    #[test]
    fn test_unknown_project_state() {
        let runtime = Arc::new(FakeRuntime::default());
        let activator = activator(&runtime, Duration::from_secs(30));
        assert_eq!(activator.state("nothing"), ActivationState::Unknown);
    }
}
