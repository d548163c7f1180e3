use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};

/// Turns a script file into its compiled form. Runs on loader worker threads.
pub trait ScriptCompiler: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    fn compile(&self, path: &Path) -> Result<Self::Output>;
}

/// Final result of one load attempt.
pub enum LoadOutcome<S> {
    Loaded(Arc<S>),
    Failed(Arc<str>),
}

impl<S> Clone for LoadOutcome<S> {
    fn clone(&self) -> Self {
        match self {
            LoadOutcome::Loaded(value) => LoadOutcome::Loaded(Arc::clone(value)),
            LoadOutcome::Failed(reason) => LoadOutcome::Failed(Arc::clone(reason)),
        }
    }
}

impl<S> fmt::Debug for LoadOutcome<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadOutcome::Loaded(_) => f.write_str("Loaded"),
            LoadOutcome::Failed(reason) => write!(f, "Failed({reason})"),
        }
    }
}

pub type CompletionHook = Box<dyn Fn() + Send + Sync>;

/// Asynchronous compile/load backend consumed by the script services.
///
/// Implementations must never invoke completion hooks while holding a lock that
/// `peek` or `submit` would need.
pub trait LoaderBackend<S>: Send + Sync {
    /// Queues `path` for loading. Re-submitting a finished path starts a fresh load;
    /// re-submitting an in-flight path does nothing.
    fn submit(&self, path: &Path);

    /// `None` while the load is pending or was never submitted.
    fn peek(&self, path: &Path) -> Option<LoadOutcome<S>>;

    /// Blocks until the load of `path` has an outcome. Returns at once for unknown paths.
    fn force_complete(&self, path: &Path);

    fn on_any_load_completed(&self, hook: CompletionHook);
}

enum Slot<S> {
    Queued,
    Running,
    Done(LoadOutcome<S>),
}

struct LoaderShared<C: ScriptCompiler> {
    compiler: C,
    slots: Mutex<HashMap<PathBuf, Slot<C::Output>>>,
    finished: Condvar,
    hooks: RwLock<Vec<Arc<dyn Fn() + Send + Sync>>>,
}

impl<C: ScriptCompiler> LoaderShared<C> {
    fn claim(&self, path: &Path) -> bool {
        let mut slots = self.slots.lock();
        match slots.get_mut(path) {
            Some(slot) if matches!(slot, Slot::Queued) => {
                *slot = Slot::Running;
                true
            }
            _ => false,
        }
    }

    fn run(&self, path: &Path) {
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.compiler.compile(path))) {
            Ok(Ok(output)) => LoadOutcome::Loaded(Arc::new(output)),
            Ok(Err(err)) => LoadOutcome::Failed(Arc::from(format!("{err:#}"))),
            Err(_) => LoadOutcome::Failed(Arc::from("script compiler panicked")),
        };
        if let LoadOutcome::Failed(reason) = &outcome {
            log::warn!("Failed to load script [{}]: {reason}", path.display());
        } else {
            log::debug!("Loaded script [{}]", path.display());
        }
        {
            let mut slots = self.slots.lock();
            slots.insert(path.to_path_buf(), Slot::Done(outcome));
            self.finished.notify_all();
        }
        let hooks: Vec<_> = self.hooks.read().iter().cloned().collect();
        for hook in hooks {
            hook();
        }
    }
}

/// Thread-pool backed [`LoaderBackend`].
pub struct WorkerLoader<C: ScriptCompiler> {
    shared: Arc<LoaderShared<C>>,
    jobs: Sender<PathBuf>,
}

impl<C: ScriptCompiler> WorkerLoader<C> {
    pub fn new(compiler: C, worker_count: usize) -> Self {
        let shared = Arc::new(LoaderShared {
            compiler,
            slots: Mutex::new(HashMap::new()),
            finished: Condvar::new(),
            hooks: RwLock::new(Vec::new()),
        });
        let (jobs, rx) = unbounded::<PathBuf>();
        for index in 0..worker_count.max(1) {
            let worker_shared = Arc::clone(&shared);
            let worker_rx: Receiver<PathBuf> = rx.clone();
            let spawned = thread::Builder::new().name(format!("script-loader-{index}")).spawn(move || {
                while let Ok(path) = worker_rx.recv() {
                    if worker_shared.claim(&path) {
                        worker_shared.run(&path);
                    }
                }
            });
            if let Err(err) = spawned {
                log::error!("Failed to spawn script loader worker {index}: {err:?}");
            }
        }
        Self { shared, jobs }
    }

    pub fn compiler(&self) -> &C {
        &self.shared.compiler
    }
}

impl<C: ScriptCompiler> LoaderBackend<C::Output> for WorkerLoader<C> {
    fn submit(&self, path: &Path) {
        {
            let mut slots = self.shared.slots.lock();
            if matches!(slots.get(path), Some(Slot::Queued) | Some(Slot::Running)) {
                return;
            }
            slots.insert(path.to_path_buf(), Slot::Queued);
        }
        if let Err(err) = self.jobs.send(path.to_path_buf()) {
            log::error!("No loader worker available, loading [{}] inline", path.display());
            let path = err.into_inner();
            if self.shared.claim(&path) {
                self.shared.run(&path);
            }
        }
    }

    fn peek(&self, path: &Path) -> Option<LoadOutcome<C::Output>> {
        match self.shared.slots.lock().get(path) {
            Some(Slot::Done(outcome)) => Some(outcome.clone()),
            _ => None,
        }
    }

    fn force_complete(&self, path: &Path) {
        let mut slots = self.shared.slots.lock();
        loop {
            match slots.get_mut(path) {
                None | Some(Slot::Done(_)) => return,
                Some(Slot::Running) => self.shared.finished.wait(&mut slots),
                Some(slot) => {
                    *slot = Slot::Running;
                    drop(slots);
                    self.shared.run(path);
                    return;
                }
            }
        }
    }

    fn on_any_load_completed(&self, hook: CompletionHook) {
        self.shared.hooks.write().push(Arc::from(hook));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct EchoCompiler {
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl ScriptCompiler for EchoCompiler {
        type Output = String;

        fn compile(&self, path: &Path) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            let name = path.to_string_lossy().to_string();
            if name.contains("broken") {
                bail!("syntax error in {name}");
            }
            if name.contains("panics") {
                panic!("compiler blew up");
            }
            Ok(name)
        }
    }

    fn loader(delay_ms: u64) -> (WorkerLoader<EchoCompiler>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let compiler = EchoCompiler { calls: Arc::clone(&calls), delay: Duration::from_millis(delay_ms) };
        (WorkerLoader::new(compiler, 2), calls)
    }

    #[test]
    fn force_complete_yields_an_outcome() {
        let (loader, calls) = loader(20);
        let path = Path::new("scripts/roads.tileset.rhai");
        loader.submit(path);
        loader.force_complete(path);
        match loader.peek(path) {
            Some(LoadOutcome::Loaded(value)) => assert_eq!(value.as_str(), "scripts/roads.tileset.rhai"),
            other => panic!("expected a loaded script, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct GatedCompiler {
        started: Sender<()>,
        release: Receiver<()>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptCompiler for GatedCompiler {
        type Output = String;

        fn compile(&self, path: &Path) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.started.send(());
            let _ = self.release.recv();
            Ok(path.to_string_lossy().to_string())
        }
    }

    #[test]
    fn force_complete_waits_for_a_running_job() {
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        let calls = Arc::new(AtomicUsize::new(0));
        let compiler = GatedCompiler { started: started_tx, release: release_rx, calls: Arc::clone(&calls) };
        let loader = WorkerLoader::new(compiler, 1);
        let path = Path::new("gated.rhai");
        loader.submit(path);
        started_rx.recv_timeout(Duration::from_secs(5)).expect("worker picked up the job");

        let (done_tx, done_rx) = unbounded();
        thread::scope(|scope| {
            scope.spawn(|| {
                loader.force_complete(path);
                let _ = done_tx.send(());
            });
            thread::sleep(Duration::from_millis(50));
            assert!(done_rx.try_recv().is_err(), "force_complete returned while the job was running");
            assert!(loader.peek(path).is_none());

            release_tx.send(()).expect("release the worker");
            done_rx.recv_timeout(Duration::from_secs(5)).expect("force_complete returned");
        });

        assert!(matches!(loader.peek(path), Some(LoadOutcome::Loaded(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "the running job is waited for, not compiled again");
    }

    #[test]
    fn failures_and_panics_become_failed_outcomes() {
        let (loader, _) = loader(0);
        for path in [Path::new("broken.rhai"), Path::new("panics.rhai")] {
            loader.submit(path);
            loader.force_complete(path);
            assert!(matches!(loader.peek(path), Some(LoadOutcome::Failed(_))), "{}", path.display());
        }
    }

    #[test]
    fn unknown_paths_stay_absent() {
        let (loader, calls) = loader(0);
        loader.force_complete(Path::new("never-submitted.rhai"));
        assert!(loader.peek(Path::new("never-submitted.rhai")).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn hooks_fire_for_every_completion() {
        let (loader, _) = loader(0);
        let completions = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&completions);
        loader.on_any_load_completed(Box::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        let paths = [Path::new("a.rhai"), Path::new("b.rhai"), Path::new("broken.rhai")];
        for path in paths {
            loader.submit(path);
        }
        for path in paths {
            loader.force_complete(path);
        }
        // Hooks run just after the outcome is published, so give worker threads a moment.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while completions.load(Ordering::SeqCst) < 3 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(completions.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn resubmitting_a_finished_path_reloads_it() {
        let (loader, calls) = loader(0);
        let path = Path::new("parks.rhai");
        loader.submit(path);
        loader.force_complete(path);
        let first = match loader.peek(path) {
            Some(LoadOutcome::Loaded(value)) => value,
            other => panic!("expected a loaded script, got {other:?}"),
        };

        loader.submit(path);
        loader.force_complete(path);
        let second = match loader.peek(path) {
            Some(LoadOutcome::Loaded(value)) => value,
            other => panic!("expected a loaded script, got {other:?}"),
        };
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
