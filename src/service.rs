use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use anyhow::{anyhow, Result};
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::config::ScriptRootConfig;
use crate::loader::{LoadOutcome, LoaderBackend};
use crate::scanner::{self, ScriptFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    Pending,
    Loaded,
    Failed,
}

/// Turns a compiled script into the resource handed out by a service.
/// Runs under the service lock and must not call back into the same service.
pub type Converter<S, R> = Box<dyn Fn(&S) -> Result<R> + Send + Sync>;

struct ResourceEntry<S, R> {
    resource: Arc<R>,
    compiled: Arc<S>,
}

struct ServiceState<S, R> {
    /// Registered scripts in scan order.
    script_files: IndexMap<String, ScriptFile>,
    resources: HashMap<String, ResourceEntry<S, R>>,
    failures: BTreeMap<String, String>,
}

impl<S, R> ServiceState<S, R> {
    fn drop_script(&mut self, label: &str, name: &str, reason: String) {
        self.script_files.shift_remove(name);
        self.resources.remove(name);
        log::warn!("[{label}] dropping '{name}': {reason}");
        self.failures.insert(name.to_string(), reason);
    }
}

struct ServiceInner<S, R> {
    label: String,
    root: ScriptRootConfig,
    loader: Arc<dyn LoaderBackend<S>>,
    converter: Converter<S, R>,
    state: Mutex<ServiceState<S, R>>,
    hook_installed: AtomicBool,
}

impl<S, R> ServiceInner<S, R> {
    fn convert(&self, compiled: &S) -> Result<R> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.converter)(compiled))) {
            Ok(result) => result,
            Err(_) => Err(anyhow!("conversion panicked")),
        }
    }

    fn reconcile(&self) {
        let mut state = self.state.lock();
        let names: Vec<String> = state.script_files.keys().cloned().collect();
        for name in names {
            let Some(path) = state.script_files.get(&name).map(|file| file.path().to_path_buf()) else {
                continue;
            };
            match self.loader.peek(&path) {
                None => {}
                Some(LoadOutcome::Failed(reason)) => state.drop_script(&self.label, &name, reason.to_string()),
                Some(LoadOutcome::Loaded(compiled)) => {
                    let converted =
                        state.resources.get(&name).is_some_and(|entry| Arc::ptr_eq(&entry.compiled, &compiled));
                    if converted {
                        continue;
                    }
                    match self.convert(&compiled) {
                        Ok(resource) => {
                            log::debug!("[{}] loaded '{name}'", self.label);
                            let entry = ResourceEntry { resource: Arc::new(resource), compiled };
                            state.resources.insert(name, entry);
                        }
                        Err(err) => {
                            log::error!("[{}] failed to convert '{name}' from {}", self.label, path.display());
                            state.drop_script(&self.label, &name, format!("{err:#}"));
                        }
                    }
                }
            }
        }
    }

    /// Loaded means the cached resource came from the backend's latest outcome for the file.
    fn is_current(&self, state: &ServiceState<S, R>, name: &str) -> bool {
        let (Some(file), Some(entry)) = (state.script_files.get(name), state.resources.get(name)) else {
            return false;
        };
        match self.loader.peek(file.path()) {
            Some(LoadOutcome::Loaded(compiled)) => Arc::ptr_eq(&entry.compiled, &compiled),
            _ => false,
        }
    }
}

/// Scans a script root, loads every file through a [`LoaderBackend`] and exposes the
/// converted resources by logical name. Cloning shares the same service.
pub struct ScriptResourceService<S, R> {
    inner: Arc<ServiceInner<S, R>>,
}

impl<S, R> Clone for ScriptResourceService<S, R> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<S, R> ScriptResourceService<S, R>
where
    S: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn new<F>(
        label: impl Into<String>,
        root: ScriptRootConfig,
        loader: Arc<dyn LoaderBackend<S>>,
        converter: F,
    ) -> Self
    where
        F: Fn(&S) -> Result<R> + Send + Sync + 'static,
    {
        let inner = ServiceInner {
            label: label.into(),
            root,
            loader,
            converter: Box::new(converter),
            state: Mutex::new(ServiceState {
                script_files: IndexMap::new(),
                resources: HashMap::new(),
                failures: BTreeMap::new(),
            }),
            hook_installed: AtomicBool::new(false),
        };
        Self { inner: Arc::new(inner) }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn root(&self) -> &ScriptRootConfig {
        &self.inner.root
    }

    /// Scans the root and submits every discovered file. Calling it again rescans:
    /// rediscovered names go back to pending and are loaded afresh.
    pub fn initialize(&self) {
        if !self.inner.hook_installed.swap(true, Ordering::SeqCst) {
            let weak: Weak<ServiceInner<S, R>> = Arc::downgrade(&self.inner);
            self.inner.loader.on_any_load_completed(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.reconcile();
                }
            }));
        }

        let files = scanner::scan_root(&self.inner.root);
        log::info!(
            "[{}] found {} script(s) under [{}]",
            self.inner.label,
            files.len(),
            self.inner.root.root.display()
        );

        // Submitting first keeps reconcile from seeing a stale outcome for a rescanned name.
        for file in &files {
            self.inner.loader.submit(file.path());
        }
        {
            let mut state = self.inner.state.lock();
            let mut registered = IndexMap::with_capacity(files.len());
            for file in files {
                state.failures.remove(file.name());
                let name = file.name().to_string();
                let path = file.path().display().to_string();
                if registered.insert(name.clone(), file).is_some() {
                    log::warn!("[{}] '{name}' is defined more than once, using [{path}]", self.inner.label);
                }
            }
            // Names whose files vanished keep their last outcome, after everything rescanned.
            for (name, file) in std::mem::take(&mut state.script_files) {
                registered.entry(name).or_insert(file);
            }
            state.script_files = registered;
        }
        self.inner.reconcile();
    }

    pub fn reconcile(&self) {
        self.inner.reconcile();
    }

    /// Looks up a resource. With `wait_if_pending` a registered but unfinished script is
    /// forced to complete once; if it is still missing afterwards the load failed.
    pub fn get(&self, name: &str, wait_if_pending: bool) -> Option<Arc<R>> {
        let path = {
            let state = self.inner.state.lock();
            if !wait_if_pending || self.inner.is_current(&state, name) {
                return state.resources.get(name).map(|entry| Arc::clone(&entry.resource));
            }
            state.script_files.get(name).map(|file| file.path().to_path_buf())
        };
        if let Some(path) = path {
            self.inner.loader.force_complete(&path);
            self.inner.reconcile();
        }
        let state = self.inner.state.lock();
        state.resources.get(name).map(|entry| Arc::clone(&entry.resource))
    }

    pub fn cached(&self, name: &str) -> Option<Arc<R>> {
        self.get(name, false)
    }

    /// Names with a successfully converted resource.
    pub fn names(&self) -> BTreeSet<String> {
        self.inner.state.lock().resources.keys().cloned().collect()
    }

    /// Names still tracked for loading, in scan order.
    pub fn registered_names(&self) -> Vec<String> {
        self.inner.state.lock().script_files.keys().cloned().collect()
    }

    pub fn file_for(&self, name: &str) -> Option<ScriptFile> {
        self.inner.state.lock().script_files.get(name).cloned()
    }

    pub fn load_state(&self, name: &str) -> Option<LoadState> {
        let state = self.inner.state.lock();
        if state.script_files.contains_key(name) {
            if self.inner.is_current(&state, name) {
                Some(LoadState::Loaded)
            } else {
                Some(LoadState::Pending)
            }
        } else if state.failures.contains_key(name) {
            Some(LoadState::Failed)
        } else {
            None
        }
    }

    pub fn failures(&self) -> BTreeMap<String, String> {
        self.inner.state.lock().failures.clone()
    }
}
