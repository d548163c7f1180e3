use std::sync::{Arc, OnceLock};

use crate::config::{AssetConfig, ScriptRootConfig};
use crate::loader::{LoaderBackend, WorkerLoader};
use crate::scripts::{convert_tile_set, TileSetCompiler, TileSetScript};
use crate::service::ScriptResourceService;
use crate::tiles::{TileSet, TileSetError};

pub const MERGED_TILE_SET_NAME: &str = "merged";

pub type TileSetFragments = ScriptResourceService<TileSetScript, TileSet>;

struct MergedCatalog {
    tile_set: Arc<TileSet>,
    skipped: Vec<(String, TileSetError)>,
}

/// Loads every tile-set fragment under a root and folds them into one catalog.
pub struct TileSetService {
    fragments: TileSetFragments,
    merged: OnceLock<MergedCatalog>,
}

impl TileSetService {
    pub fn new(root: ScriptRootConfig, loader: Arc<dyn LoaderBackend<TileSetScript>>) -> Self {
        let fragments = ScriptResourceService::new("tilesets", root, loader, convert_tile_set);
        Self { fragments, merged: OnceLock::new() }
    }

    pub fn from_config(config: &AssetConfig) -> Self {
        let loader = WorkerLoader::new(TileSetCompiler::new(), config.loader.resolved_worker_threads());
        Self::new(config.tilesets.clone(), Arc::new(loader))
    }

    pub fn initialize(&self) {
        self.fragments.initialize();
    }

    pub fn fragments(&self) -> &TileSetFragments {
        &self.fragments
    }

    pub fn fragment(&self, name: &str, wait_if_pending: bool) -> Option<Arc<TileSet>> {
        self.fragments.get(name, wait_if_pending)
    }

    /// The union of all fragments, computed once on first access. Pending fragments are
    /// waited for; a fragment that conflicts with one scanned before it is left out entirely.
    pub fn merged_tile_set(&self) -> Arc<TileSet> {
        Arc::clone(&self.merged.get_or_init(|| self.fold()).tile_set)
    }

    pub fn is_merged(&self) -> bool {
        self.merged.get().is_some()
    }

    /// Fragments left out of the merged catalog, empty until it has been computed.
    pub fn skipped_fragments(&self) -> Vec<(String, TileSetError)> {
        self.merged.get().map(|catalog| catalog.skipped.clone()).unwrap_or_default()
    }

    fn fold(&self) -> MergedCatalog {
        let loaded: Vec<(String, Arc<TileSet>)> = self
            .fragments
            .registered_names()
            .into_iter()
            .filter_map(|name| self.fragments.get(&name, true).map(|fragment| (name, fragment)))
            .collect();
        let (tile_set, skipped) = merge_fragments(loaded);
        log::info!(
            "[tilesets] merged {} tile(s), skipped {} fragment(s)",
            tile_set.len(),
            skipped.len()
        );
        MergedCatalog { tile_set: Arc::new(tile_set), skipped }
    }
}

/// Folds fragments in the given order. A fragment whose merge fails is dropped whole.
pub fn merge_fragments<I, T>(fragments: I) -> (TileSet, Vec<(String, TileSetError)>)
where
    I: IntoIterator<Item = (String, T)>,
    T: AsRef<TileSet>,
{
    let mut merged = TileSet::empty(MERGED_TILE_SET_NAME);
    let mut skipped = Vec::new();
    for (name, fragment) in fragments {
        match merged.merge(fragment.as_ref()) {
            Ok(next) => merged = next,
            Err(err) => {
                log::warn!("[tilesets] skipping fragment '{name}': {err}");
                skipped.push((name, err));
            }
        }
    }
    (merged, skipped)
}
