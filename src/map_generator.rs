use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use rhai::{Dynamic, Scope, AST, INT};

use crate::config::AssetConfig;
use crate::loader::{LoaderBackend, WorkerLoader};
use crate::map::GridMap;
use crate::scripts::{map_generator_engine, MapGeneratorCompiler, MAP_GENERATOR_ENTRY};
use crate::service::ScriptResourceService;

/// Compiled map-generator script. Only guaranteed to define `cell(x, y)`.
#[derive(Debug, Clone)]
pub struct MapGenerator {
    label: String,
    ast: AST,
}

impl MapGenerator {
    pub fn new(label: impl Into<String>, ast: AST) -> Self {
        Self { label: label.into(), ast }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn generate(&self, width: u32, height: u32) -> Result<GridMap> {
        if i32::try_from(width).is_err() || i32::try_from(height).is_err() {
            bail!("{}: map size {width}x{height} exceeds the addressable cell range", self.label);
        }
        let engine = map_generator_engine();
        let mut scope = Scope::new();
        let mut map = GridMap::new(width, height);
        let cells: Vec<(i32, i32)> = map.coordinates().collect();
        for (x, y) in cells {
            let value = engine
                .call_fn::<Dynamic>(&mut scope, &self.ast, MAP_GENERATOR_ENTRY, (x as INT, y as INT))
                .map_err(|err| anyhow!("{}: {MAP_GENERATOR_ENTRY}({x}, {y}) failed: {err}", self.label))?;
            let tags = cell_tags(value).with_context(|| format!("{}: cell ({x}, {y})", self.label))?;
            map.set_tags(x, y, tags);
        }
        Ok(map)
    }
}

fn cell_tags(value: Dynamic) -> Result<Vec<String>> {
    if value.is_unit() {
        return Ok(Vec::new());
    }
    if value.is_string() {
        let tag = value.into_string().map_err(|ty| anyhow!("expected a string, found {ty}"))?;
        return Ok(vec![tag]);
    }
    if value.is_array() {
        let items = value.into_array().map_err(|ty| anyhow!("expected an array, found {ty}"))?;
        return items
            .into_iter()
            .map(|item| item.into_string().map_err(|ty| anyhow!("terrain tags must be strings, found {ty}")))
            .collect();
    }
    bail!("{MAP_GENERATOR_ENTRY}() must return a tag, an array of tags or (), found {}", value.type_name())
}

pub type MapGeneratorService = ScriptResourceService<MapGenerator, MapGenerator>;

pub fn map_generator_service(config: &AssetConfig) -> MapGeneratorService {
    let loader = WorkerLoader::new(MapGeneratorCompiler::new(), config.loader.resolved_worker_threads());
    map_generator_service_with(config, Arc::new(loader))
}

pub fn map_generator_service_with(
    config: &AssetConfig,
    loader: Arc<dyn LoaderBackend<MapGenerator>>,
) -> MapGeneratorService {
    ScriptResourceService::new("mapgen", config.map_generators.clone(), loader, |generator: &MapGenerator| {
        Ok(generator.clone())
    })
}
