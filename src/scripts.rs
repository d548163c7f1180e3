use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use rhai::{Array, Dynamic, Engine, Map, INT};

use crate::loader::ScriptCompiler;
use crate::map_generator::MapGenerator;
use crate::tiles::{TileSet, TileSetDef};

/// Name of the function every map-generator script must define.
pub const MAP_GENERATOR_ENTRY: &str = "cell";

/// Evaluated tile-set script, not yet turned into a [`TileSet`].
#[derive(Debug, Clone)]
pub struct TileSetScript {
    source: PathBuf,
    value: Dynamic,
}

impl TileSetScript {
    pub fn new(source: impl Into<PathBuf>, value: Dynamic) -> Self {
        Self { source: source.into(), value }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn value(&self) -> &Dynamic {
        &self.value
    }
}

/// Conversion step of the tile-set pipeline.
pub fn convert_tile_set(script: &TileSetScript) -> Result<TileSet> {
    let def: TileSetDef = rhai::serde::from_dynamic(script.value())
        .map_err(|err| anyhow!("Invalid tile set definition in {}: {err}", script.source().display()))?;
    let set = def.build().with_context(|| format!("Building tile set from {}", script.source().display()))?;
    Ok(set)
}

pub struct TileSetCompiler {
    engine: Engine,
}

impl TileSetCompiler {
    pub fn new() -> Self {
        Self { engine: tileset_engine() }
    }

    pub fn evaluate(&self, source: &str, label: &str) -> Result<Dynamic> {
        let ast = self.engine.compile(source).with_context(|| format!("Compiling Rhai script {label}"))?;
        let value =
            self.engine.eval_ast::<Dynamic>(&ast).map_err(|err| anyhow!("Evaluating {label}: {err}"))?;
        if !value.is_map() {
            bail!("{label} must evaluate to a tile set object map, found {}", value.type_name());
        }
        Ok(value)
    }
}

impl Default for TileSetCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptCompiler for TileSetCompiler {
    type Output = TileSetScript;

    fn compile(&self, path: &Path) -> Result<TileSetScript> {
        let source = read_source(path)?;
        let value = self.evaluate(&source, &path.display().to_string())?;
        Ok(TileSetScript::new(path, value))
    }
}

pub struct MapGeneratorCompiler {
    engine: Engine,
}

impl MapGeneratorCompiler {
    pub fn new() -> Self {
        Self { engine: map_generator_engine() }
    }
}

impl Default for MapGeneratorCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptCompiler for MapGeneratorCompiler {
    type Output = MapGenerator;

    fn compile(&self, path: &Path) -> Result<MapGenerator> {
        let source = read_source(path)?;
        let label = path.display().to_string();
        let ast = self.engine.compile(source).with_context(|| format!("Compiling Rhai script {label}"))?;
        let has_entry =
            ast.iter_functions().any(|func| func.name == MAP_GENERATOR_ENTRY && func.params.len() == 2);
        if !has_entry {
            bail!("{label} does not define fn {MAP_GENERATOR_ENTRY}(x, y)");
        }
        Ok(MapGenerator::new(label, ast))
    }
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))
}

pub fn tileset_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_fast_operators(true);
    register_tile_api(&mut engine);
    engine
}

pub fn map_generator_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_fast_operators(true);
    engine
}

fn offset_rule(kind: &str, tag: &str, dx: INT, dy: INT) -> Map {
    let mut rule = Map::new();
    rule.insert("kind".into(), Dynamic::from(kind.to_string()));
    rule.insert("tag".into(), Dynamic::from(tag.to_string()));
    rule.insert("dx".into(), Dynamic::from(dx));
    rule.insert("dy".into(), Dynamic::from(dy));
    rule
}

fn list_rule(kind: &str, rules: Array) -> Map {
    let mut rule = Map::new();
    rule.insert("kind".into(), Dynamic::from(kind.to_string()));
    rule.insert("rules".into(), Dynamic::from_array(rules));
    rule
}

fn register_tile_api(engine: &mut Engine) {
    engine.register_fn("require", |tag: &str| offset_rule("require", tag, 0, 0));
    engine.register_fn("require", |tag: &str, dx: INT, dy: INT| offset_rule("require", tag, dx, dy));
    engine.register_fn("forbid", |tag: &str| offset_rule("forbid", tag, 0, 0));
    engine.register_fn("forbid", |tag: &str, dx: INT, dy: INT| offset_rule("forbid", tag, dx, dy));
    engine.register_fn("all_of", |rules: Array| list_rule("all_of", rules));
    engine.register_fn("any_of", |rules: Array| list_rule("any_of", rules));
    engine.register_fn("negate", |inner: Map| {
        let mut rule = Map::new();
        rule.insert("kind".into(), Dynamic::from("negate".to_string()));
        rule.insert("rule".into(), Dynamic::from_map(inner));
        rule
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::GridMap;

    #[test]
    fn rule_helpers_produce_buildable_definitions() {
        let compiler = TileSetCompiler::new();
        let value = compiler
            .evaluate(
                r#"
                    let set = #{
                        name: "roads",
                        defaults: #{ filename: "roads.png" },
                        tiles: [
                            #{
                                id: "end",
                                provides: #{ top: ["road"] },
                                rules: [
                                    require("road"),
                                    any_of([require("road", 0, -1), require("road", 0, 1)]),
                                    negate(all_of([require("road", 0, -1), require("road", 0, 1)])),
                                    forbid("water", 1, 0),
                                ],
                            },
                        ],
                    };
                    set
                "#,
                "inline",
            )
            .expect("script evaluates");
        let set = convert_tile_set(&TileSetScript::new("inline", value)).expect("converts");
        let tile = set.get("end").expect("end tile");

        let mut map = GridMap::new(1, 3);
        map.add_tag(0, 0, "road");
        map.add_tag(0, 1, "road");
        assert!(tile.is_acceptable(&map, 0, 1));
        map.add_tag(0, 2, "road");
        assert!(!tile.is_acceptable(&map, 0, 1), "both neighbours make it a straight, not an end");
    }

    #[test]
    fn non_map_results_are_rejected() {
        let compiler = TileSetCompiler::new();
        assert!(compiler.evaluate("40 + 2", "answer").is_err());
        assert!(compiler.evaluate("let x = ;", "broken").is_err());
    }

    #[test]
    fn malformed_definitions_fail_conversion() {
        let compiler = TileSetCompiler::new();
        let value = compiler.evaluate(r#"#{ tiles: [] }"#, "nameless").expect("evaluates");
        assert!(convert_tile_set(&TileSetScript::new("nameless", value)).is_err());
    }
}
