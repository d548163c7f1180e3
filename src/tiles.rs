use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::map::TerrainMap;

pub mod defs;
pub mod rules;

pub use defs::{SheetDefaults, TileDef, TileSetDef};
pub use rules::{RuleDef, SharedRule, TileRule};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TileSetError {
    #[error("tile '{id}' from '{incoming}' conflicts with the definition from '{existing}'")]
    Conflict { id: String, existing: String, incoming: String },
    #[error("tile set '{set}' declares tile '{id}' more than once")]
    DuplicateId { set: String, id: String },
    #[error("tile '{id}' in tile set '{set}' has no image file")]
    MissingFilename { set: String, id: String },
    #[error("unknown tile corner '{0}' (expected top, right, bottom or left)")]
    UnknownCorner(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileCorner {
    #[default]
    Top,
    Right,
    Bottom,
    Left,
}

impl TileCorner {
    pub const ALL: [TileCorner; 4] = [TileCorner::Top, TileCorner::Right, TileCorner::Bottom, TileCorner::Left];

    pub fn label(self) -> &'static str {
        match self {
            TileCorner::Top => "top",
            TileCorner::Right => "right",
            TileCorner::Bottom => "bottom",
            TileCorner::Left => "left",
        }
    }
}

impl FromStr for TileCorner {
    type Err = TileSetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TileCorner::ALL
            .into_iter()
            .find(|corner| corner.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| TileSetError::UnknownCorner(s.to_string()))
    }
}

/// Source region on the sprite sheet plus the tile's footprint on the map grid.
/// The footprint is placement data and does not take part in the fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TileGeometry {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub grid_width: u32,
    pub grid_height: u32,
    pub padding: u32,
    pub offset: i32,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileFingerprint(blake3::Hash);

impl TileFingerprint {
    fn compute(id: &str, filename: &str, geometry: &TileGeometry, decoration: bool) -> Self {
        let mut hasher = blake3::Hasher::new();
        for field in [id, filename] {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        for value in [geometry.x, geometry.y, geometry.width, geometry.height] {
            hasher.update(&value.to_le_bytes());
        }
        hasher.update(&geometry.padding.to_le_bytes());
        hasher.update(&geometry.offset.to_le_bytes());
        hasher.update(&[decoration as u8]);
        Self(hasher.finalize())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub fn short_hex(&self) -> String {
        self.0.to_hex()[..12].to_string()
    }
}

impl fmt::Debug for TileFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TileFingerprint({})", self.short_hex())
    }
}

/// Runtime sprite handle assigned by the renderer once the sheet is resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpriteHandle(pub u32);

#[derive(Debug, Clone)]
pub struct TileDescriptor {
    pub id: String,
    pub filename: String,
    pub geometry: TileGeometry,
    pub decoration: bool,
    pub base: TileCorner,
    pub provision: BTreeMap<TileCorner, Vec<String>>,
}

pub struct Tile {
    id: String,
    filename: String,
    geometry: TileGeometry,
    decoration: bool,
    base: TileCorner,
    provision: BTreeMap<TileCorner, Vec<String>>,
    rules: Vec<SharedRule>,
    fingerprint: TileFingerprint,
    sprite: OnceLock<SpriteHandle>,
}

impl Tile {
    pub fn new(descriptor: TileDescriptor, rules: Vec<SharedRule>) -> Self {
        let TileDescriptor { id, filename, geometry, decoration, base, provision } = descriptor;
        let fingerprint = TileFingerprint::compute(&id, &filename, &geometry, decoration);
        Self { id, filename, geometry, decoration, base, provision, rules, fingerprint, sprite: OnceLock::new() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn geometry(&self) -> &TileGeometry {
        &self.geometry
    }

    pub fn is_decoration(&self) -> bool {
        self.decoration
    }

    pub fn base(&self) -> TileCorner {
        self.base
    }

    pub fn provision(&self) -> &BTreeMap<TileCorner, Vec<String>> {
        &self.provision
    }

    pub fn provides(&self, corner: TileCorner, tag: &str) -> bool {
        self.provision.get(&corner).is_some_and(|tags| tags.iter().any(|t| t == tag))
    }

    pub fn rules(&self) -> &[SharedRule] {
        &self.rules
    }

    pub fn fingerprint(&self) -> TileFingerprint {
        self.fingerprint
    }

    pub fn sprite(&self) -> Option<SpriteHandle> {
        self.sprite.get().copied()
    }

    /// Returns false if a sprite was already assigned.
    pub fn assign_sprite(&self, sprite: SpriteHandle) -> bool {
        self.sprite.set(sprite).is_ok()
    }

    /// Does this tile fit the map at the given cell, i.e. do all its rules accept?
    pub fn is_acceptable(&self, map: &dyn TerrainMap, cell_x: i32, cell_y: i32) -> bool {
        is_acceptable(self, map, cell_x, cell_y)
    }
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("id", &self.id)
            .field("filename", &self.filename)
            .field("geometry", &self.geometry)
            .field("decoration", &self.decoration)
            .field("base", &self.base)
            .field("rules", &self.rules)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

pub fn is_acceptable(tile: &Tile, map: &dyn TerrainMap, cell_x: i32, cell_y: i32) -> bool {
    rules::all_accept(&tile.rules, map, cell_x, cell_y)
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    tile: Arc<Tile>,
    origin: Arc<str>,
}

/// Named tile catalog. Tiles keep the order in which they were declared or merged.
#[derive(Debug, Clone)]
pub struct TileSet {
    name: String,
    description: Option<String>,
    defaults: SheetDefaults,
    tiles: IndexMap<String, CatalogEntry>,
}

impl TileSet {
    pub fn empty(name: impl Into<String>) -> Self {
        Self { name: name.into(), description: None, defaults: SheetDefaults::default(), tiles: IndexMap::new() }
    }

    pub fn with_defaults(name: impl Into<String>, description: Option<String>, defaults: SheetDefaults) -> Self {
        Self { name: name.into(), description, defaults, tiles: IndexMap::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn defaults(&self) -> &SheetDefaults {
        &self.defaults
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Tile>> {
        self.tiles.get(id).map(|entry| &entry.tile)
    }

    /// Name of the tile set that contributed `id`.
    pub fn origin_of(&self, id: &str) -> Option<&str> {
        self.tiles.get(id).map(|entry| entry.origin.as_ref())
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Arc<Tile>> {
        self.tiles.values().map(|entry| &entry.tile)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.tiles.keys().map(|id| id.as_str())
    }

    pub fn insert(&mut self, tile: Tile) -> Result<(), TileSetError> {
        if self.tiles.contains_key(tile.id()) {
            return Err(TileSetError::DuplicateId { set: self.name.clone(), id: tile.id().to_string() });
        }
        let origin: Arc<str> = Arc::from(self.name.as_str());
        self.tiles.insert(tile.id().to_string(), CatalogEntry { tile: Arc::new(tile), origin });
        Ok(())
    }

    /// Union of both catalogs. A tile id present in both is kept once if the fingerprints
    /// match and is a [`TileSetError::Conflict`] otherwise; on error `self` is untouched.
    pub fn merge(&self, other: &TileSet) -> Result<TileSet, TileSetError> {
        let mut merged = self.clone();
        for (id, incoming) in &other.tiles {
            match merged.tiles.get(id) {
                Some(existing) if existing.tile.fingerprint() == incoming.tile.fingerprint() => {}
                Some(existing) => {
                    return Err(TileSetError::Conflict {
                        id: id.clone(),
                        existing: existing.origin.to_string(),
                        incoming: incoming.origin.to_string(),
                    });
                }
                None => {
                    merged.tiles.insert(id.clone(), incoming.clone());
                }
            }
        }
        Ok(merged)
    }

    /// Tiles whose rules all accept the given cell, in catalog order.
    pub fn acceptable<'a>(
        &'a self,
        map: &'a dyn TerrainMap,
        cell_x: i32,
        cell_y: i32,
    ) -> impl Iterator<Item = &'a Arc<Tile>> + 'a {
        self.tiles().filter(move |tile| tile.is_acceptable(map, cell_x, cell_y))
    }

    /// The autotiling choice for a cell: the first acceptable non-decoration tile.
    pub fn select(&self, map: &dyn TerrainMap, cell_x: i32, cell_y: i32) -> Option<&Arc<Tile>> {
        self.tiles().find(|tile| !tile.is_decoration() && tile.is_acceptable(map, cell_x, cell_y))
    }
}
