use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::rules::RuleDef;
use super::{Tile, TileCorner, TileDescriptor, TileGeometry, TileSet, TileSetError};

/// Geometry shared by every tile of a sheet unless a tile overrides it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetDefaults {
    pub filename: Option<String>,
    pub width: u32,
    pub height: u32,
    pub grid_width: u32,
    pub grid_height: u32,
    pub padding: u32,
    pub offset: i32,
    pub base: String,
}

impl Default for SheetDefaults {
    fn default() -> Self {
        Self {
            filename: None,
            width: 64,
            height: 32,
            grid_width: 1,
            grid_height: 1,
            padding: 0,
            offset: 0,
            base: TileCorner::Top.label().to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TileDef {
    pub id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub x: u32,
    #[serde(default)]
    pub y: u32,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub grid_width: Option<u32>,
    #[serde(default)]
    pub grid_height: Option<u32>,
    #[serde(default)]
    pub padding: Option<u32>,
    #[serde(default)]
    pub offset: Option<i32>,
    #[serde(default)]
    pub decoration: bool,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub provides: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub rules: Vec<RuleDef>,
}

/// Tile set exactly as a script describes it.
#[derive(Debug, Clone, Deserialize)]
pub struct TileSetDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub defaults: SheetDefaults,
    #[serde(default)]
    pub tiles: Vec<TileDef>,
}

impl TileSetDef {
    pub fn build(self) -> Result<TileSet, TileSetError> {
        let TileSetDef { name, description, defaults, tiles } = self;
        let default_base: TileCorner = defaults.base.parse()?;
        let mut set = TileSet::with_defaults(name, description, defaults.clone());
        for def in tiles {
            let tile = def.build(set.name(), &defaults, default_base)?;
            set.insert(tile)?;
        }
        Ok(set)
    }
}

impl TileDef {
    fn build(self, set: &str, defaults: &SheetDefaults, default_base: TileCorner) -> Result<Tile, TileSetError> {
        let filename = match self.filename.or_else(|| defaults.filename.clone()) {
            Some(filename) => filename,
            None => return Err(TileSetError::MissingFilename { set: set.to_string(), id: self.id }),
        };
        let base = match self.base {
            Some(label) => label.parse()?,
            None => default_base,
        };
        let mut provision = BTreeMap::new();
        for (corner, tags) in self.provides {
            provision.insert(corner.parse::<TileCorner>()?, tags);
        }
        let geometry = TileGeometry {
            x: self.x,
            y: self.y,
            width: self.width.unwrap_or(defaults.width),
            height: self.height.unwrap_or(defaults.height),
            grid_width: self.grid_width.unwrap_or(defaults.grid_width),
            grid_height: self.grid_height.unwrap_or(defaults.grid_height),
            padding: self.padding.unwrap_or(defaults.padding),
            offset: self.offset.unwrap_or(defaults.offset),
        };
        let rules = self.rules.iter().map(RuleDef::build).collect();
        let descriptor =
            TileDescriptor { id: self.id, filename, geometry, decoration: self.decoration, base, provision };
        Ok(Tile::new(descriptor, rules))
    }
}
