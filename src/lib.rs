pub mod config;
pub mod loader;
pub mod map;
pub mod map_generator;
pub mod scanner;
pub mod scripts;
pub mod service;
pub mod tiles;
pub mod tileset_service;

pub use config::AssetConfig;
pub use map::{GridMap, TerrainMap};
pub use map_generator::{MapGenerator, MapGeneratorService};
pub use service::{LoadState, ScriptResourceService};
pub use tiles::{is_acceptable, Tile, TileRule, TileSet, TileSetError};
pub use tileset_service::TileSetService;
