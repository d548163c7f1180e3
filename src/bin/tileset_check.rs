use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use tessera::map_generator::map_generator_service;
use tessera::{AssetConfig, TileSetService};

#[derive(Parser)]
#[command(author, version, about = "Load tile-set scripts and report the merged catalog", long_about = None)]
struct Cli {
    /// Asset config file (JSON); defaults apply when it is missing
    #[arg(short, long, default_value = "config/assets.json")]
    config: PathBuf,

    /// Run this map generator and print the autotile choice per cell
    #[arg(short, long)]
    generator: Option<String>,

    #[arg(long, default_value_t = 8)]
    width: u32,

    #[arg(long, default_value_t = 8)]
    height: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = AssetConfig::load_or_default(&cli.config);

    let tilesets = TileSetService::from_config(&config);
    tilesets.initialize();
    let catalog = tilesets.merged_tile_set();

    println!("[tileset-check] {} tile(s) in merged catalog", catalog.len());
    for tile in catalog.tiles() {
        let geometry = tile.geometry();
        println!(
            "  {:<24} {}x{} cells  {}  from {}",
            tile.id(),
            geometry.grid_width,
            geometry.grid_height,
            tile.fingerprint().short_hex(),
            catalog.origin_of(tile.id()).unwrap_or("?")
        );
    }
    for (name, reason) in tilesets.fragments().failures() {
        println!("[tileset-check] failed fragment '{name}': {reason}");
    }
    for (name, err) in tilesets.skipped_fragments() {
        println!("[tileset-check] skipped fragment '{name}': {err}");
    }

    let Some(name) = cli.generator else {
        return Ok(());
    };
    let generators = map_generator_service(&config);
    generators.initialize();
    let generator = generators.get(&name, true).ok_or_else(|| {
        let reason = generators.failures().remove(&name).unwrap_or_else(|| "not found".to_string());
        anyhow!("Map generator '{name}' unavailable: {reason}")
    })?;
    let map = generator.generate(cli.width, cli.height)?;
    println!("[tileset-check] autotiling '{name}' ({}x{})", map.width(), map.height());
    for y in 0..map.height() as i32 {
        let row: Vec<&str> = (0..map.width() as i32)
            .map(|x| catalog.select(&map, x, y).map(|tile| tile.id()).unwrap_or("-"))
            .collect();
        println!("  {}", row.join(" "));
    }
    Ok(())
}
