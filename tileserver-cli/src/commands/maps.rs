//! Maps command - list configured maps.

use std::io::{self, Write};
use std::path::Path;

use tileserver::config::{MapDefinition, MapRegistry};

use crate::error::CliError;

/// Run the maps command.
pub fn run(config_dir: &Path) -> Result<(), CliError> {
    let maps = MapRegistry::load(config_dir)?;

    if maps.is_empty() {
        println!("No maps configured in {}", config_dir.join("renderer").display());
        return Ok(());
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_table(&mut out, maps.iter())
        .map_err(|e| CliError::Config(format!("Failed to write map table: {}", e)))
}

/// Writes one line per map: name, zoom range, tile directory.
pub fn write_table<'a, W: Write>(
    out: &mut W,
    maps: impl Iterator<Item = &'a MapDefinition>,
) -> io::Result<()> {
    writeln!(out, "{:<20} {:>4} {:>4}  TILEDIR", "MAP", "MINZ", "MAXZ")?;
    for map in maps {
        writeln!(
            out,
            "{:<20} {:>4} {:>4}  {}",
            map.name,
            map.min_zoom,
            map.max_zoom,
            map.tile_dir.display()
        )?;
    }
    Ok(())
}
