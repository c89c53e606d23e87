//! Data directory layout for the game server.
//!
//! Worlds, `server.properties` and mods live in a separate link directory
//! so the data directory can be wiped or re-unpacked without losing them:
//!
//! ```text
//! data/games             -> link/
//! data/server.properties -> games/server.properties
//! data/mods              -> games/mods
//! ```

use mcpe_core::{McpeError, McpeResult};
use std::io::ErrorKind;
use std::os::unix::fs::symlink;
use std::path::Path;
use tracing::{debug, info};

const DEFAULT_PROPERTIES: &str = "motd=Minecraft Server\nlevel-dir=world\nlevel-name=Default Server World\n";

/// Create the link directory and wire the data directory up to it.
///
/// `data/games` always points at the absolute `link`, since a relative target
/// would be resolved from inside `data`.
pub fn prepare_data_dir(data: &Path, link: &Path) -> McpeResult<()> {
    let link = std::path::absolute(link)?;
    let link = link.as_path();
    std::fs::create_dir_all(data)?;
    std::fs::create_dir_all(link.join("mods"))?;

    let props = link.join("server.properties");
    if !props.exists() {
        std::fs::write(&props, DEFAULT_PROPERTIES)?;
        info!(path = %props.display(), "wrote default server.properties");
    }

    let games = data.join("games");
    match std::fs::symlink_metadata(&games) {
        Ok(meta) if meta.file_type().is_symlink() => std::fs::remove_file(&games)?,
        Ok(_) => {
            return Err(McpeError::Config(format!(
                "{} exists and is not a symlink, refusing to replace it",
                games.display()
            )))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    symlink(link, &games)?;

    link_if_missing(Path::new("games/server.properties"), &data.join("server.properties"))?;
    link_if_missing(Path::new("games/mods"), &data.join("mods"))?;

    debug!(data = %data.display(), link = %link.display(), "data directory prepared");
    Ok(())
}

fn link_if_missing(target: &Path, at: &Path) -> McpeResult<()> {
    match symlink(target, at) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e.into()),
    }
}
