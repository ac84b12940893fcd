//! Interpreter configuration, read from `tadpole.toml` next to the game
//! file (or supplied by the embedding application).  Everything has a
//! sensible default; the file is optional.

use std::path::Path;

use log::warn;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// I/O safety level for reads (0-4).
    pub safety_read: u8,
    /// I/O safety level for writes (0-4).
    pub safety_write: u8,
    /// How many undo savepoints to retain.
    pub undo_depth: usize,
    /// Object cache resident budget, in bytes.
    pub cache_budget: usize,
    /// Optional character map file to load at startup.
    pub charmap: Option<String>,
    /// Run preinit on load even if the game carries fast-load records.
    pub run_preinit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            safety_read: 1,
            safety_write: 1,
            undo_depth: 16,
            cache_budget: 4 << 20,
            charmap: None,
            run_preinit: true,
        }
    }
}

impl Config {
    /// Load `tadpole.toml` from the given directory, falling back to the
    /// defaults if it is missing or malformed.
    pub fn load_from(dir: &Path) -> Config {
        let path = dir.join("tadpole.toml");
        match std::fs::read_to_string(&path) {
            Ok(text) => match toml::from_str(&text) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!("ignoring malformed {}: {e}", path.display());
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.safety_read, 1);
        assert_eq!(cfg.undo_depth, 16);
        assert!(cfg.run_preinit);
    }

    #[test]
    fn partial_toml_overlays_defaults() {
        let cfg: Config = toml::from_str("safety_write = 4\nundo_depth = 3").unwrap();
        assert_eq!(cfg.safety_write, 4);
        assert_eq!(cfg.undo_depth, 3);
        assert_eq!(cfg.safety_read, 1);
        assert_eq!(cfg.cache_budget, 4 << 20);
    }
}
