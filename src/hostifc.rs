//! Host-application interface and the file I/O safety policy.
//!
//! The host can register resource files, receive resource-map entries, and
//! override the I/O safety levels.  Absent a host, fixed defaults apply.
//!
//! Safety levels gate script file access:
//!
//! ```text
//! 0  read and write anywhere
//! 1  read anywhere, write in the game directory only
//! 2  read and write in the game directory only
//! 3  read-only, game directory only
//! 4  no file I/O at all
//! ```

use std::path::{Component, Path, PathBuf};

/// File kinds for the typed open calls; hosts may use these to pick
/// default directories or file-type metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Game,
    Save,
    Data,
    Text,
}

/// Host application callbacks.  All have no-op defaults.
pub trait HostIfc {
    /// A resource file was found; returns the host's file number for it.
    fn add_resfile(&mut self, _path: &Path) -> i32 {
        0
    }

    /// One entry from a resource map.
    fn add_resource(&mut self, _ofs: u64, _size: u64, _name: &[u8], _fileno: i32) {}

    /// Where a resource file's data section begins.
    fn set_resmap_seek(&mut self, _pos: u64, _fileno: i32) {}

    /// The game file's display name, once known.
    fn set_game_name(&mut self, _name: &str) {}

    /// Override the (read, write) safety levels; None keeps the current
    /// settings.
    fn io_safety_override(&self) -> Option<(u8, u8)> {
        None
    }

    /// Directory to probe for external resource files instead of the game
    /// file's own directory.
    fn res_path(&self) -> Option<PathBuf> {
        None
    }
}

/// The do-nothing host used when no application context is supplied.
#[derive(Default)]
pub struct NullHost;

impl HostIfc for NullHost {}

/// I/O safety policy state.
#[derive(Debug, Clone, Copy)]
pub struct IoSafety {
    pub read_level: u8,
    pub write_level: u8,
}

impl Default for IoSafety {
    fn default() -> Self {
        // read anywhere, write only next to the game
        IoSafety {
            read_level: 1,
            write_level: 1,
        }
    }
}

impl IoSafety {
    /// May the script read `path`?  `in_game_dir` is the caller's
    /// resolution of where the file lives.
    pub fn allows_read(&self, in_game_dir: bool) -> bool {
        self.read_level <= 3 && (in_game_dir || self.read_level <= 1)
    }

    pub fn allows_write(&self, in_game_dir: bool) -> bool {
        self.write_level <= 2 && (in_game_dir || self.write_level == 0)
    }
}

/// Resolve a script-supplied filename against the game directory.
/// Relative paths always anchor at the game file's directory, not the
/// process working directory, so they stay stable if the OS-level working
/// directory moves mid-session.
pub fn resolve_game_relative(game_dir: &Path, name: &[u8]) -> PathBuf {
    let name = String::from_utf8_lossy(name).into_owned();
    let p = PathBuf::from(name);
    if p.is_absolute() {
        p
    } else {
        game_dir.join(p)
    }
}

/// Whether a resolved path stays inside the game directory.  The test is
/// lexical: no parent-directory escapes and, for absolute paths, a prefix
/// match on the game directory.
pub fn is_in_game_dir(game_dir: &Path, path: &Path) -> bool {
    let clean = match normalize(path) {
        Some(p) => p,
        None => return false,
    };
    if path.is_absolute() {
        match normalize(game_dir) {
            Some(dir) => clean.parent() == Some(dir.as_path()),
            None => false,
        }
    } else {
        // relative: a single bare component is in-directory
        clean.components().count() == 1
    }
}

/// Lexically normalize a path; None if it escapes upward past its root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safety_level_4_blocks_everything() {
        let s = IoSafety {
            read_level: 4,
            write_level: 4,
        };
        assert!(!s.allows_read(true));
        assert!(!s.allows_read(false));
        assert!(!s.allows_write(true));
        assert!(!s.allows_write(false));
    }

    #[test]
    fn safety_level_2_is_game_dir_only() {
        let s = IoSafety {
            read_level: 2,
            write_level: 2,
        };
        assert!(s.allows_read(true));
        assert!(!s.allows_read(false));
        assert!(s.allows_write(true));
        assert!(!s.allows_write(false));
    }

    #[test]
    fn safety_level_0_is_open() {
        let s = IoSafety {
            read_level: 0,
            write_level: 0,
        };
        assert!(s.allows_read(false));
        assert!(s.allows_write(false));
    }

    #[test]
    fn default_allows_read_anywhere_write_locally() {
        let s = IoSafety::default();
        assert!(s.allows_read(false));
        assert!(s.allows_write(true));
        assert!(!s.allows_write(false));
    }

    #[test]
    fn relative_paths_anchor_at_game_dir() {
        let dir = Path::new("/games/cave");
        let p = resolve_game_relative(dir, b"notes.dat");
        assert_eq!(p, PathBuf::from("/games/cave/notes.dat"));
        assert!(is_in_game_dir(dir, &p));
    }

    #[test]
    fn escapes_are_outside() {
        let dir = Path::new("/games/cave");
        let p = resolve_game_relative(dir, b"../elsewhere.dat");
        assert!(!is_in_game_dir(dir, &p));
        let abs = resolve_game_relative(dir, b"/tmp/x.dat");
        assert!(!is_in_game_dir(dir, &abs));
    }
}
