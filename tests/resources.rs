//! External resource file chaining: `.rs0`-`.rs8` files next to the game
//! are validated and their resource maps reported to the host callbacks.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tadpole::gamebuild::GameBuilder;
use tadpole::gamefile::{RSC_SIG, VSN_CURRENT};
use tadpole::hostifc::HostIfc;
use tadpole::objcache::ObjectCache;
use tadpole::value::Value;
use tadpole::vocab::VocabCtx;

#[derive(Default)]
struct Recorded {
    resfiles: Vec<PathBuf>,
    resources: Vec<(String, u64, u64, i32)>,
    seeks: Vec<(u64, i32)>,
    game_name: Option<String>,
}

#[derive(Default, Clone)]
struct RecordingHost(Arc<Mutex<Recorded>>);

impl HostIfc for RecordingHost {
    fn add_resfile(&mut self, path: &Path) -> i32 {
        let mut r = self.0.lock().unwrap();
        r.resfiles.push(path.to_path_buf());
        r.resfiles.len() as i32
    }

    fn add_resource(&mut self, ofs: u64, size: u64, name: &[u8], fileno: i32) {
        self.0.lock().unwrap().resources.push((
            String::from_utf8_lossy(name).into_owned(),
            ofs,
            size,
            fileno,
        ));
    }

    fn set_resmap_seek(&mut self, pos: u64, fileno: i32) {
        self.0.lock().unwrap().seeks.push((pos, fileno));
    }

    fn set_game_name(&mut self, name: &str) {
        self.0.lock().unwrap().game_name = Some(name.to_string());
    }
}

/// Write a resource file: header, one HTMLRES section, $EOF.
fn write_resource_file(path: &Path, entries: &[(&str, u32, u32)]) {
    let mut out = Vec::new();
    out.extend_from_slice(RSC_SIG);
    out.extend_from_slice(VSN_CURRENT);
    out.extend_from_slice(&0u16.to_le_bytes()); // flags
    out.extend_from_slice(&[0u8; 26]); // timestamp (unchecked for resources)

    let mut body = Vec::new();
    body.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes()); // table header padding
    for (name, ofs, size) in entries {
        body.extend_from_slice(&ofs.to_le_bytes());
        body.extend_from_slice(&size.to_le_bytes());
        body.extend_from_slice(&(name.len() as u16).to_le_bytes());
        body.extend_from_slice(name.as_bytes());
    }

    let tag = b"HTMLRES";
    out.push(tag.len() as u8);
    out.extend_from_slice(tag);
    let end = (out.len() + 4 + body.len()) as u32;
    out.extend_from_slice(&end.to_le_bytes());
    out.extend_from_slice(&body);

    out.push(4);
    out.extend_from_slice(b"$EOF");
    let end = (out.len() + 4) as u32;
    out.extend_from_slice(&end.to_le_bytes());

    std::fs::write(path, out).unwrap();
}

fn load_with_host(game: &Path, host: &mut RecordingHost) {
    let mut cache = ObjectCache::new(1 << 20, 4);
    let mut voc = VocabCtx::new();
    tadpole::gamefile::load_game(game, &mut cache, &mut voc, host).unwrap();
}

#[test]
fn chained_resource_files_reach_the_host() {
    let dir = tempfile::tempdir().unwrap();
    let game = dir.path().join("adventure.gam");
    let mut gb = GameBuilder::new();
    gb.object(100, false, &[], &[(20, Value::Number(1))]);
    gb.write_to(&game).unwrap();

    write_resource_file(
        &dir.path().join("adventure.rs0"),
        &[("title.jpg", 0, 1000), ("theme.mid", 1000, 500)],
    );
    // upper-case suffix must be found too
    write_resource_file(&dir.path().join("adventure.RS2"), &[("map.png", 0, 64)]);

    let mut host = RecordingHost::default();
    load_with_host(&game, &mut host);

    let r = host.0.lock().unwrap();
    assert_eq!(r.resfiles.len(), 2);
    assert!(r.game_name.as_deref().unwrap().ends_with("adventure.gam"));

    let names: Vec<&str> = r.resources.iter().map(|(n, _, _, _)| n.as_str()).collect();
    assert_eq!(names, vec!["title.jpg", "theme.mid", "map.png"]);
    // entries carry the file number the host assigned
    assert_eq!(r.resources[0].3, 1);
    assert_eq!(r.resources[2].3, 2);
    // and the data seek position was reported per file
    assert_eq!(r.seeks.len(), 2);
}

#[test]
fn malformed_resource_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let game = dir.path().join("adventure.gam");
    let mut gb = GameBuilder::new();
    gb.object(100, false, &[], &[]);
    gb.write_to(&game).unwrap();

    std::fs::write(dir.path().join("adventure.rs0"), b"garbage").unwrap();

    let mut cache = ObjectCache::new(1 << 20, 4);
    let mut voc = VocabCtx::new();
    let mut host = RecordingHost::default();
    let err = tadpole::gamefile::load_game(&game, &mut cache, &mut voc, &mut host);
    assert!(err.is_err());
}

#[test]
fn without_resource_files_nothing_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let game = dir.path().join("plain.gam");
    let mut gb = GameBuilder::new();
    gb.object(100, false, &[], &[]);
    gb.write_to(&game).unwrap();

    let mut host = RecordingHost::default();
    load_with_host(&game, &mut host);
    let r = host.0.lock().unwrap();
    assert!(r.resfiles.is_empty());
    assert!(r.resources.is_empty());
}
