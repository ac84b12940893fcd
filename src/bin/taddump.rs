//! taddump - dump the section layout and contents of a game image.
//!
//! Handy when a game misloads: shows every section tag with its extent,
//! the header flags, the timestamp, and summary counts for the object and
//! vocabulary streams.

use std::fs::File;
use std::io::Read;

use tadpole::gamefile::{FLAG_CRYPT, FLAG_FAST, GAME_SIG};
use tadpole::hostifc::NullHost;
use tadpole::objcache::ObjectCache;
use tadpole::value::{read_u16, read_u32};
use tadpole::vocab::VocabCtx;

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <game.gam>", args[0]);
        std::process::exit(2);
    }
    let path = std::path::PathBuf::from(&args[1]);

    let mut buf = Vec::new();
    match File::open(&path).and_then(|mut f| f.read_to_end(&mut buf)) {
        Ok(_) => {}
        Err(e) => {
            eprintln!("cannot read {}: {e}", path.display());
            std::process::exit(1);
        }
    }

    if buf.len() < GAME_SIG.len() + 7 + 2 + 26 || &buf[..GAME_SIG.len()] != GAME_SIG {
        eprintln!("{} is not a TADS2 game file", path.display());
        std::process::exit(1);
    }

    let vsn = &buf[GAME_SIG.len()..GAME_SIG.len() + 7];
    let flags = read_u16(&buf, GAME_SIG.len() + 7);
    let ts = &buf[GAME_SIG.len() + 9..GAME_SIG.len() + 9 + 26];
    println!("file:      {}", path.display());
    println!(
        "version:   {}",
        String::from_utf8_lossy(&vsn[..vsn.len() - 1])
    );
    println!(
        "flags:     {:#06x}{}{}",
        flags,
        if flags & FLAG_CRYPT != 0 { " crypt" } else { "" },
        if flags & FLAG_FAST != 0 { " fast" } else { "" },
    );
    println!(
        "timestamp: {}",
        String::from_utf8_lossy(ts).trim_end_matches(['\n', '\0'])
    );
    println!();

    // walk the section tags by their end offsets
    let mut pos = GAME_SIG.len() + 7 + 2 + 26;
    println!("{:<10} {:>10} {:>10}", "section", "start", "size");
    while pos < buf.len() {
        let taglen = buf[pos] as usize;
        if pos + 1 + taglen + 4 > buf.len() {
            eprintln!("truncated section header at offset {pos}");
            break;
        }
        let tag = String::from_utf8_lossy(&buf[pos + 1..pos + 1 + taglen]).into_owned();
        let end = read_u32(&buf, pos + 1 + taglen) as usize;
        let body_start = pos + 1 + taglen + 4;
        println!(
            "{:<10} {:>10} {:>10}",
            tag,
            body_start,
            end.saturating_sub(body_start)
        );
        if tag == "$EOF" {
            break;
        }
        if end <= pos || end > buf.len() {
            eprintln!("bad end offset {end} for section {tag}");
            break;
        }
        pos = end;
    }

    // a full load pass for the summary counts
    let mut cache = ObjectCache::new(64 << 20, 1);
    let mut voc = VocabCtx::new();
    let mut host = NullHost;
    match tadpole::gamefile::load_game(&path, &mut cache, &mut voc, &mut host) {
        Ok(game) => {
            println!();
            println!("objects:   {}", cache.object_numbers().len());
            println!("inh recs:  {}", voc.all_inh_objects().len());
            println!("preinit:   {:#06x}", game.preinit);
            println!("me:        {:#06x}", voc.me);
        }
        Err(e) => {
            eprintln!();
            eprintln!("load failed: {e}");
            std::process::exit(1);
        }
    }
}
