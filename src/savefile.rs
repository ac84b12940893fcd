//! Save and restore.
//!
//! A save file captures everything that can differ from the compiled game:
//! dirty objects (full images for dynamic objects, mutable regions for
//! static ones), the three schedule tables, dynamically added or deleted
//! vocabulary, and the current Me object.  The embedded compilation
//! timestamp ties a save to the exact game image that produced it.
//!
//! Restore reports through `RestoreCode`; the six outcomes get distinct
//! user messaging and must stay distinguishable.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, info, warn};

use crate::errors::{RestoreCode, TadsError};
use crate::object;
use crate::objcache::ObjectCache;
use crate::value::{
    read_i32, read_u16, write_u16, ObjNum, Value, DAT_FNADDR, DAT_NIL, DAT_NUMBER, DAT_OBJECT,
    DAT_PROPNUM, DAT_TRUE, OBJ_INVALID,
};
use crate::vocab::{SchedRec, VocabCtx, WordKey, VOCF_DEL, VOCIF_NEW, VOCIF_VOC};

/// Save-file header, and the prefix header that optionally embeds the
/// game file's name ahead of it.  Trailing NULs are on disk.
pub const SAVE_SIG: &[u8] = b"TADS2 save\n\r\x1a\0";
pub const SAVE_PREFIX_SIG: &[u8] = b"TADS2 save/g\n\r\x1a\0";

/// Format version strings, 7 bytes.  The current version appends the Me
/// object to the save; the legacy version lacks it.
pub const SAVE_VSN: &[u8] = b"v2.2.1\0";
pub const SAVE_VSN_OLD: &[u8] = b"v2.2.0\0";

/// Write a save file.  `game_name`, when present, goes into the prefix
/// header so a later session can find the right game image from the save
/// alone.  Returns false on any I/O failure (the script-level contract is
/// a boolean).
pub fn save_game(
    path: &Path,
    cache: &mut ObjectCache,
    voc: &VocabCtx,
    game_name: Option<&str>,
) -> bool {
    match save_game_inner(path, cache, voc, game_name) {
        Ok(()) => true,
        Err(e) => {
            warn!("save failed: {e}");
            false
        }
    }
}

fn save_game_inner(
    path: &Path,
    cache: &mut ObjectCache,
    voc: &VocabCtx,
    game_name: Option<&str>,
) -> Result<(), TadsError> {
    let io = |_: std::io::Error| TadsError::ReadGame;
    let mut f = File::create(path).map_err(io)?;

    if let Some(name) = game_name {
        f.write_all(SAVE_PREFIX_SIG).map_err(io)?;
        f.write_all(&(name.len() as u16).to_le_bytes()).map_err(io)?;
        f.write_all(name.as_bytes()).map_err(io)?;
    }

    f.write_all(SAVE_SIG).map_err(io)?;
    f.write_all(SAVE_VSN).map_err(io)?;
    f.write_all(&voc.timestamp).map_err(io)?;

    // changed objects, in ascending object order
    for obj in voc.all_inh_objects() {
        if !cache.is_dirty(obj) {
            continue;
        }
        let dynamic = voc
            .inh(obj)
            .map(|r| r.flags & VOCIF_NEW != 0)
            .unwrap_or(false);
        let guard = cache.lock(obj)?;
        let p = guard.bytes();
        let mut hdr = [0u8; 7];
        if dynamic {
            // full image of a runtime-created object
            let size = object::free_ofs(p);
            hdr[0] = 1;
            write_u16(&mut hdr, 1, obj);
            write_u16(&mut hdr, 3, size as u16);
            f.write_all(&hdr).map_err(io)?;
            f.write_all(&p[..size]).map_err(io)?;
        } else {
            // just the mutable region of a static object
            let rst = object::reset_ofs(p);
            let mutsiz = object::free_ofs(p) - rst;
            if mutsiz == 0 {
                continue;
            }
            hdr[0] = 0;
            write_u16(&mut hdr, 1, obj);
            write_u16(&mut hdr, 3, object::prop_count(p) as u16);
            write_u16(&mut hdr, 5, mutsiz as u16);
            f.write_all(&hdr).map_err(io)?;
            f.write_all(&p[rst..rst + mutsiz]).map_err(io)?;
        }
    }

    // end-of-objects sentinel
    let mut hdr = [0u8; 7];
    write_u16(&mut hdr, 1, OBJ_INVALID);
    f.write_all(&hdr).map_err(io)?;

    // schedule tables: daemons, fuses, notifiers, in that order
    write_sched_table(&mut f, &voc.daemons).map_err(io)?;
    write_sched_table(&mut f, &voc.fuses).map_err(io)?;
    write_sched_table(&mut f, &voc.notifiers).map_err(io)?;

    // dynamically added and deleted vocabulary
    let mut err = None;
    voc.for_each_word(|key, b| {
        if b.flags & (crate::vocab::VOCF_NEW | VOCF_DEL) == 0 {
            return;
        }
        let mut hdr = [0u8; 8];
        hdr[0] = b.pos as u8;
        hdr[1] = b.flags;
        write_u16(&mut hdr, 2, key.word.len() as u16);
        write_u16(&mut hdr, 4, key.word2.len() as u16);
        write_u16(&mut hdr, 6, b.obj);
        if f.write_all(&hdr).is_err()
            || f.write_all(&key.word).is_err()
            || f.write_all(&key.word2).is_err()
        {
            err = Some(TadsError::ReadGame);
        }
    });
    if let Some(e) = err {
        return Err(e);
    }

    // vocabulary end marker: header with the invalid object number
    let mut hdr = [0u8; 8];
    write_u16(&mut hdr, 6, OBJ_INVALID);
    f.write_all(&hdr).map_err(io)?;

    // current Me (format v2.2.1 and up)
    f.write_all(&voc.me.to_le_bytes()).map_err(io)?;

    info!("saved game to {}", path.display());
    Ok(())
}

fn write_sched_table(f: &mut File, table: &[Option<SchedRec>]) -> std::io::Result<()> {
    for (i, slot) in table.iter().enumerate() {
        let Some(rec) = slot else { continue };
        let mut buf = [0u8; 13];
        write_u16(&mut buf, 0, i as u16);
        write_u16(&mut buf, 2, rec.target);
        buf[4] = rec.arg.type_code();
        match &rec.arg {
            Value::Number(n) => buf[5..9].copy_from_slice(&n.to_le_bytes()),
            Value::Object(o) | Value::FnAddr(o) => buf[5..7].copy_from_slice(&o.to_le_bytes()),
            Value::PropNum(p) => buf[5..7].copy_from_slice(&p.to_le_bytes()),
            _ => {}
        }
        write_u16(&mut buf, 9, rec.prop);
        write_u16(&mut buf, 11, rec.time);
        f.write_all(&buf)?;
    }
    // end record: slot number 0xffff
    let mut buf = [0u8; 13];
    write_u16(&mut buf, 0, 0xffff);
    f.write_all(&buf)
}

/// Peek at a save file's prefix header for the name of the game that
/// produced it.  Returns None when the prefix is absent or unreadable.
pub fn saved_game_name(path: &Path) -> Option<String> {
    let mut f = File::open(path).ok()?;
    let mut sig = vec![0u8; SAVE_PREFIX_SIG.len() + 2];
    f.read_exact(&mut sig).ok()?;
    if &sig[..SAVE_PREFIX_SIG.len()] != SAVE_PREFIX_SIG {
        return None;
    }
    let len = read_u16(&sig, SAVE_PREFIX_SIG.len()) as usize;
    let mut name = vec![0u8; len];
    f.read_exact(&mut name).ok()?;
    String::from_utf8(name).ok()
}

/// Restore a save file.  On success the caller's world has been fully
/// replaced; on any failure the file is closed and the code says which
/// way it went wrong.  (A failed restore after the revert step leaves the
/// world at its post-compilation state, which is also what the original
/// runtime did.)
pub fn restore_game(path: &Path, cache: &mut ObjectCache, voc: &mut VocabCtx) -> RestoreCode {
    let mut f = match File::open(path) {
        Ok(f) => f,
        Err(_) => return RestoreCode::FileNotFound,
    };
    match restore_inner(&mut f, cache, voc) {
        Ok(code) => code,
        Err(_) => RestoreCode::ReadError,
    }
}

fn restore_inner(
    f: &mut File,
    cache: &mut ObjectCache,
    voc: &mut VocabCtx,
) -> Result<RestoreCode, TadsError> {
    let mut prefix = vec![0u8; SAVE_PREFIX_SIG.len() + 2];
    match f.read_exact(&mut prefix) {
        Ok(()) if &prefix[..SAVE_PREFIX_SIG.len()] == SAVE_PREFIX_SIG => {
            // skip the embedded game name
            let skip = read_u16(&prefix, SAVE_PREFIX_SIG.len()) as i64;
            if f.seek(SeekFrom::Current(skip)).is_err() {
                return Ok(RestoreCode::NotSaveFile);
            }
        }
        _ => {
            // no prefix header: rewind and read the plain header
            if f.seek(SeekFrom::Start(0)).is_err() {
                return Ok(RestoreCode::ReadError);
            }
        }
    }

    let mut hdr = vec![0u8; SAVE_SIG.len() + 7];
    if f.read_exact(&mut hdr).is_err() || &hdr[..SAVE_SIG.len()] != SAVE_SIG {
        return Ok(RestoreCode::NotSaveFile);
    }
    let vsn = &hdr[SAVE_SIG.len()..];
    let legacy = if vsn == SAVE_VSN {
        false
    } else if vsn == SAVE_VSN_OLD {
        true
    } else {
        return Ok(RestoreCode::BadFormatVersion);
    };

    let mut timestamp = [0u8; 26];
    if f.read_exact(&mut timestamp).is_err() || timestamp != voc.timestamp {
        return Ok(RestoreCode::BadGameVersion);
    }

    // revert the whole world before replaying the save
    cache.revert_all();
    voc.revert_words();
    voc.revert_inh();
    voc.clear_schedules();
    voc.clear_pronouns();
    voc.me = voc.me_init;

    // object records
    loop {
        let mut hdr = [0u8; 7];
        if f.read_exact(&mut hdr).is_err() {
            return Ok(RestoreCode::ReadError);
        }
        let obj = read_u16(&hdr, 1);
        if obj == OBJ_INVALID {
            break;
        }
        if hdr[0] == 1 {
            // dynamic object: full image, then a fresh inheritance record
            let size = read_u16(&hdr, 3) as usize;
            let mut image = vec![0u8; size];
            if f.read_exact(&mut image).is_err() {
                return Ok(RestoreCode::ReadError);
            }
            let supers = object::superclasses(&image);
            cache.alloc_with_num(obj, image);
            voc.add_inh(obj, VOCIF_NEW | VOCIF_VOC, supers, OBJ_INVALID);
        } else {
            // static object: splice the mutable region back in
            let propcnt = read_u16(&hdr, 3);
            let mutsiz = read_u16(&hdr, 5) as usize;
            let needed = {
                let guard = cache.lock(obj)?;
                let p = guard.bytes();
                let rst = object::reset_ofs(p);
                (rst + mutsiz).saturating_sub(p.len())
            };
            if needed > 0 {
                cache.expand(obj, needed)?;
            }
            let mut guard = cache.lock_mut(obj)?;
            let p = guard.bytes_mut();
            let rst = object::reset_ofs(p);
            write_u16(p, 4, propcnt);
            write_u16(p, 6, (rst + mutsiz) as u16);
            if f.read_exact(&mut p[rst..rst + mutsiz]).is_err() {
                return Ok(RestoreCode::ReadError);
            }
            object::reset_ignore_flags(p);
        }
    }

    // schedule tables, same order as the writer
    if read_sched_table(f, &mut voc.daemons).is_err()
        || read_sched_table(f, &mut voc.fuses).is_err()
        || read_sched_table(f, &mut voc.notifiers).is_err()
    {
        return Ok(RestoreCode::ReadError);
    }

    // vocabulary replay
    loop {
        let mut hdr = [0u8; 8];
        if f.read_exact(&mut hdr).is_err() {
            return Ok(RestoreCode::ReadError);
        }
        let obj = read_u16(&hdr, 6);
        if obj == OBJ_INVALID {
            break;
        }
        let pos = hdr[0] as u16;
        let flags = hdr[1];
        let len1 = read_u16(&hdr, 2) as usize;
        let len2 = read_u16(&hdr, 4) as usize;
        let mut text = vec![0u8; len1 + len2];
        if f.read_exact(&mut text).is_err() {
            return Ok(RestoreCode::ReadError);
        }
        let key = if len2 > 0 {
            WordKey::two(&text[..len1], &text[len1..])
        } else {
            WordKey::one(&text[..len1])
        };
        if flags & VOCF_DEL != 0 {
            if voc.del_word(&key, obj, pos).is_none() {
                debug!("restore: deleted word no longer present");
            }
        } else {
            voc.add_word(key, obj, pos, flags);
        }
    }

    // Me arrived with format v2.2.1
    if !legacy {
        let mut b = [0u8; 2];
        if f.read_exact(&mut b).is_err() {
            return Ok(RestoreCode::ReadError);
        }
        voc.me = u16::from_le_bytes(b);
    }

    info!("restore complete");
    Ok(RestoreCode::Success)
}

fn read_sched_table(f: &mut File, table: &mut [Option<SchedRec>]) -> Result<(), TadsError> {
    for slot in table.iter_mut() {
        *slot = None;
    }
    loop {
        let mut buf = [0u8; 13];
        f.read_exact(&mut buf).map_err(|_| TadsError::ReadGame)?;
        let idx = read_u16(&buf, 0);
        if idx == 0xffff {
            return Ok(());
        }
        let idx = idx as usize;
        if idx >= table.len() {
            return Err(TadsError::ReadGame);
        }
        let target = read_u16(&buf, 2);
        let arg = match buf[4] {
            DAT_NUMBER => Value::Number(read_i32(&buf, 5)),
            DAT_OBJECT => Value::Object(read_u16(&buf, 5)),
            DAT_FNADDR => Value::FnAddr(read_u16(&buf, 5)),
            DAT_PROPNUM => Value::PropNum(read_u16(&buf, 5)),
            DAT_TRUE => Value::True,
            DAT_NIL => Value::Nil,
            _ => Value::Nil,
        };
        table[idx] = Some(SchedRec {
            target,
            prop: read_u16(&buf, 9),
            arg,
            time: read_u16(&buf, 11),
        });
    }
}
