//! Binary game-image loader.
//!
//! A game file is a signature, a version header, a flags word, the
//! compilation timestamp, and then a sequence of tagged sections.  Every
//! section starts with a Pascal-style tag and a 4-byte end offset, so a
//! reader can skip anything it does not understand; unknown sections are
//! skipped with a warning rather than failing the load.
//!
//! Object payloads and vocabulary text are XOR-obfuscated with a running
//! additive keystream when the crypt flag is set; the seed/increment pair
//! defaults to 17/29 and may be overridden by an XSI section.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::errors::TadsError;
use crate::hostifc::HostIfc;
use crate::objcache::{ObjectCache, ObjectSource};
use crate::value::{read_u16, read_u32, ObjNum, OBJ_INVALID};
use crate::vocab::{VocabCtx, WordKey};

/// File signatures; the trailing NUL is part of the on-disk string.
pub const GAME_SIG: &[u8] = b"TADS2 bin\n\r\x1a\0";
pub const RSC_SIG: &[u8] = b"TADS2 rsc\n\r\x1a\0";

/// Format version headers, 7 bytes each.  Games compiled before 2.2 get a
/// compatibility flag: their compilers emitted stray property-delete
/// flags that must be ignored.
pub const VSN_CURRENT: &[u8] = b"v2.2.0\0";
pub const VSN_OLD_A: &[u8] = b"v2.0.1\0";
pub const VSN_OLD_B: &[u8] = b"v2.0.0\0";

/// Game-file flags word.
pub const FLAG_CRYPT: u16 = 0x08;
pub const FLAG_FAST: u16 = 0x20;
pub const FLAG_CASEFOLD: u16 = 0x40;

/// Object-stream record types.
pub const OBJREC_FUNC: u8 = 1;
pub const OBJREC_OBJ: u8 = 2;
pub const OBJREC_EXTERN: u8 = 10;

/// Default XOR keystream parameters.
pub const XOR_SEED: u8 = 17;
pub const XOR_INC: u8 = 29;

/// Apply/remove the obfuscation keystream in place.  The seed advances by
/// the increment per byte; each object or section starts from the file's
/// base seed.
pub fn xor_stream(buf: &mut [u8], mut seed: u8, inc: u8) {
    for b in buf.iter_mut() {
        *b ^= seed;
        seed = seed.wrapping_add(inc);
    }
}

/// What the loader learned about the game, beyond what it deposited in the
/// cache and vocabulary contexts.
#[derive(Debug)]
pub struct LoadedGame {
    pub path: PathBuf,
    pub dir: PathBuf,
    pub flags: u16,
    pub timestamp: [u8; 26],
    pub preinit: ObjNum,
    pub prop_count: u16,
    pub fmtstr: Vec<u8>,
    pub charset_id: Option<(Vec<u8>, Vec<u8>)>,
    /// Game compiled before format 2.2: ignore property-delete flags.
    pub compat_no_prp_del: bool,
}

/// On-demand object source over the open game file.
pub struct GameFileSource {
    file: File,
    start_ofs: u64,
    crypt: Option<(u8, u8)>,
}

impl ObjectSource for GameFileSource {
    fn load(&mut self, handle: u64, size: u16) -> Result<Vec<u8>, TadsError> {
        self.file
            .seek(SeekFrom::Start(self.start_ofs + handle))
            .map_err(|_| TadsError::ReadGame)?;
        let mut hdr = [0u8; 7];
        self.file
            .read_exact(&mut hdr)
            .map_err(|_| TadsError::ReadGame)?;
        let rdsiz = match hdr[0] {
            OBJREC_FUNC => read_u16(&hdr, 3),
            OBJREC_OBJ => read_u16(&hdr, 5),
            _ => return Err(TadsError::UnknownObjType),
        };
        if rdsiz > size {
            return Err(TadsError::LoadTooBig);
        }
        let mut buf = vec![0u8; rdsiz as usize];
        self.file
            .read_exact(&mut buf)
            .map_err(|_| TadsError::ReadGame)?;
        if let Some((seed, inc)) = self.crypt {
            xor_stream(&mut buf, seed, inc);
        }
        Ok(buf)
    }
}

struct Reader {
    file: File,
    start_ofs: u64,
}

impl Reader {
    fn pos(&mut self) -> Result<u64, TadsError> {
        self.file
            .stream_position()
            .map(|p| p - self.start_ofs)
            .map_err(|_| TadsError::ReadGame)
    }

    fn seek(&mut self, ofs: u64) -> Result<(), TadsError> {
        self.file
            .seek(SeekFrom::Start(self.start_ofs + ofs))
            .map(|_| ())
            .map_err(|_| TadsError::ReadGame)
    }

    fn read(&mut self, n: usize) -> Result<Vec<u8>, TadsError> {
        let mut buf = vec![0u8; n];
        self.file
            .read_exact(&mut buf)
            .map_err(|_| TadsError::ReadGame)?;
        Ok(buf)
    }

    fn read_u16(&mut self) -> Result<u16, TadsError> {
        let b = self.read(2)?;
        Ok(read_u16(&b, 0))
    }
}

/// Load a game image: headers, then every section, depositing objects in
/// the cache and vocabulary in the parser database.  Afterwards the cache
/// is wired to a fresh load-on-demand source over the same file, and
/// external resource files are probed.
pub fn load_game(
    path: &Path,
    cache: &mut ObjectCache,
    voc: &mut VocabCtx,
    host: &mut dyn HostIfc,
) -> Result<LoadedGame, TadsError> {
    let file = File::open(path).map_err(|_| TadsError::OpenGame)?;
    let mut r = Reader { file, start_ofs: 0 };

    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    if let Some(name) = path.to_str() {
        host.set_game_name(name);
    }

    // file and version headers
    let hdr = r.read(GAME_SIG.len() + 7 + 2)?;
    if &hdr[..GAME_SIG.len()] != GAME_SIG {
        return Err(TadsError::BadHeader);
    }
    let vsn = &hdr[GAME_SIG.len()..GAME_SIG.len() + 7];
    let compat_no_prp_del = if vsn == VSN_CURRENT {
        false
    } else if vsn == VSN_OLD_A || vsn == VSN_OLD_B {
        true
    } else {
        return Err(TadsError::BadVersion);
    };
    let flags = read_u16(&hdr, GAME_SIG.len() + 7);

    let mut timestamp = [0u8; 26];
    timestamp.copy_from_slice(&r.read(26)?);
    voc.timestamp = timestamp;

    let mut xor_seed = XOR_SEED;
    let mut xor_inc = XOR_INC;
    let crypt = flags & FLAG_CRYPT != 0;

    let mut game = LoadedGame {
        path: path.to_path_buf(),
        dir: dir.clone(),
        flags,
        timestamp,
        preinit: OBJ_INVALID,
        prop_count: 0,
        fmtstr: Vec::new(),
        charset_id: None,
        compat_no_prp_del,
    };

    loop {
        // section tag: Pascal string + 4-byte end offset
        let taglen = r.read(1)?[0] as usize;
        let body = r.read(taglen + 4)?;
        let tag = &body[..taglen];
        let endpos = read_u32(&body, taglen) as u64;

        match tag {
            b"OBJ" => {
                if flags & FLAG_FAST != 0 {
                    // fast-load records cover these; skip the stream
                    r.seek(endpos)?;
                    continue;
                }
                read_obj_stream(&mut r, cache, endpos)?;
            }
            b"FST" => {
                if flags & FLAG_FAST == 0 {
                    r.seek(endpos)?;
                    continue;
                }
                read_fast_records(&mut r, cache, endpos)?;
            }
            b"INH" => {
                let mut pos = r.pos()?;
                while pos != endpos {
                    let rec = r.read(9)?;
                    let iflags = rec[0];
                    let obj = read_u16(&rec, 1);
                    let location = read_u16(&rec, 3);
                    let nsc = read_u16(&rec, 7) as usize;
                    let scbuf = r.read(2 * nsc)?;
                    let supers = (0..nsc).map(|i| read_u16(&scbuf, 2 * i)).collect();
                    voc.add_inh(obj, iflags, supers, location);
                    pos += 9 + 2 * nsc as u64;
                }
            }
            b"REQ" => {
                let pos = r.pos()?;
                let siz = (endpos - pos) as usize;
                let buf = r.read(siz)?;
                read_req(voc, &buf);
            }
            b"VOC" => {
                let mut pos = r.pos()?;
                while pos != endpos {
                    let hdr = r.read(10)?;
                    let len1 = read_u16(&hdr, 0) as usize;
                    let len2 = read_u16(&hdr, 2) as usize;
                    let prop = read_u16(&hdr, 4);
                    let obj = read_u16(&hdr, 6);
                    let wflags = read_u16(&hdr, 8) as u8;
                    let mut text = r.read(len1 + len2)?;
                    if crypt {
                        xor_stream(&mut text, xor_seed, xor_inc);
                    }
                    let key = if len2 > 0 {
                        WordKey::two(&text[..len1], &text[len1..])
                    } else {
                        WordKey::one(&text[..len1])
                    };
                    voc.add_word(key, obj, prop, wflags);
                    pos += 10 + (len1 + len2) as u64;
                }
            }
            b"CMPD" => {
                let siz = r.read_u16()? as usize;
                let mut buf = r.read(siz)?;
                if crypt {
                    xor_stream(&mut buf, xor_seed, xor_inc);
                }
                read_compounds(voc, &buf);
            }
            b"SPECWORD" => {
                let siz = r.read_u16()? as usize;
                let mut buf = r.read(siz)?;
                if crypt {
                    xor_stream(&mut buf, xor_seed, xor_inc);
                }
                let mut p = 0usize;
                while p + 2 <= buf.len() {
                    let typ = buf[p];
                    let len = buf[p + 1] as usize;
                    p += 2;
                    if p + len > buf.len() {
                        break;
                    }
                    voc.specials.push((typ, buf[p..p + len].to_vec()));
                    p += len;
                }
            }
            b"FMTSTR" => {
                let siz = r.read_u16()? as usize;
                let mut buf = r.read(siz)?;
                if crypt {
                    xor_stream(&mut buf, xor_seed, xor_inc);
                }
                game.fmtstr = buf;
            }
            b"PRPCNT" => {
                game.prop_count = r.read_u16()?;
            }
            b"PREINIT" => {
                game.preinit = r.read_u16()?;
            }
            b"XSI" => {
                let b = r.read(2)?;
                xor_seed = b[0];
                xor_inc = b[1];
                r.seek(endpos)?;
            }
            b"CHRSET" => {
                let hdr = r.read(6)?;
                let len = read_u16(&hdr, 4) as usize;
                let ldesc = r.read(len)?;
                game.charset_id = Some((hdr[..4].to_vec(), ldesc));
            }
            b"HTMLRES" => {
                read_htmlres(&mut r, host, 0)?;
                r.seek(endpos)?;
            }
            b"EXTCNT" | b"XFCN" | b"SYMTAB" | b"SRC" | b"SRC2" | b"ERRMSG" | b"TADSPP" => {
                // debugger payloads and obsolete external functions
                debug!("skipping section {}", String::from_utf8_lossy(tag));
                r.seek(endpos)?;
            }
            b"$EOF" => break,
            other => {
                warn!(
                    "skipping unknown game file section {:?}",
                    String::from_utf8_lossy(other)
                );
                r.seek(endpos)?;
            }
        }
    }

    // wire the cache to a fresh handle on the same file for demand loads
    let src_file = File::open(path).map_err(|_| TadsError::OpenGame)?;
    cache.set_source(Box::new(GameFileSource {
        file: src_file,
        start_ofs: 0,
        crypt: if crypt { Some((xor_seed, xor_inc)) } else { None },
    }));

    info!(
        "loaded {} (flags {flags:#06x}, {} objects)",
        path.display(),
        cache.object_numbers().len()
    );

    // probe for chained resource files next to the game (or where the
    // host says)
    probe_resource_files(path, &dir, host)?;

    Ok(game)
}

fn read_obj_stream(r: &mut Reader, cache: &mut ObjectCache, endpos: u64) -> Result<(), TadsError> {
    let mut curpos = r.pos()?;
    while curpos != endpos {
        let hdr = r.read(3)?;
        let obj = read_u16(&hdr, 1);
        match hdr[0] {
            OBJREC_FUNC | OBJREC_OBJ => {
                let szs = r.read(4)?;
                let alloc = read_u16(&szs, 0);
                let data = read_u16(&szs, 2);
                cache.reserve(obj, alloc, curpos)?;
                curpos += 7 + data as u64;
                r.seek(curpos)?;
            }
            OBJREC_EXTERN => {
                // external functions are obsolete; skip name and move on
                let namelen = r.read(1)?[0] as usize;
                r.read(namelen)?;
                curpos += 4 + namelen as u64;
            }
            _ => return Err(TadsError::UnknownObjType),
        }
    }
    Ok(())
}

fn read_fast_records(
    r: &mut Reader,
    cache: &mut ObjectCache,
    endpos: u64,
) -> Result<(), TadsError> {
    let mut pos = r.pos()?;
    while pos != endpos {
        let hdr = r.read(3)?;
        let obj = read_u16(&hdr, 1);
        match hdr[0] {
            OBJREC_FUNC | OBJREC_OBJ => {
                let rest = r.read(8)?;
                let alloc = read_u16(&rest, 0);
                let handle = read_u32(&rest, 4) as u64;
                cache.reserve(obj, alloc, handle)?;
                pos += 11;
            }
            OBJREC_EXTERN => {
                let namelen = r.read(1)?[0] as usize;
                r.read(namelen)?;
                pos += 4 + namelen as u64;
            }
            _ => return Err(TadsError::UnknownObjType),
        }
    }
    Ok(())
}

fn read_req(voc: &mut VocabCtx, buf: &[u8]) {
    let siz = buf.len();
    if siz < 2 {
        return;
    }
    let word = |ofs: usize| -> ObjNum { read_u16(buf, ofs) };
    let opt = |ofs: usize, min: usize| -> Option<ObjNum> {
        if siz >= min {
            match read_u16(buf, ofs) {
                OBJ_INVALID => None,
                v => Some(v),
            }
        } else {
            None
        }
    };

    voc.me = word(0);
    voc.me_init = voc.me;
    let h = &mut voc.hooks;
    h.take_verb = opt(2, 4);
    h.str_obj = opt(4, 6);
    h.num_obj = opt(6, 8);
    h.pardon_fn = opt(8, 10);
    h.again_verb = opt(10, 12);
    h.init_fn = opt(12, 14);
    h.preparse_fn = opt(14, 16);
    h.parse_error_fn = opt(16, 18);
    // every field below was added later; presence is gated by the section
    // size, in strict historical order
    h.cmd_prompt_fn = opt(18, 20);
    h.parse_disambig_fn = opt(20, 26);
    h.parse_error2_fn = opt(22, 26);
    h.parse_default_fn = opt(24, 26);
    h.parse_askobj_fn = opt(26, 28);
    h.preparse_cmd_fn = opt(28, 30);
    h.parse_askobj_actor_fn = opt(30, 32);
    h.parse_error_param_fn = opt(32, 34);
    h.post_prompt_fn = opt(34, 38);
    h.init_restore_fn = opt(36, 38);
    h.parse_unknown_verb_fn = opt(38, 42);
    h.parse_noun_phrase_fn = opt(40, 42);
    h.post_action_fn = opt(42, 48);
    h.end_command_fn = opt(44, 48);
    h.pre_command_fn = opt(46, 48);
    h.parse_askobj_indirect_fn = opt(48, 50);
    h.preparse_ext_fn = opt(50, 54);
    h.parse_default_ext_fn = opt(52, 54);
}

fn read_compounds(voc: &mut VocabCtx, buf: &[u8]) {
    let mut p = 0usize;
    let read_str = |p: &mut usize| -> Option<Vec<u8>> {
        if *p + 2 > buf.len() {
            return None;
        }
        let total = read_u16(buf, *p) as usize;
        if total < 2 || *p + total > buf.len() {
            return None;
        }
        let s = buf[*p + 2..*p + total].to_vec();
        *p += total;
        Some(s)
    };
    while p < buf.len() {
        let Some(a) = read_str(&mut p) else { break };
        let Some(b) = read_str(&mut p) else { break };
        let Some(c) = read_str(&mut p) else { break };
        voc.compounds.push((a, b, c));
    }
}

fn read_htmlres(r: &mut Reader, host: &mut dyn HostIfc, fileno: i32) -> Result<(), TadsError> {
    let hdr = r.read(8)?;
    let entry_cnt = read_u32(&hdr, 0);
    for _ in 0..entry_cnt {
        let e = r.read(10)?;
        let res_ofs = read_u32(&e, 0) as u64;
        let res_siz = read_u32(&e, 4) as u64;
        let namelen = read_u16(&e, 8) as usize;
        let name = r.read(namelen)?;
        host.add_resource(res_ofs, res_siz, &name, fileno);
    }
    let pos = r.pos()?;
    host.set_resmap_seek(pos, fileno);
    Ok(())
}

/// Probe for external resource files `.rs0` through `.rs8` (lower case
/// first, then upper) beside the game file or in the host's resource
/// directory, validating and indexing each one found.
fn probe_resource_files(
    game_path: &Path,
    game_dir: &Path,
    host: &mut dyn HostIfc,
) -> Result<(), TadsError> {
    let base_dir = host.res_path().unwrap_or_else(|| game_dir.to_path_buf());
    let stem = game_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    for i in 0..9 {
        let lower = base_dir.join(format!("{stem}.rs{i}"));
        let upper = base_dir.join(format!("{stem}.RS{i}"));
        let found = if lower.is_file() {
            Some(lower)
        } else if upper.is_file() {
            Some(upper)
        } else {
            None
        };
        let Some(res) = found else { continue };
        let fileno = host.add_resfile(&res);
        read_resource_file(&res, host, fileno)?;
    }
    Ok(())
}

fn read_resource_file(path: &Path, host: &mut dyn HostIfc, fileno: i32) -> Result<(), TadsError> {
    let name = path.display().to_string();
    let file =
        File::open(path).map_err(|_| TadsError::ReadResource(name.clone()))?;
    let mut r = Reader { file, start_ofs: 0 };

    let hdr = r
        .read(RSC_SIG.len() + 7 + 2)
        .map_err(|_| TadsError::ReadResource(name.clone()))?;
    if &hdr[..RSC_SIG.len()] != RSC_SIG {
        return Err(TadsError::BadResourceHeader(name));
    }
    let vsn = &hdr[RSC_SIG.len()..RSC_SIG.len() + 7];
    if vsn != VSN_CURRENT && vsn != VSN_OLD_A && vsn != VSN_OLD_B {
        return Err(TadsError::BadVersion);
    }
    r.read(26)?; // timestamp, unchecked for resource-only files

    loop {
        let taglen = r.read(1)?[0] as usize;
        let body = r.read(taglen + 4)?;
        let tag = &body[..taglen];
        let endpos = read_u32(&body, taglen) as u64;
        match tag {
            b"HTMLRES" => {
                read_htmlres(&mut r, host, fileno)?;
                r.seek(endpos)?;
            }
            b"$EOF" => break,
            other => {
                warn!(
                    "skipping unknown resource section {:?} in {}",
                    String::from_utf8_lossy(other),
                    path.display()
                );
                r.seek(endpos)?;
            }
        }
    }
    debug!("indexed resource file {}", path.display());
    Ok(())
}
