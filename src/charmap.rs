//! Character-map files.
//!
//! A character map translates between the native character set the player
//! is typing in and the internal set the game was compiled for.  The
//! session owns the active mapping; the default is the identity mapping,
//! installed at session start and replaceable by an explicit override.
//!
//! File layout: signature, 4-byte charset id, length-prefixed description,
//! a 256-byte native-to-internal table, a 256-byte internal-to-native
//! table, then optional tagged blocks: `SYSI` (system info, skipped) and
//! `ENTY` (HTML-entity expansions, terminated by a zero-code/zero-length
//! sentinel pair), ending with `$EOF`.

use std::io::Read;
use std::path::Path;

use log::{debug, warn};

use crate::errors::TadsError;

pub const CMAP_SIG: &[u8] = b"TADS2 charmap S100\n\r\x1a";

pub struct CharMap {
    pub id: [u8; 4],
    pub ldesc: Vec<u8>,
    pub input: [u8; 256],
    pub output: [u8; 256],
    /// HTML entity expansions: code point -> expansion text.
    pub entities: Vec<(u16, Vec<u8>)>,
}

impl CharMap {
    /// The identity mapping used until a map is explicitly loaded.
    pub fn identity() -> Self {
        let mut table = [0u8; 256];
        for (i, t) in table.iter_mut().enumerate() {
            *t = i as u8;
        }
        CharMap {
            id: *b"us\0\0",
            ldesc: b"(default identity mapping)".to_vec(),
            input: table,
            output: table,
            entities: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<CharMap, TadsError> {
        let mut f = std::fs::File::open(path).map_err(|_| TadsError::BadCharmap)?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf).map_err(|_| TadsError::BadCharmap)?;
        Self::parse(&buf)
    }

    pub fn parse(buf: &[u8]) -> Result<CharMap, TadsError> {
        fn take<'a>(buf: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8], TadsError> {
            if *pos + n > buf.len() {
                return Err(TadsError::BadCharmap);
            }
            let s = &buf[*pos..*pos + n];
            *pos += n;
            Ok(s)
        }
        let mut pos = 0usize;

        if take(buf, &mut pos, CMAP_SIG.len())? != CMAP_SIG {
            return Err(TadsError::BadCharmap);
        }
        let mut id = [0u8; 4];
        id.copy_from_slice(take(buf, &mut pos, 4)?);
        let dlen = {
            let b = take(buf, &mut pos, 2)?;
            u16::from_le_bytes([b[0], b[1]]) as usize
        };
        let ldesc = take(buf, &mut pos, dlen)?.to_vec();

        let mut input = [0u8; 256];
        input.copy_from_slice(take(buf, &mut pos, 256)?);
        let mut output = [0u8; 256];
        output.copy_from_slice(take(buf, &mut pos, 256)?);

        let mut map = CharMap {
            id,
            ldesc,
            input,
            output,
            entities: Vec::new(),
        };

        // optional tagged blocks
        while pos + 6 <= buf.len() {
            let tag: [u8; 4] = take(buf, &mut pos, 4)?.try_into().unwrap();
            let blen = {
                let b = take(buf, &mut pos, 2)?;
                u16::from_le_bytes([b[0], b[1]]) as usize
            };
            match &tag {
                b"$EOF" => break,
                b"SYSI" => {
                    // host-specific system info; not ours to interpret
                    take(buf, &mut pos, blen)?;
                }
                b"ENTY" => {
                    let end = pos + blen;
                    loop {
                        let hdr = take(buf, &mut pos, 3)?;
                        let code = u16::from_le_bytes([hdr[0], hdr[1]]);
                        let elen = hdr[2] as usize;
                        if code == 0 && elen == 0 {
                            break;
                        }
                        let text = take(buf, &mut pos, elen)?.to_vec();
                        map.entities.push((code, text));
                    }
                    if pos != end {
                        warn!("entity table length mismatch in character map");
                        pos = end.min(buf.len());
                    }
                }
                other => {
                    debug!(
                        "skipping unknown charmap block {:?}",
                        String::from_utf8_lossy(other)
                    );
                    take(buf, &mut pos, blen)?;
                }
            }
        }

        Ok(map)
    }

    pub fn to_internal(&self, text: &[u8]) -> Vec<u8> {
        text.iter().map(|&c| self.input[c as usize]).collect()
    }

    pub fn to_native(&self, text: &[u8]) -> Vec<u8> {
        text.iter().map(|&c| self.output[c as usize]).collect()
    }

    pub fn expand_entity(&self, code: u16) -> Option<&[u8]> {
        self.entities
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, t)| t.as_slice())
    }
}

/// Serialize a map back to the file format (used by tooling and tests).
pub fn write_charmap(map: &CharMap) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(CMAP_SIG);
    out.extend_from_slice(&map.id);
    out.extend_from_slice(&(map.ldesc.len() as u16).to_le_bytes());
    out.extend_from_slice(&map.ldesc);
    out.extend_from_slice(&map.input);
    out.extend_from_slice(&map.output);
    if !map.entities.is_empty() {
        let mut body = Vec::new();
        for (code, text) in &map.entities {
            body.extend_from_slice(&code.to_le_bytes());
            body.push(text.len() as u8);
            body.extend_from_slice(text);
        }
        body.extend_from_slice(&[0, 0, 0]);
        out.extend_from_slice(b"ENTY");
        out.extend_from_slice(&(body.len() as u16).to_le_bytes());
        out.extend_from_slice(&body);
    }
    out.extend_from_slice(b"$EOF");
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}
