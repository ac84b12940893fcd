//! Game-image builder.
//!
//! Produces well-formed game files in the exact format `gamefile` reads.
//! The test suite and the demo tooling use this to construct minimal
//! games; it plays the role a compiler back end would.

use std::path::Path;

use crate::gamefile::{
    FLAG_CRYPT, GAME_SIG, OBJREC_FUNC, OBJREC_OBJ, VSN_CURRENT, XOR_INC, XOR_SEED,
};
use crate::object::build_payload;
use crate::value::{ObjNum, PropNum, Value, OBJ_INVALID};
use crate::vocab::VOCIF_CLASS;

pub const DEFAULT_TIMESTAMP: &[u8; 26] = b"Fri Jul 14 12:00:00 1995\n\0";

struct BuildObject {
    num: ObjNum,
    kind: u8,
    payload: Vec<u8>,
    /// Inheritance record data for game objects; None for functions.
    inh: Option<(u8, Vec<ObjNum>, ObjNum)>,
}

struct BuildWord {
    word: Vec<u8>,
    word2: Vec<u8>,
    prop: PropNum,
    obj: ObjNum,
    flags: u16,
}

pub struct GameBuilder {
    objects: Vec<BuildObject>,
    words: Vec<BuildWord>,
    compounds: Vec<(Vec<u8>, Vec<u8>, Vec<u8>)>,
    specials: Vec<(u8, Vec<u8>)>,
    me: ObjNum,
    preinit: Option<ObjNum>,
    timestamp: [u8; 26],
    encrypt: bool,
    xor: (u8, u8),
}

impl Default for GameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GameBuilder {
    pub fn new() -> Self {
        GameBuilder {
            objects: Vec::new(),
            words: Vec::new(),
            compounds: Vec::new(),
            specials: Vec::new(),
            me: OBJ_INVALID,
            preinit: None,
            timestamp: *DEFAULT_TIMESTAMP,
            encrypt: false,
            xor: (XOR_SEED, XOR_INC),
        }
    }

    pub fn timestamp(&mut self, ts: &[u8; 26]) -> &mut Self {
        self.timestamp = *ts;
        self
    }

    pub fn encrypt(&mut self, on: bool) -> &mut Self {
        self.encrypt = on;
        self
    }

    /// Use a non-default obfuscation keystream (emits an XSI section).
    pub fn xor_params(&mut self, seed: u8, inc: u8) -> &mut Self {
        self.xor = (seed, inc);
        self
    }

    /// Add a game object with superclasses and data properties.
    pub fn object(
        &mut self,
        num: ObjNum,
        class: bool,
        supers: &[ObjNum],
        props: &[(PropNum, Value)],
    ) -> &mut Self {
        let payload = build_payload(class, supers, props);
        let flags = if class { VOCIF_CLASS } else { 0 };
        self.objects.push(BuildObject {
            num,
            kind: OBJREC_OBJ,
            payload,
            inh: Some((flags, supers.to_vec(), OBJ_INVALID)),
        });
        self
    }

    /// Add an object with an explicit pre-built payload (method code and
    /// the like).
    pub fn object_raw(
        &mut self,
        num: ObjNum,
        class: bool,
        supers: &[ObjNum],
        payload: Vec<u8>,
    ) -> &mut Self {
        let flags = if class { VOCIF_CLASS } else { 0 };
        self.objects.push(BuildObject {
            num,
            kind: OBJREC_OBJ,
            payload,
            inh: Some((flags, supers.to_vec(), OBJ_INVALID)),
        });
        self
    }

    /// Add a function object (payload: local count + bytecode).
    pub fn function(&mut self, num: ObjNum, code: Vec<u8>) -> &mut Self {
        self.objects.push(BuildObject {
            num,
            kind: OBJREC_FUNC,
            payload: code,
            inh: None,
        });
        self
    }

    pub fn word(&mut self, text: &[u8], prop: PropNum, obj: ObjNum) -> &mut Self {
        self.words.push(BuildWord {
            word: text.to_vec(),
            word2: Vec::new(),
            prop,
            obj,
            flags: 0,
        });
        self
    }

    pub fn word2(&mut self, text: &[u8], text2: &[u8], prop: PropNum, obj: ObjNum) -> &mut Self {
        self.words.push(BuildWord {
            word: text.to_vec(),
            word2: text2.to_vec(),
            prop,
            obj,
            flags: 0,
        });
        self
    }

    pub fn compound(&mut self, a: &[u8], b: &[u8], replacement: &[u8]) -> &mut Self {
        self.compounds
            .push((a.to_vec(), b.to_vec(), replacement.to_vec()));
        self
    }

    pub fn special(&mut self, code: u8, text: &[u8]) -> &mut Self {
        self.specials.push((code, text.to_vec()));
        self
    }

    pub fn me(&mut self, obj: ObjNum) -> &mut Self {
        self.me = obj;
        self
    }

    pub fn preinit(&mut self, f: ObjNum) -> &mut Self {
        self.preinit = Some(f);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(GAME_SIG);
        out.extend_from_slice(VSN_CURRENT);
        let mut flags = 0u16;
        if self.encrypt {
            flags |= FLAG_CRYPT;
        }
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&self.timestamp);

        if self.xor != (XOR_SEED, XOR_INC) {
            let mut body = vec![self.xor.0, self.xor.1];
            push_section(&mut out, b"XSI", &mut body);
        }

        // OBJ stream
        let mut body = Vec::new();
        for o in &self.objects {
            body.push(o.kind);
            body.extend_from_slice(&o.num.to_le_bytes());
            let len = o.payload.len() as u16;
            body.extend_from_slice(&len.to_le_bytes()); // allocation size
            body.extend_from_slice(&len.to_le_bytes()); // data size
            let mut data = o.payload.clone();
            if self.encrypt {
                crate::gamefile::xor_stream(&mut data, self.xor.0, self.xor.1);
            }
            body.extend_from_slice(&data);
        }
        push_section(&mut out, b"OBJ", &mut body);

        // INH records
        let mut body = Vec::new();
        for o in &self.objects {
            let Some((iflags, supers, location)) = &o.inh else {
                continue;
            };
            body.push(*iflags);
            body.extend_from_slice(&o.num.to_le_bytes());
            body.extend_from_slice(&location.to_le_bytes());
            body.extend_from_slice(&0u16.to_le_bytes()); // initial-location word
            body.extend_from_slice(&(supers.len() as u16).to_le_bytes());
            for sc in supers {
                body.extend_from_slice(&sc.to_le_bytes());
            }
        }
        push_section(&mut out, b"INH", &mut body);

        // REQ: Me plus the eight original hook slots, all absent
        let mut body = Vec::new();
        body.extend_from_slice(&self.me.to_le_bytes());
        for _ in 0..8 {
            body.extend_from_slice(&OBJ_INVALID.to_le_bytes());
        }
        push_section(&mut out, b"REQ", &mut body);

        // VOC entries
        let mut body = Vec::new();
        for w in &self.words {
            body.extend_from_slice(&(w.word.len() as u16).to_le_bytes());
            body.extend_from_slice(&(w.word2.len() as u16).to_le_bytes());
            body.extend_from_slice(&w.prop.to_le_bytes());
            body.extend_from_slice(&w.obj.to_le_bytes());
            body.extend_from_slice(&w.flags.to_le_bytes());
            let mut text = w.word.clone();
            text.extend_from_slice(&w.word2);
            if self.encrypt {
                crate::gamefile::xor_stream(&mut text, self.xor.0, self.xor.1);
            }
            body.extend_from_slice(&text);
        }
        push_section(&mut out, b"VOC", &mut body);

        if !self.compounds.is_empty() {
            let mut tbl = Vec::new();
            for (a, b, c) in &self.compounds {
                for s in [a, b, c] {
                    tbl.extend_from_slice(&((s.len() + 2) as u16).to_le_bytes());
                    tbl.extend_from_slice(s);
                }
            }
            if self.encrypt {
                crate::gamefile::xor_stream(&mut tbl, self.xor.0, self.xor.1);
            }
            let mut body = Vec::new();
            body.extend_from_slice(&(tbl.len() as u16).to_le_bytes());
            body.extend_from_slice(&tbl);
            push_section(&mut out, b"CMPD", &mut body);
        }

        if !self.specials.is_empty() {
            let mut tbl = Vec::new();
            for (code, text) in &self.specials {
                tbl.push(*code);
                tbl.push(text.len() as u8);
                tbl.extend_from_slice(text);
            }
            if self.encrypt {
                crate::gamefile::xor_stream(&mut tbl, self.xor.0, self.xor.1);
            }
            let mut body = Vec::new();
            body.extend_from_slice(&(tbl.len() as u16).to_le_bytes());
            body.extend_from_slice(&tbl);
            push_section(&mut out, b"SPECWORD", &mut body);
        }

        if let Some(f) = self.preinit {
            let mut body = f.to_le_bytes().to_vec();
            push_section(&mut out, b"PREINIT", &mut body);
        }

        let mut body = Vec::new();
        push_section(&mut out, b"$EOF", &mut body);
        out
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.build())
    }
}

fn push_section(out: &mut Vec<u8>, tag: &[u8], body: &mut Vec<u8>) {
    out.push(tag.len() as u8);
    out.extend_from_slice(tag);
    let end = (out.len() + 4 + body.len()) as u32;
    out.extend_from_slice(&end.to_le_bytes());
    out.append(body);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hostifc::NullHost;
    use crate::objcache::ObjectCache;
    use crate::vocab::{VocabCtx, WordKey, PRP_ADJ, PRP_NOUN};

    fn load(bytes: &[u8]) -> (ObjectCache, VocabCtx, crate::gamefile::LoadedGame) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mini.gam");
        std::fs::write(&path, bytes).unwrap();
        let mut cache = ObjectCache::new(1 << 20, 8);
        let mut voc = VocabCtx::new();
        let mut host = NullHost;
        let game = crate::gamefile::load_game(&path, &mut cache, &mut voc, &mut host).unwrap();
        (cache, voc, game)
    }

    #[test]
    fn build_and_load_minimal_game() {
        let mut gb = GameBuilder::new();
        gb.object(50, true, &[], &[(20, Value::Number(1))])
            .object(51, false, &[50], &[(21, Value::Str(b"shiny".to_vec()))])
            .word(b"lamp", PRP_NOUN, 51)
            .word(b"brass", PRP_ADJ, 51)
            .me(51);
        let bytes = gb.build();
        let (mut cache, voc, game) = load(&bytes);

        assert_eq!(game.timestamp, *DEFAULT_TIMESTAMP);
        assert_eq!(voc.me, 51);
        assert!(voc.is_class(51, 50));
        assert_eq!(voc.objects_for(&WordKey::one(b"lamp"), PRP_NOUN), vec![51]);
        assert_eq!(
            cache.get_prop_direct(51, 21).unwrap(),
            Some(Value::Str(b"shiny".to_vec()))
        );
        assert_eq!(cache.get_prop_direct(50, 20).unwrap(), Some(Value::Number(1)));
    }

    #[test]
    fn encrypted_image_decodes_identically() {
        let mut gb = GameBuilder::new();
        gb.encrypt(true)
            .object(60, false, &[], &[(22, Value::Str(b"secret text".to_vec()))])
            .word(b"secret", PRP_NOUN, 60);
        let (mut cache, voc, _) = load(&gb.build());
        assert_eq!(
            cache.get_prop_direct(60, 22).unwrap(),
            Some(Value::Str(b"secret text".to_vec()))
        );
        assert_eq!(voc.objects_for(&WordKey::one(b"secret"), PRP_NOUN), vec![60]);
    }

    #[test]
    fn custom_xor_params_roundtrip_via_xsi() {
        let mut gb = GameBuilder::new();
        gb.encrypt(true)
            .xor_params(3, 7)
            .object(60, false, &[], &[(22, Value::Number(9))]);
        let (mut cache, _, _) = load(&gb.build());
        assert_eq!(cache.get_prop_direct(60, 22).unwrap(), Some(Value::Number(9)));
    }

    #[test]
    fn unknown_sections_are_skipped() {
        let mut gb = GameBuilder::new();
        gb.object(60, false, &[], &[(22, Value::Number(9))]);
        let mut bytes = gb.build();
        // splice an unrecognized section in front of $EOF
        let eof_at = bytes.len() - (1 + 4 + 4);
        let mut extra = Vec::new();
        let tag = b"FUTURE";
        extra.push(tag.len() as u8);
        extra.extend_from_slice(tag);
        let end = (eof_at + extra.len() + 4 + 3) as u32;
        extra.extend_from_slice(&end.to_le_bytes());
        extra.extend_from_slice(&[1, 2, 3]);
        bytes.splice(eof_at..eof_at, extra);
        // loader must hop over it and still find $EOF
        let (mut cache, _, _) = load(&bytes);
        assert_eq!(cache.get_prop_direct(60, 22).unwrap(), Some(Value::Number(9)));
    }

    #[test]
    fn bad_signature_and_version_are_fatal() {
        let mut gb = GameBuilder::new();
        gb.object(60, false, &[], &[]);
        let good = gb.build();

        let mut bad_sig = good.clone();
        bad_sig[0] = b'X';
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("bad.gam");
        std::fs::write(&p, &bad_sig).unwrap();
        let mut cache = ObjectCache::new(1 << 20, 8);
        let mut voc = VocabCtx::new();
        let err = crate::gamefile::load_game(&p, &mut cache, &mut voc, &mut NullHost).unwrap_err();
        assert_eq!(err, crate::errors::TadsError::BadHeader);

        let mut bad_vsn = good;
        let at = GAME_SIG.len();
        bad_vsn[at..at + 7].copy_from_slice(b"v9.9.9\0");
        std::fs::write(&p, &bad_vsn).unwrap();
        let mut cache = ObjectCache::new(1 << 20, 8);
        let mut voc = VocabCtx::new();
        let err = crate::gamefile::load_game(&p, &mut cache, &mut voc, &mut NullHost).unwrap_err();
        assert_eq!(err, crate::errors::TadsError::BadVersion);
    }
}
