//! Vocabulary and parser database.
//!
//! Owns the word table (text + part of speech -> object bindings), the
//! per-object inheritance records used by `isclass` and object iteration,
//! the fuse/daemon/notifier schedule tables, the pronoun bindings, and the
//! parser hook table read from the game file.

use indexmap::IndexMap;
use log::{debug, trace};

use crate::value::{ObjNum, PropNum, Value, OBJ_INVALID};

/// Part-of-speech property numbers.  The compiler and the word table agree
/// on these; anything else is not a vocabulary property.
pub const PRP_VERB: PropNum = 1;
pub const PRP_NOUN: PropNum = 2;
pub const PRP_ADJ: PropNum = 3;
pub const PRP_PREP: PropNum = 4;
pub const PRP_ARTICLE: PropNum = 5;
pub const PRP_PLURAL: PropNum = 6;

/// Action method evaluated on a verb object when a command executes.
pub const PRP_ACTION: PropNum = 7;
/// Verb template list: entries of
/// `[prep, verDo, do, verIo, io, dobj-first]`.
pub const PRP_TPL: PropNum = 8;

pub fn is_pos_prop(prop: PropNum) -> bool {
    (PRP_VERB..=PRP_PLURAL).contains(&prop)
}

/// Word-type bit flags, as returned by the type-lookup built-ins.
pub const VOCT_VERB: u32 = 0x01;
pub const VOCT_NOUN: u32 = 0x02;
pub const VOCT_ADJ: u32 = 0x04;
pub const VOCT_PREP: u32 = 0x08;
pub const VOCT_ARTICLE: u32 = 0x10;
pub const VOCT_PLURAL: u32 = 0x20;
pub const VOCT_SPEC: u32 = 0x40;
pub const VOCT_UNKNOWN: u32 = 0x100;

pub fn pos_type_bit(prop: PropNum) -> u32 {
    match prop {
        PRP_VERB => VOCT_VERB,
        PRP_NOUN => VOCT_NOUN,
        PRP_ADJ => VOCT_ADJ,
        PRP_PREP => VOCT_PREP,
        PRP_ARTICLE => VOCT_ARTICLE,
        PRP_PLURAL => VOCT_PLURAL,
        _ => 0,
    }
}

/// Word binding flags.  These byte values go into save files.
pub const VOCF_CLASS: u8 = 0x01;
pub const VOCF_NEW: u8 = 0x02;
pub const VOCF_DEL: u8 = 0x04;

/// Inheritance record flags.
pub const VOCIF_CLASS: u8 = 0x01;
pub const VOCIF_NEW: u8 = 0x02;
pub const VOCIF_VOC: u8 = 0x04;

/// Schedule slot count per table.  The table-full errors are part of the
/// script-visible contract, so the capacity is fixed rather than growable.
pub const SCHED_SLOTS: usize = 100;

/// Timer sentinel for notifiers that fire every turn and never expire.
pub const SCHED_EACH_TURN: u16 = 0xffff;

/// Inheritance pages: 256 objects per page over the 16-bit space.
const INH_PAGES: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WordKey {
    pub word: Vec<u8>,
    pub word2: Vec<u8>,
}

impl WordKey {
    pub fn one(word: &[u8]) -> Self {
        WordKey {
            word: word.to_ascii_lowercase(),
            word2: Vec::new(),
        }
    }

    pub fn two(word: &[u8], word2: &[u8]) -> Self {
        WordKey {
            word: word.to_ascii_lowercase(),
            word2: word2.to_ascii_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordBinding {
    pub obj: ObjNum,
    pub pos: PropNum,
    pub flags: u8,
}

#[derive(Debug, Clone, Default)]
pub struct InhRec {
    pub flags: u8,
    pub superclasses: Vec<ObjNum>,
    /// Initial location word from the compiler; carried but not interpreted
    /// by the core.
    pub location: ObjNum,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedRec {
    pub target: ObjNum,
    pub prop: PropNum,
    pub arg: Value,
    pub time: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedKind {
    Fuse,
    Daemon,
    Notifier,
}

/// A callback that came due during a turn advance; the session executes
/// these after the table bookkeeping is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireEvent {
    pub kind: SchedKind,
    pub target: ObjNum,
    pub prop: PropNum,
    pub arg: Value,
}

/// A reversible vocabulary-side mutation, queued into the cache's undo log.
#[derive(Debug, Clone)]
pub enum VocabUndo {
    AddedWord {
        key: WordKey,
        obj: ObjNum,
        pos: PropNum,
    },
    DeletedWord {
        key: WordKey,
        obj: ObjNum,
        pos: PropNum,
        flags: u8,
    },
    SetMe {
        old: ObjNum,
    },
}

/// Parser hook functions supplied by the game (REQ section).  Later
/// entries only exist in newer game files; absent hooks stay `None`.
#[derive(Debug, Clone, Default)]
pub struct ParserHooks {
    pub take_verb: Option<ObjNum>,
    pub str_obj: Option<ObjNum>,
    pub num_obj: Option<ObjNum>,
    pub pardon_fn: Option<ObjNum>,
    pub again_verb: Option<ObjNum>,
    pub init_fn: Option<ObjNum>,
    pub preparse_fn: Option<ObjNum>,
    pub parse_error_fn: Option<ObjNum>,
    pub cmd_prompt_fn: Option<ObjNum>,
    pub parse_disambig_fn: Option<ObjNum>,
    pub parse_error2_fn: Option<ObjNum>,
    pub parse_default_fn: Option<ObjNum>,
    pub parse_askobj_fn: Option<ObjNum>,
    pub preparse_cmd_fn: Option<ObjNum>,
    pub parse_askobj_actor_fn: Option<ObjNum>,
    pub parse_error_param_fn: Option<ObjNum>,
    pub post_prompt_fn: Option<ObjNum>,
    pub init_restore_fn: Option<ObjNum>,
    pub parse_unknown_verb_fn: Option<ObjNum>,
    pub parse_noun_phrase_fn: Option<ObjNum>,
    pub post_action_fn: Option<ObjNum>,
    pub end_command_fn: Option<ObjNum>,
    pub pre_command_fn: Option<ObjNum>,
    pub parse_askobj_indirect_fn: Option<ObjNum>,
    pub preparse_ext_fn: Option<ObjNum>,
    pub parse_default_ext_fn: Option<ObjNum>,
}

pub struct VocabCtx {
    words: IndexMap<WordKey, Vec<WordBinding>>,
    inh: Vec<Option<Box<[Option<InhRec>; 256]>>>,
    pub fuses: Vec<Option<SchedRec>>,
    pub daemons: Vec<Option<SchedRec>>,
    pub notifiers: Vec<Option<SchedRec>>,
    pub it: ObjNum,
    pub him: ObjNum,
    pub her: ObjNum,
    pub them: Vec<ObjNum>,
    pub me: ObjNum,
    pub me_init: ObjNum,
    pub turn_count: u32,
    pub hooks: ParserHooks,
    /// Compound word table: (first, second, replacement).
    pub compounds: Vec<(Vec<u8>, Vec<u8>, Vec<u8>)>,
    /// Special word table: (flag char, text).
    pub specials: Vec<(u8, Vec<u8>)>,
    /// Game compilation timestamp (26 bytes), the save-compatibility key.
    pub timestamp: [u8; 26],
}

impl Default for VocabCtx {
    fn default() -> Self {
        Self::new()
    }
}

impl VocabCtx {
    pub fn new() -> Self {
        let mut inh = Vec::with_capacity(INH_PAGES);
        inh.resize_with(INH_PAGES, || None);
        VocabCtx {
            words: IndexMap::new(),
            inh,
            fuses: new_sched_table(),
            daemons: new_sched_table(),
            notifiers: new_sched_table(),
            it: OBJ_INVALID,
            him: OBJ_INVALID,
            her: OBJ_INVALID,
            them: Vec::new(),
            me: OBJ_INVALID,
            me_init: OBJ_INVALID,
            turn_count: 0,
            hooks: ParserHooks::default(),
            compounds: Vec::new(),
            specials: Vec::new(),
            timestamp: [0; 26],
        }
    }

    // -- word table -------------------------------------------------------

    /// Insert a binding.  Re-adding an identical binding is not an error:
    /// it clears a deletion mark if one is present, otherwise it is a
    /// no-op.  Part-of-speech validation belongs to the caller, which knows
    /// whether to signal a script bug.
    pub fn add_word(&mut self, key: WordKey, obj: ObjNum, pos: PropNum, flags: u8) {
        let bindings = self.words.entry(key).or_default();
        if let Some(b) = bindings.iter_mut().find(|b| b.obj == obj && b.pos == pos) {
            b.flags &= !VOCF_DEL;
            b.flags |= flags & VOCF_CLASS;
            return;
        }
        bindings.push(WordBinding { obj, pos, flags });
    }

    /// Remove a binding.  Static (compiled-in) bindings are only marked
    /// deleted so a restore can reconstruct them; runtime bindings go away
    /// entirely.  Returns the flags the binding had, or None if absent.
    pub fn del_word(&mut self, key: &WordKey, obj: ObjNum, pos: PropNum) -> Option<u8> {
        let bindings = self.words.get_mut(key)?;
        let idx = bindings
            .iter()
            .position(|b| b.obj == obj && b.pos == pos && b.flags & VOCF_DEL == 0)?;
        let flags = bindings[idx].flags;
        if flags & VOCF_NEW != 0 {
            bindings.remove(idx);
            if bindings.is_empty() {
                self.words.shift_remove(key);
            }
        } else {
            bindings[idx].flags |= VOCF_DEL;
        }
        Some(flags)
    }

    /// Physically remove a binding regardless of flags (undo replay).
    pub fn del_word_raw(&mut self, key: &WordKey, obj: ObjNum, pos: PropNum) {
        if let Some(bindings) = self.words.get_mut(key) {
            bindings.retain(|b| !(b.obj == obj && b.pos == pos));
            if bindings.is_empty() {
                self.words.shift_remove(key);
            }
        }
    }

    /// Restore a binding to exact flags (undo/restore replay).
    pub fn restore_word(&mut self, key: WordKey, obj: ObjNum, pos: PropNum, flags: u8) {
        let bindings = self.words.entry(key).or_default();
        if let Some(b) = bindings.iter_mut().find(|b| b.obj == obj && b.pos == pos) {
            b.flags = flags;
        } else {
            bindings.push(WordBinding { obj, pos, flags });
        }
    }

    /// Live bindings for a word (deleted entries filtered out).
    pub fn lookup(&self, key: &WordKey) -> Vec<&WordBinding> {
        self.words
            .get(key)
            .map(|bs| bs.iter().filter(|b| b.flags & VOCF_DEL == 0).collect())
            .unwrap_or_default()
    }

    /// Union of the type bits over a word's live bindings.
    pub fn word_types(&self, key: &WordKey) -> u32 {
        self.lookup(key)
            .iter()
            .fold(0, |acc, b| acc | pos_type_bit(b.pos))
    }

    /// Objects bound to a word under the given part of speech.
    pub fn objects_for(&self, key: &WordKey, pos: PropNum) -> Vec<ObjNum> {
        self.lookup(key)
            .iter()
            .filter(|b| b.pos == pos)
            .map(|b| b.obj)
            .collect()
    }

    /// Visit every binding, including deleted ones (save files need them).
    pub fn for_each_word<F: FnMut(&WordKey, &WordBinding)>(&self, mut f: F) {
        for (key, bindings) in &self.words {
            for b in bindings {
                f(key, b);
            }
        }
    }

    /// The words bound to an object under a part of speech, live only.
    pub fn words_for_object(&self, obj: ObjNum, pos: PropNum) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        for (key, bindings) in &self.words {
            for b in bindings {
                if b.obj == obj && b.pos == pos && b.flags & VOCF_DEL == 0 {
                    let mut text = key.word.clone();
                    if !key.word2.is_empty() {
                        text.push(b' ');
                        text.extend_from_slice(&key.word2);
                    }
                    out.push(text);
                }
            }
        }
        out
    }

    /// Drop runtime words and deletion marks (restart / pre-restore).
    pub fn revert_words(&mut self) {
        self.words.retain(|_, bindings| {
            bindings.retain(|b| b.flags & VOCF_NEW == 0);
            for b in bindings.iter_mut() {
                b.flags &= !VOCF_DEL;
            }
            !bindings.is_empty()
        });
    }

    // -- inheritance records ---------------------------------------------

    pub fn add_inh(&mut self, obj: ObjNum, flags: u8, supers: Vec<ObjNum>, location: ObjNum) {
        let page = (obj >> 8) as usize;
        let slot = (obj & 0xff) as usize;
        if self.inh[page].is_none() {
            self.inh[page] = Some(Box::new(std::array::from_fn(|_| None)));
        }
        self.inh[page].as_mut().unwrap()[slot] = Some(InhRec {
            flags,
            superclasses: supers,
            location,
        });
    }

    pub fn remove_inh(&mut self, obj: ObjNum) {
        let page = (obj >> 8) as usize;
        let slot = (obj & 0xff) as usize;
        if let Some(p) = self.inh[page].as_mut() {
            p[slot] = None;
        }
    }

    pub fn inh(&self, obj: ObjNum) -> Option<&InhRec> {
        let page = (obj >> 8) as usize;
        let slot = (obj & 0xff) as usize;
        self.inh[page].as_ref().and_then(|p| p[slot].as_ref())
    }

    /// Drop inheritance records created at runtime (restart / pre-restore).
    pub fn revert_inh(&mut self) {
        for page in self.inh.iter_mut().flatten() {
            for slot in page.iter_mut() {
                if slot.as_ref().map(|r| r.flags & VOCIF_NEW != 0).unwrap_or(false) {
                    *slot = None;
                }
            }
        }
    }

    /// Depth-first class test over the superclass graph, first match wins.
    /// The worklist keeps declaration order; the visited set bounds the
    /// walk even if the graph is malformed.
    pub fn is_class(&self, obj: ObjNum, cls: ObjNum) -> bool {
        let Some(rec) = self.inh(obj) else {
            return false;
        };
        let mut work: Vec<ObjNum> = rec.superclasses.iter().rev().copied().collect();
        let mut seen = vec![obj];
        while let Some(cur) = work.pop() {
            if cur == cls {
                return true;
            }
            if seen.contains(&cur) {
                continue;
            }
            seen.push(cur);
            if let Some(r) = self.inh(cur) {
                for sc in r.superclasses.iter().rev() {
                    work.push(*sc);
                }
            }
        }
        false
    }

    pub fn first_superclass(&self, obj: ObjNum) -> Option<ObjNum> {
        self.inh(obj).and_then(|r| r.superclasses.first().copied())
    }

    /// First non-class object, optionally filtered to instances of `cls`.
    pub fn first_obj(&self, cls: Option<ObjNum>) -> Option<ObjNum> {
        for (i, page) in self.inh.iter().enumerate() {
            let Some(page) = page else { continue };
            for (j, slot) in page.iter().enumerate() {
                let obj = ((i as u16) << 8) | j as u16;
                if self.iter_match(slot.as_ref(), obj, cls) {
                    return Some(obj);
                }
            }
        }
        None
    }

    /// Next object after `prev` in ascending numeric order.  The index
    /// arithmetic must cross 256-entry page boundaries exactly, including
    /// runs of missing pages.
    pub fn next_obj(&self, prev: ObjNum, cls: Option<ObjNum>) -> Option<ObjNum> {
        let mut i = (prev >> 8) as usize;
        let mut j = (prev & 0xff) as usize;
        loop {
            j += 1;
            if j == 256 {
                j = 0;
                i += 1;
                // skip whole missing pages without touching their slots
                while i < INH_PAGES && self.inh[i].is_none() {
                    i += 1;
                }
            }
            if i >= INH_PAGES {
                return None;
            }
            let obj = ((i as u16) << 8) | j as u16;
            let slot = self.inh[i].as_ref().and_then(|p| p[j].as_ref());
            if self.iter_match(slot, obj, cls) {
                return Some(obj);
            }
        }
    }

    /// Every object with an inheritance record, classes included, in
    /// ascending numeric order (the save-file object sweep).
    pub fn all_inh_objects(&self) -> Vec<ObjNum> {
        let mut out = Vec::new();
        for (i, page) in self.inh.iter().enumerate() {
            let Some(page) = page else { continue };
            for (j, slot) in page.iter().enumerate() {
                if slot.is_some() {
                    out.push(((i as u16) << 8) | j as u16);
                }
            }
        }
        out
    }

    fn iter_match(&self, slot: Option<&InhRec>, obj: ObjNum, cls: Option<ObjNum>) -> bool {
        let Some(rec) = slot else { return false };
        if rec.flags & VOCIF_CLASS != 0 {
            return false;
        }
        match cls {
            Some(cls) => self.is_class(obj, cls),
            None => true,
        }
    }

    // -- schedule tables --------------------------------------------------

    fn table(&mut self, kind: SchedKind) -> &mut Vec<Option<SchedRec>> {
        match kind {
            SchedKind::Fuse => &mut self.fuses,
            SchedKind::Daemon => &mut self.daemons,
            SchedKind::Notifier => &mut self.notifiers,
        }
    }

    /// Insert a scheduled callback.  An identical entry (same target,
    /// property, and argument) is overwritten rather than duplicated; a
    /// full table is an error the caller maps to the kind-specific
    /// "too many" code.
    pub fn set_sched(
        &mut self,
        kind: SchedKind,
        target: ObjNum,
        prop: PropNum,
        time: u16,
        arg: Value,
    ) -> Result<usize, ()> {
        let table = self.table(kind);
        if let Some(i) = table.iter().position(|s| {
            s.as_ref()
                .map(|r| r.target == target && r.prop == prop && r.arg == arg)
                .unwrap_or(false)
        }) {
            table[i] = Some(SchedRec { target, prop, arg, time });
            return Ok(i);
        }
        match table.iter().position(|s| s.is_none()) {
            Some(i) => {
                table[i] = Some(SchedRec { target, prop, arg, time });
                trace!("scheduled {kind:?} slot {i} target {target} time {time}");
                Ok(i)
            }
            None => Err(()),
        }
    }

    /// Remove a scheduled callback matching target, property, and argument.
    pub fn rem_sched(
        &mut self,
        kind: SchedKind,
        target: ObjNum,
        prop: PropNum,
        arg: &Value,
    ) -> Result<(), ()> {
        let table = self.table(kind);
        match table.iter().position(|s| {
            s.as_ref()
                .map(|r| r.target == target && r.prop == prop && r.arg == *arg)
                .unwrap_or(false)
        }) {
            Some(i) => {
                table[i] = None;
                Ok(())
            }
            None => Err(()),
        }
    }

    /// Remaining time on a fuse set for this function target and argument.
    pub fn fuse_time(&self, target: ObjNum, arg: &Value) -> Option<u16> {
        self.fuses
            .iter()
            .flatten()
            .find(|r| r.target == target && r.arg == *arg)
            .map(|r| r.time)
    }

    /// Remaining time on a notifier for this object and property.
    pub fn notifier_time(&self, target: ObjNum, prop: PropNum) -> Option<u16> {
        self.notifiers
            .iter()
            .flatten()
            .find(|r| r.target == target && r.prop == prop)
            .map(|r| r.time)
    }

    /// Advance the game clock.  Fuse and countdown-notifier timers drop by
    /// `count`; entries that reach zero fire once and their slots clear.
    /// When `run_schedules` is set, daemons and every-turn notifiers fire
    /// as well.  Events come back in firing order: fuses first (slot
    /// order), then notifiers, then daemons.
    pub fn advance_turn(&mut self, count: u16, run_schedules: bool) -> Vec<FireEvent> {
        let mut fired = Vec::new();
        self.turn_count += count as u32;

        for slot in self.fuses.iter_mut() {
            if let Some(rec) = slot {
                if rec.time <= count {
                    fired.push(FireEvent {
                        kind: SchedKind::Fuse,
                        target: rec.target,
                        prop: rec.prop,
                        arg: rec.arg.clone(),
                    });
                    *slot = None;
                } else {
                    rec.time -= count;
                }
            }
        }

        for slot in self.notifiers.iter_mut() {
            if let Some(rec) = slot {
                if rec.time == SCHED_EACH_TURN {
                    if run_schedules {
                        fired.push(FireEvent {
                            kind: SchedKind::Notifier,
                            target: rec.target,
                            prop: rec.prop,
                            arg: rec.arg.clone(),
                        });
                    }
                } else if rec.time <= count {
                    fired.push(FireEvent {
                        kind: SchedKind::Notifier,
                        target: rec.target,
                        prop: rec.prop,
                        arg: rec.arg.clone(),
                    });
                    *slot = None;
                } else {
                    rec.time -= count;
                }
            }
        }

        if run_schedules {
            for rec in self.daemons.iter().flatten() {
                fired.push(FireEvent {
                    kind: SchedKind::Daemon,
                    target: rec.target,
                    prop: rec.prop,
                    arg: rec.arg.clone(),
                });
            }
        }

        if !fired.is_empty() {
            debug!("turn {}: {} scheduled callbacks due", self.turn_count, fired.len());
        }
        fired
    }

    pub fn clear_schedules(&mut self) {
        self.fuses = new_sched_table();
        self.daemons = new_sched_table();
        self.notifiers = new_sched_table();
    }

    // -- pronouns and Me --------------------------------------------------

    pub fn set_me(&mut self, obj: ObjNum) {
        self.me = obj;
    }

    pub fn clear_pronouns(&mut self) {
        self.it = OBJ_INVALID;
        self.him = OBJ_INVALID;
        self.her = OBJ_INVALID;
        self.them.clear();
    }
}

fn new_sched_table() -> Vec<Option<SchedRec>> {
    let mut v = Vec::with_capacity(SCHED_SLOTS);
    v.resize_with(SCHED_SLOTS, || None);
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_add_lookup_delete() {
        let mut voc = VocabCtx::new();
        let key = WordKey::one(b"lamp");
        voc.add_word(key.clone(), 10, PRP_NOUN, 0);
        voc.add_word(WordKey::one(b"brass"), 10, PRP_ADJ, 0);
        assert_eq!(voc.objects_for(&key, PRP_NOUN), vec![10]);
        assert_eq!(voc.word_types(&key), VOCT_NOUN);

        // static word: deletion marks, lookup hides it
        assert_eq!(voc.del_word(&key, 10, PRP_NOUN), Some(0));
        assert!(voc.objects_for(&key, PRP_NOUN).is_empty());
        // the marked binding is still there for the save file
        let mut seen = 0;
        voc.for_each_word(|k, b| {
            if *k == key && b.flags & VOCF_DEL != 0 {
                seen += 1;
            }
        });
        assert_eq!(seen, 1);

        // deleting again reports not-found
        assert_eq!(voc.del_word(&key, 10, PRP_NOUN), None);

        // re-adding clears the mark
        voc.add_word(key.clone(), 10, PRP_NOUN, 0);
        assert_eq!(voc.objects_for(&key, PRP_NOUN), vec![10]);
    }

    #[test]
    fn runtime_words_removed_physically() {
        let mut voc = VocabCtx::new();
        let key = WordKey::one(b"rune");
        voc.add_word(key.clone(), 4, PRP_NOUN, VOCF_NEW);
        assert_eq!(voc.del_word(&key, 4, PRP_NOUN), Some(VOCF_NEW));
        let mut any = false;
        voc.for_each_word(|k, _| any |= *k == key);
        assert!(!any);
    }

    #[test]
    fn isclass_walks_transitively() {
        let mut voc = VocabCtx::new();
        // A(1) -> B(2) -> C(3); D(4) unrelated
        voc.add_inh(1, 0, vec![2], OBJ_INVALID);
        voc.add_inh(2, VOCIF_CLASS, vec![3], OBJ_INVALID);
        voc.add_inh(3, VOCIF_CLASS, vec![], OBJ_INVALID);
        voc.add_inh(4, VOCIF_CLASS, vec![], OBJ_INVALID);
        assert!(voc.is_class(1, 2));
        assert!(voc.is_class(1, 3));
        assert!(!voc.is_class(1, 4));
        assert_eq!(voc.first_superclass(1), Some(2));
        assert_eq!(voc.first_superclass(3), None);
    }

    #[test]
    fn isclass_survives_cycles() {
        let mut voc = VocabCtx::new();
        voc.add_inh(1, 0, vec![2], OBJ_INVALID);
        voc.add_inh(2, VOCIF_CLASS, vec![1], OBJ_INVALID);
        assert!(!voc.is_class(1, 99));
        assert!(voc.is_class(1, 2));
    }

    #[test]
    fn iteration_wraps_sparse_pages() {
        let mut voc = VocabCtx::new();
        // first page: objects only in the low half; next allocated object
        // lives several pages later
        voc.add_inh(3, 0, vec![], OBJ_INVALID);
        voc.add_inh(100, 0, vec![], OBJ_INVALID);
        voc.add_inh(0x0305, 0, vec![], OBJ_INVALID);
        voc.add_inh(0x0390, VOCIF_CLASS, vec![], OBJ_INVALID);
        voc.add_inh(0x0401, 0, vec![], OBJ_INVALID);

        let mut seen = Vec::new();
        let mut cur = voc.first_obj(None);
        while let Some(obj) = cur {
            seen.push(obj);
            cur = voc.next_obj(obj, None);
        }
        assert_eq!(seen, vec![3, 100, 0x0305, 0x0401]);
    }

    #[test]
    fn iteration_filters_by_class() {
        let mut voc = VocabCtx::new();
        voc.add_inh(9, VOCIF_CLASS, vec![], OBJ_INVALID);
        voc.add_inh(10, 0, vec![9], OBJ_INVALID);
        voc.add_inh(11, 0, vec![], OBJ_INVALID);
        voc.add_inh(0x0102, 0, vec![9], OBJ_INVALID);
        assert_eq!(voc.first_obj(Some(9)), Some(10));
        assert_eq!(voc.next_obj(10, Some(9)), Some(0x0102));
        assert_eq!(voc.next_obj(0x0102, Some(9)), None);
    }

    #[test]
    fn sched_overwrites_identical_entry() {
        let mut voc = VocabCtx::new();
        let a = voc
            .set_sched(SchedKind::Fuse, 5, 0, 3, Value::Nil)
            .unwrap();
        let b = voc
            .set_sched(SchedKind::Fuse, 5, 0, 7, Value::Nil)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(voc.fuse_time(5, &Value::Nil), Some(7));
        // a different argument is a different fuse
        voc.set_sched(SchedKind::Fuse, 5, 0, 2, Value::Number(1))
            .unwrap();
        assert_eq!(voc.fuse_time(5, &Value::Number(1)), Some(2));
    }

    #[test]
    fn sched_table_full_is_error() {
        let mut voc = VocabCtx::new();
        for i in 0..SCHED_SLOTS {
            voc.set_sched(SchedKind::Daemon, i as u16, 0, 0, Value::Nil)
                .unwrap();
        }
        assert!(voc
            .set_sched(SchedKind::Daemon, 9999, 0, 0, Value::Nil)
            .is_err());
        // removal of something absent is the expected not-found condition
        assert!(voc
            .rem_sched(SchedKind::Daemon, 12345, 0, &Value::Nil)
            .is_err());
    }

    #[test]
    fn fuse_counts_down_and_fires_once() {
        let mut voc = VocabCtx::new();
        voc.set_sched(SchedKind::Fuse, 7, 0, 3, Value::Number(42))
            .unwrap();
        assert!(voc.advance_turn(1, true).is_empty());
        assert!(voc.advance_turn(1, true).is_empty());
        let fired = voc.advance_turn(1, true);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, SchedKind::Fuse);
        assert_eq!(fired[0].target, 7);
        assert_eq!(fired[0].arg, Value::Number(42));
        // the slot is empty; a fourth turn does not refire
        assert!(voc.advance_turn(1, true).is_empty());
    }

    #[test]
    fn daemons_and_each_turn_notifiers() {
        let mut voc = VocabCtx::new();
        voc.set_sched(SchedKind::Daemon, 1, 0, 0, Value::Nil).unwrap();
        voc.set_sched(SchedKind::Notifier, 2, 30, SCHED_EACH_TURN, Value::Nil)
            .unwrap();
        voc.set_sched(SchedKind::Notifier, 3, 31, 2, Value::Nil).unwrap();

        let fired = voc.advance_turn(1, true);
        assert_eq!(fired.len(), 2); // each-turn notifier + daemon
        // skipping schedules silences daemons and each-turn notifiers but
        // still burns countdowns
        let fired = voc.advance_turn(1, false);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].target, 3);
        // every-turn notifier never expires
        assert!(voc.notifier_time(2, 30).is_some());
    }

    #[test]
    fn fuses_fire_before_daemons() {
        let mut voc = VocabCtx::new();
        voc.set_sched(SchedKind::Daemon, 1, 0, 0, Value::Nil).unwrap();
        voc.set_sched(SchedKind::Fuse, 2, 0, 1, Value::Nil).unwrap();
        let fired = voc.advance_turn(1, true);
        assert_eq!(fired[0].kind, SchedKind::Fuse);
        assert_eq!(fired[1].kind, SchedKind::Daemon);
    }
}
