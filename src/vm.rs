//! The session: one running game instance.
//!
//! Everything that was process-global in older interpreters of this era -
//! character tables, open file slots, the capture buffer, the command
//! state - lives here as an explicit field, created at session start and
//! torn down with it.  The session also drives the per-turn state machine:
//! read a command, tokenize, parse, disambiguate, execute, then advance
//! the schedule tables, taking an undo savepoint at the top of each turn.

use std::fs::File;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::bif;
use crate::charmap::CharMap;
use crate::config::Config;
use crate::errors::{RestoreCode, TadsError};
use crate::gamefile::{self, LoadedGame};
use crate::hostifc::{HostIfc, IoSafety, NullHost};
use crate::objcache::ObjectCache;
use crate::object::{self, PropVal};
use crate::opcode::Instruction;
use crate::output::{OutputCtx, StdSink, TextSink};
use crate::parser::{self, Resolution};
use crate::run::{RunCtx, StackVal};
use crate::tokenizer::{self, Token, VOCW_THEN};
use crate::value::{ObjNum, PropNum, Value, OBJ_INVALID};
use crate::vocab::{SchedKind, VocabCtx, VocabUndo, PRP_ACTION};

/// Open-file slots available to scripts; the slot number is the script's
/// file handle, and the bound is part of the script-visible contract.
pub const FILE_SLOTS: usize = 10;

pub struct OpenFile {
    pub file: File,
    pub binary: bool,
}

/// Objects of the command currently executing (parserGetObj's view).
#[derive(Debug, Clone, Copy)]
pub struct CmdState {
    pub actor: ObjNum,
    pub verb: ObjNum,
    pub dobj: ObjNum,
    pub prep: ObjNum,
    pub iobj: ObjNum,
}

impl Default for CmdState {
    fn default() -> Self {
        CmdState {
            actor: OBJ_INVALID,
            verb: OBJ_INVALID,
            dobj: OBJ_INVALID,
            prep: OBJ_INVALID,
            iobj: OBJ_INVALID,
        }
    }
}

pub struct Session {
    pub config: Config,
    pub cache: ObjectCache,
    pub voc: VocabCtx,
    pub run: RunCtx,
    pub out: OutputCtx,
    pub files: Vec<Option<OpenFile>>,
    pub charmap: CharMap,
    pub safety: IoSafety,
    pub host: Box<dyn HostIfc>,
    pub game: Option<LoadedGame>,
    pub cmd: CmdState,
    pub score: (i32, i32),
    /// Set when the rest of the input line must be dropped (undo/restore).
    pub clear_command: bool,
    /// Capture groups from the last reSearch.
    pub re_groups: Vec<Vec<u8>>,
}

impl Session {
    pub fn new(config: Config, sink: Box<dyn TextSink>, host: Box<dyn HostIfc>) -> Self {
        let mut files = Vec::with_capacity(FILE_SLOTS);
        files.resize_with(FILE_SLOTS, || None);
        let safety = IoSafety {
            read_level: config.safety_read,
            write_level: config.safety_write,
        };
        Session {
            cache: ObjectCache::new(config.cache_budget, config.undo_depth),
            config,
            voc: VocabCtx::new(),
            run: RunCtx::new(),
            out: OutputCtx::new(sink),
            files,
            charmap: CharMap::identity(),
            safety,
            host,
            game: None,
            cmd: CmdState::default(),
            score: (0, 0),
            clear_command: false,
            re_groups: Vec::new(),
        }
    }

    /// A session wired to stdin/stdout with default config and no host.
    pub fn standard() -> Self {
        Session::new(
            Config::default(),
            Box::new(StdSink),
            Box::<NullHost>::default(),
        )
    }

    /// Install the default (identity) character mapping, or the configured
    /// map if one is named.  Re-initialization on an explicit override is
    /// allowed at any time.
    pub fn init_character_map(&mut self) {
        self.charmap = CharMap::identity();
        if let Some(path) = self.config.charmap.clone() {
            match CharMap::load(Path::new(&path)) {
                Ok(map) => {
                    info!("loaded character map {path}");
                    self.charmap = map;
                }
                Err(e) => warn!("character map {path} not usable: {e}"),
            }
        }
    }

    /// Load a game image and run its preinit hook.
    pub fn load_game(&mut self, path: &Path) -> Result<(), TadsError> {
        if let Some((read, write)) = self.host.io_safety_override() {
            self.safety = IoSafety {
                read_level: read,
                write_level: write,
            };
        }
        let game = gamefile::load_game(path, &mut self.cache, &mut self.voc, self.host.as_mut())?;
        self.game = Some(game);
        if self.config.run_preinit {
            self.run_preinit()?;
        }
        Ok(())
    }

    pub fn game_dir(&self) -> PathBuf {
        self.game
            .as_ref()
            .map(|g| g.dir.clone())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn game_path_str(&self) -> Option<String> {
        self.game
            .as_ref()
            .and_then(|g| g.path.to_str().map(str::to_owned))
    }

    fn run_preinit(&mut self) -> Result<(), TadsError> {
        let preinit = self.game.as_ref().map(|g| g.preinit).unwrap_or(OBJ_INVALID);
        if preinit != OBJ_INVALID {
            debug!("running preinit function {preinit}");
            self.call_function(preinit, 0)?;
            self.run.discard()?;
        }
        Ok(())
    }

    // -- bytecode execution ----------------------------------------------

    /// Call a function object with `argc` arguments already pushed.
    /// Leaves the return value on the stack.
    pub fn call_function(&mut self, func: ObjNum, argc: usize) -> Result<(), TadsError> {
        let code = {
            let guard = self.cache.lock(func)?;
            guard.bytes().to_vec()
        };
        self.execute_code(&code, OBJ_INVALID, argc)
    }

    /// Evaluate `obj.prop` with `argc` arguments already pushed, walking
    /// the inheritance graph.  Data properties discard the arguments and
    /// push the value; code properties run as a method of `obj`;
    /// double-quoted strings print and push true.  An undefined property
    /// evaluates to nil.
    pub fn eval_prop(&mut self, obj: ObjNum, prop: PropNum, argc: usize) -> Result<(), TadsError> {
        let found = object::find_prop_inherited(&mut self.cache, obj, prop)?;
        match found {
            Some((_, PropVal::Code(code))) => self.execute_code(&code, obj, argc),
            other => {
                for _ in 0..argc {
                    self.run.discard()?;
                }
                match other {
                    Some((_, PropVal::Data(val))) => self.run.push_value(&val),
                    Some((_, PropVal::SelfPrint(text))) => {
                        self.print_game_str(&text)?;
                        self.run.push(StackVal::True)
                    }
                    _ => self.run.push(StackVal::Nil),
                }
            }
        }
    }

    /// Call whatever a scheduled-callback target is: a function address or
    /// an object/property pair.
    pub fn call_target(
        &mut self,
        target: ObjNum,
        prop: PropNum,
        argc: usize,
    ) -> Result<(), TadsError> {
        if prop == 0 {
            self.call_function(target, argc)
        } else {
            self.eval_prop(target, prop, argc)
        }
    }

    /// The dispatch loop.  `code` is a function payload: local count, then
    /// instructions.
    pub fn execute_code(
        &mut self,
        code: &[u8],
        self_obj: ObjNum,
        argc: usize,
    ) -> Result<(), TadsError> {
        let locals = *code.first().ok_or(TadsError::BadOpcode(0))?;
        self.run.enter_frame(self_obj, argc, locals)?;
        let result = self.execute_frame(code);
        match result {
            Ok(ret) => {
                self.run.leave_frame();
                self.run.push(ret)?;
                Ok(())
            }
            Err(e) => {
                // unwind this frame on the way out
                self.run.leave_frame();
                Err(e)
            }
        }
    }

    fn execute_frame(&mut self, code: &[u8]) -> Result<StackVal, TadsError> {
        let mut pc = 1usize;
        loop {
            let (insn, next) = Instruction::decode(code, pc)?;
            pc = next;
            match insn {
                Instruction::PushNum(n) => self.run.push_num(n)?,
                Instruction::PushObj(o) => self.run.push(StackVal::Object(o))?,
                Instruction::PushStr(text) => self.run.push_str_bytes(&text)?,
                Instruction::PushList(body) => self.run.push_list_wire(&body)?,
                Instruction::PushNil => self.run.push(StackVal::Nil)?,
                Instruction::PushTrue => self.run.push(StackVal::True)?,
                Instruction::PushFn(f) => self.run.push(StackVal::FnAddr(f))?,
                Instruction::PushProp(p) => self.run.push(StackVal::PropNum(p))?,
                Instruction::PushSelf => {
                    let s = self.run.frame().map(|f| f.self_obj).unwrap_or(OBJ_INVALID);
                    self.run.push_obj(s)?;
                }
                Instruction::GetLocal(i) => {
                    let frame = self.run.frame().ok_or(TadsError::StackUnderflow)?;
                    let val = *frame
                        .locals
                        .get(i as usize)
                        .ok_or(TadsError::BadOpcode(0x0a))?;
                    self.run.push(val)?;
                }
                Instruction::SetLocal(i) => {
                    let val = self.run.pop()?;
                    let frame = self
                        .run
                        .frames
                        .last_mut()
                        .ok_or(TadsError::StackUnderflow)?;
                    let slot = frame
                        .locals
                        .get_mut(i as usize)
                        .ok_or(TadsError::BadOpcode(0x0b))?;
                    *slot = val;
                }
                Instruction::Discard => self.run.discard()?,
                Instruction::Add => self.binary_num_op(|a, b| a.wrapping_add(b))?,
                Instruction::Sub => self.binary_num_op(|a, b| a.wrapping_sub(b))?,
                Instruction::Mul => self.binary_num_op(|a, b| a.wrapping_mul(b))?,
                Instruction::Div => {
                    let b = self.run.pop_num()?;
                    let a = self.run.pop_num()?;
                    if b == 0 {
                        return Err(TadsError::BifArgValue("/"));
                    }
                    self.run.push_num(a.wrapping_div(b))?;
                }
                Instruction::Mod => {
                    let b = self.run.pop_num()?;
                    let a = self.run.pop_num()?;
                    if b == 0 {
                        return Err(TadsError::BifArgValue("%"));
                    }
                    self.run.push_num(a.wrapping_rem(b))?;
                }
                Instruction::Neg => {
                    let a = self.run.pop_num()?;
                    self.run.push_num(a.wrapping_neg())?;
                }
                Instruction::Eq => {
                    let b = self.run.pop()?;
                    let a = self.run.pop()?;
                    let eq = self.run.vals_equal(&a, &b)?;
                    self.run.push_logical(eq)?;
                }
                Instruction::Ne => {
                    let b = self.run.pop()?;
                    let a = self.run.pop()?;
                    let eq = self.run.vals_equal(&a, &b)?;
                    self.run.push_logical(!eq)?;
                }
                Instruction::Lt => self.compare_op(|o| o.is_lt())?,
                Instruction::Le => self.compare_op(|o| o.is_le())?,
                Instruction::Gt => self.compare_op(|o| o.is_gt())?,
                Instruction::Ge => self.compare_op(|o| o.is_ge())?,
                Instruction::Not => {
                    let v = self.run.pop()?;
                    let logical = v.is_logical_true();
                    self.run.push_logical(!logical)?;
                }
                Instruction::Jmp(ofs) => pc = jump(pc, ofs, code)?,
                Instruction::Jt(ofs) => {
                    if self.run.pop()?.is_logical_true() {
                        pc = jump(pc, ofs, code)?;
                    }
                }
                Instruction::Jf(ofs) => {
                    if !self.run.pop()?.is_logical_true() {
                        pc = jump(pc, ofs, code)?;
                    }
                }
                Instruction::Builtin { argc, index } => {
                    bif::dispatch(self, index, argc as usize)?;
                }
                Instruction::Call { argc, target } => {
                    self.call_function(target, argc as usize)?;
                }
                Instruction::GetProp { argc, prop } => {
                    let obj = self.run.pop_obj()?;
                    self.eval_prop(obj, prop, argc as usize)?;
                }
                Instruction::SetProp(prop) => {
                    let obj = self.run.pop_obj()?;
                    let val = self.run.pop_value()?;
                    self.cache.set_prop(obj, prop, &val)?;
                }
                Instruction::Say(text) => {
                    self.print_game_str(&text)?;
                }
                Instruction::Ret => return Ok(StackVal::Nil),
                Instruction::RetVal => return self.run.pop(),
            }
        }
    }

    fn binary_num_op(&mut self, f: impl Fn(i32, i32) -> i32) -> Result<(), TadsError> {
        let b = self.run.pop_num()?;
        let a = self.run.pop_num()?;
        self.run.push_num(f(a, b))
    }

    fn compare_op(&mut self, f: impl Fn(std::cmp::Ordering) -> bool) -> Result<(), TadsError> {
        let b = self.run.pop_num()?;
        let a = self.run.pop_num()?;
        self.run.push_logical(f(a.cmp(&b)))
    }

    // -- output -----------------------------------------------------------

    /// Print game text: translate escapes and the character map, then hand
    /// off through capture/hiding.
    pub fn print_game_str(&mut self, text: &[u8]) -> Result<(), TadsError> {
        let expanded = expand_escapes(text);
        let native = self.charmap.to_native(&expanded);
        self.out.print(&mut self.cache, &native)
    }

    pub fn print_plain(&mut self, text: &[u8]) -> Result<(), TadsError> {
        self.out.print(&mut self.cache, text)
    }

    // -- turn machinery ---------------------------------------------------

    /// Advance the game clock, firing due fuses, notifiers, and daemons.
    pub fn advance_turn(&mut self, count: u16, run_schedules: bool) -> Result<(), TadsError> {
        let events = self.voc.advance_turn(count, run_schedules);
        for ev in events {
            let argc = if ev.prop == 0 {
                self.run.push_value(&ev.arg)?;
                1
            } else {
                0
            };
            self.call_target(ev.target, ev.prop, argc)?;
            self.run.discard()?;
        }
        Ok(())
    }

    /// One full input line: tokenize, split into commands at THEN tokens,
    /// run each.
    pub fn run_command_line(&mut self, line: &[u8]) -> Result<(), TadsError> {
        let internal = self.charmap.to_internal(line);
        let tokens = match tokenizer::tokenize(&self.voc, &internal, false) {
            Ok(t) => t,
            Err(ch) => {
                let msg = format!("I don't understand the punctuation \"{}\".\n", ch as char);
                self.print_plain(msg.as_bytes())?;
                return Ok(());
            }
        };

        self.clear_command = false;
        for chunk in tokens.split(|t| t.special_code() == Some(VOCW_THEN)) {
            if chunk.is_empty() {
                continue;
            }
            self.cache.savepoint();
            match self.execute_command(chunk) {
                Ok(()) => {}
                Err(e) if e == TadsError::ExitObj || e == TadsError::AbortCommand => {
                    debug!("command abandoned: {e}");
                }
                Err(e) => return Err(e),
            }
            self.advance_turn(1, true)?;
            if self.clear_command {
                break;
            }
        }
        Ok(())
    }

    fn execute_command(&mut self, tokens: &[Token]) -> Result<(), TadsError> {
        let Some(parsed) = parser::parse_command(&self.voc, tokens) else {
            self.print_plain(b"There's no verb in that sentence.\n")?;
            return Ok(());
        };

        let dobj = match resolve_phrase(&parsed.dobj) {
            Ok(o) => o,
            Err(msg) => {
                self.print_plain(msg.as_bytes())?;
                return Ok(());
            }
        };
        let iobj = match resolve_phrase(&parsed.iobj) {
            Ok(o) => o,
            Err(msg) => {
                self.print_plain(msg.as_bytes())?;
                return Ok(());
            }
        };

        let verb = parsed.verb_objs.first().copied().unwrap_or(OBJ_INVALID);
        let prep = parsed.prep_objs.first().copied().unwrap_or(OBJ_INVALID);
        self.exec_parsed(self.voc.me, verb, dobj, prep, iobj)?;

        // bind pronouns to what the command touched
        if dobj != OBJ_INVALID {
            self.voc.it = dobj;
        }
        Ok(())
    }

    /// Execute a resolved command: evaluate the verb object's action with
    /// the direct and indirect objects as arguments.  Returns 0 on
    /// success, nonzero when the verb cannot run.
    pub fn exec_parsed(
        &mut self,
        actor: ObjNum,
        verb: ObjNum,
        dobj: ObjNum,
        prep: ObjNum,
        iobj: ObjNum,
    ) -> Result<i32, TadsError> {
        if verb == OBJ_INVALID {
            self.print_plain(b"I don't know that verb.\n")?;
            return Ok(1);
        }
        let saved = self.cmd;
        self.cmd = CmdState {
            actor,
            verb,
            dobj,
            prep,
            iobj,
        };
        // arguments: last pushed first, so dobj ends up as argument 1
        self.run.push_obj(iobj)?;
        self.run.push_obj(dobj)?;
        let result = self.eval_prop(verb, PRP_ACTION, 2);
        self.cmd = saved;
        result?;
        self.run.discard()?;
        Ok(0)
    }

    /// The interactive loop: prompt, read, execute, repeat until quit.
    pub fn command_loop(&mut self) -> Result<(), TadsError> {
        loop {
            self.print_plain(b"\n>")?;
            self.out.sink.flush();
            let Some(line) = self.out.sink.read_line() else {
                return Ok(());
            };
            match self.run_command_line(&line) {
                Ok(()) => {}
                Err(TadsError::Quit) => return Ok(()),
                Err(TadsError::Restart) => self.restart()?,
                Err(e) if e.is_control_flow() => {}
                Err(e) => {
                    let msg = format!("[runtime error: {e}]\n");
                    self.print_plain(msg.as_bytes())?;
                }
            }
        }
    }

    // -- restart / undo / persistence ------------------------------------

    /// Revert the world to its post-compilation state and re-run preinit.
    pub fn restart(&mut self) -> Result<(), TadsError> {
        info!("restarting");
        self.cache.revert_all();
        self.voc.revert_words();
        self.voc.revert_inh();
        self.voc.clear_schedules();
        self.voc.clear_pronouns();
        self.voc.me = self.voc.me_init;
        self.voc.turn_count = 0;
        self.run.reset();
        self.score = (0, 0);
        self.run_preinit()
    }

    /// Roll back to the previous savepoint.  The two "nothing to undo"
    /// kinds surface as Ok(false); anything else propagates.
    pub fn undo(&mut self) -> Result<bool, TadsError> {
        let records = match self.cache.undo() {
            Ok(r) => r,
            Err(TadsError::NoUndo) | Err(TadsError::IncompleteUndo) => return Ok(false),
            Err(e) => return Err(e),
        };
        for rec in records {
            match rec {
                VocabUndo::AddedWord { key, obj, pos } => {
                    self.voc.del_word_raw(&key, obj, pos);
                }
                VocabUndo::DeletedWord {
                    key,
                    obj,
                    pos,
                    flags,
                } => {
                    self.voc.restore_word(key, obj, pos, flags);
                }
                VocabUndo::SetMe { old } => self.voc.me = old,
            }
        }
        self.clear_command = true;
        Ok(true)
    }

    pub fn save(&mut self, path: &Path) -> bool {
        let name = self.game_path_str();
        crate::savefile::save_game(path, &mut self.cache, &self.voc, name.as_deref())
    }

    pub fn restore(&mut self, path: &Path) -> RestoreCode {
        let code = crate::savefile::restore_game(path, &mut self.cache, &mut self.voc);
        if code.is_success() {
            self.clear_command = true;
        }
        code
    }

    // -- schedules --------------------------------------------------------

    /// Run all expired fuses immediately (the runfuses built-in); true if
    /// any fired.
    pub fn run_fuses(&mut self) -> Result<bool, TadsError> {
        let events = self.voc.advance_turn(0, false);
        let any = !events.is_empty();
        for ev in events {
            let argc = if ev.prop == 0 {
                self.run.push_value(&ev.arg)?;
                1
            } else {
                0
            };
            self.call_target(ev.target, ev.prop, argc)?;
            self.run.discard()?;
        }
        Ok(any)
    }

    /// Run every daemon and every-turn notifier once (the rundaemons
    /// built-in).
    pub fn run_daemons(&mut self) -> Result<(), TadsError> {
        let daemons: Vec<_> = self.voc.daemons.iter().flatten().cloned().collect();
        let each_turn: Vec<_> = self
            .voc
            .notifiers
            .iter()
            .flatten()
            .filter(|r| r.time == crate::vocab::SCHED_EACH_TURN)
            .cloned()
            .collect();
        for rec in daemons.into_iter().chain(each_turn) {
            let argc = if rec.prop == 0 {
                self.run.push_value(&rec.arg)?;
                1
            } else {
                0
            };
            self.call_target(rec.target, rec.prop, argc)?;
            self.run.discard()?;
        }
        Ok(())
    }

    /// Schedule-table insert on behalf of a built-in, translating the
    /// table-full condition to the per-kind error code.
    pub fn set_sched(
        &mut self,
        kind: SchedKind,
        target: ObjNum,
        prop: PropNum,
        time: u16,
        arg: Value,
    ) -> Result<(), TadsError> {
        self.voc
            .set_sched(kind, target, prop, time, arg)
            .map(|_| ())
            .map_err(|_| match kind {
                SchedKind::Fuse => TadsError::ManyFuses,
                SchedKind::Daemon => TadsError::ManyDaemons,
                SchedKind::Notifier => TadsError::ManyNotifiers,
            })
    }
}

fn jump(pc: usize, ofs: i16, code: &[u8]) -> Result<usize, TadsError> {
    let target = pc as i64 + ofs as i64;
    if target < 1 || target as usize > code.len() {
        return Err(TadsError::BadOpcode(0x20));
    }
    Ok(target as usize)
}

fn resolve_phrase(phrase: &Option<parser::NounPhrase>) -> Result<ObjNum, String> {
    match phrase {
        None => Ok(OBJ_INVALID),
        Some(np) => match &np.objects {
            Resolution::Unique(obj) => Ok(*obj),
            // first-found policy: an ambiguous phrase takes the first
            // match rather than interrogating the player here
            Resolution::Ambiguous(list) => Ok(list[0]),
            Resolution::Unknown(word) => Err(format!(
                "I don't know the word \"{}\".\n",
                String::from_utf8_lossy(word)
            )),
            Resolution::NoMatch => Err("I don't see that here.\n".to_string()),
        },
    }
}

/// Translate the compiler's string escapes into output text.
fn expand_escapes(text: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut iter = text.iter().copied().peekable();
    while let Some(c) = iter.next() {
        if c != b'\\' {
            out.push(c);
            continue;
        }
        match iter.next() {
            Some(b'n') => out.push(b'\n'),
            Some(b't') => out.push(b'\t'),
            Some(other) => out.push(other),
            None => out.push(b'\\'),
        }
    }
    out
}
