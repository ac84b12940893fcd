//! Vocabulary, pronoun, schedule, and parser built-ins.

use crate::bif::{check_argc, check_top, pop_num_checked};
use crate::errors::TadsError;
use crate::parser;
use crate::run::StackVal;
use crate::tokenizer;
use crate::value::{ObjNum, Value, DAT_FNADDR, DAT_LIST, DAT_NIL, DAT_SSTRING, OBJ_INVALID};
use crate::vm::Session;
use crate::vocab::{
    is_pos_prop, SchedKind, VocabUndo, WordKey, SCHED_EACH_TURN, VOCF_CLASS, VOCF_NEW, VOCIF_CLASS,
    PRP_TPL,
};

/// Bound on the "them" pronoun list.
const THEM_MAX: usize = 200;

/// setit(obj) / setit(list) / setit(code, obj): bind "it", "them", or with
/// the two-argument form "it"/"him"/"her" by code.
pub fn setit(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    if argc == 2 {
        let obj = match sess.run.top_type()? {
            DAT_NIL => {
                sess.run.discard()?;
                OBJ_INVALID
            }
            _ => sess.run.pop_obj()?,
        };
        let code = pop_num_checked(sess, "setit")?;
        sess.voc.them.clear();
        match code {
            0 => sess.voc.it = obj,
            1 => sess.voc.him = obj,
            2 => sess.voc.her = obj,
            _ => return Err(TadsError::BifArgValue("setit")),
        }
        return sess.run.push(StackVal::Nil);
    }

    check_argc(argc, 1)?;
    match sess.run.top_type()? {
        DAT_LIST => {
            let items = sess.run.pop_list_items()?;
            let mut them = Vec::new();
            for item in items {
                if let Value::Object(o) = item {
                    if them.len() < THEM_MAX {
                        them.push(o);
                    }
                }
            }
            sess.voc.them = them;
            sess.voc.it = OBJ_INVALID;
        }
        DAT_NIL => {
            sess.run.discard()?;
            sess.voc.it = OBJ_INVALID;
            sess.voc.them.clear();
        }
        _ => {
            let obj = sess.run.pop_obj()?;
            sess.voc.it = obj;
            sess.voc.them.clear();
        }
    }
    sess.run.push(StackVal::Nil)
}

// -- schedule builtins ----------------------------------------------------

/// setfuse(fn, turns, arg).
pub fn setfuse(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 3)?;
    let func = sess.run.pop_fn()?;
    let turns = pop_num_checked(sess, "setfuse")?;
    let arg = sess.run.pop_value()?;
    if matches!(arg, Value::Str(_) | Value::List(_)) {
        return Err(TadsError::SchedArgValue);
    }
    sess.set_sched(SchedKind::Fuse, func, 0, turns as u16, arg)?;
    sess.run.push(StackVal::Nil)
}

/// remfuse(fn, arg): removing an unknown fuse is an expected condition and
/// comes back as nil rather than a signal.
pub fn remfuse(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 2)?;
    let func = sess.run.pop_fn()?;
    let arg = sess.run.pop_value()?;
    let found = sess.voc.rem_sched(SchedKind::Fuse, func, 0, &arg).is_ok();
    sess.run.push_logical(found)
}

/// setdaemon(fn, arg).
pub fn setdaemon(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 2)?;
    let func = sess.run.pop_fn()?;
    let arg = sess.run.pop_value()?;
    if matches!(arg, Value::Str(_) | Value::List(_)) {
        return Err(TadsError::SchedArgValue);
    }
    sess.set_sched(SchedKind::Daemon, func, 0, 0, arg)?;
    sess.run.push(StackVal::Nil)
}

pub fn remdaemon(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 2)?;
    let func = sess.run.pop_fn()?;
    let arg = sess.run.pop_value()?;
    let found = sess.voc.rem_sched(SchedKind::Daemon, func, 0, &arg).is_ok();
    sess.run.push_logical(found)
}

/// notify(obj, &prop, turns): turns of zero means every turn.
pub fn notify(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 3)?;
    let obj = sess.run.pop_obj()?;
    let prop = sess.run.pop_prop()?;
    let turns = pop_num_checked(sess, "notify")?;
    let time = if turns == 0 {
        SCHED_EACH_TURN
    } else {
        turns as u16
    };
    sess.set_sched(SchedKind::Notifier, obj, prop, time, Value::Nil)?;
    sess.run.push(StackVal::Nil)
}

pub fn unnotify(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 2)?;
    let obj = sess.run.pop_obj()?;
    let prop = sess.run.pop_prop()?;
    let found = sess
        .voc
        .rem_sched(SchedKind::Notifier, obj, prop, &Value::Nil)
        .is_ok();
    sess.run.push_logical(found)
}

/// getfuse(fn, arg) or getfuse(obj, &prop): remaining turns, or nil.
pub fn getfuse(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 2)?;
    if sess.run.top_type()? == DAT_FNADDR {
        let func = sess.run.pop_fn()?;
        let arg = sess.run.pop_value()?;
        match sess.voc.fuse_time(func, &arg) {
            Some(t) => sess.run.push_num(t as i32),
            None => sess.run.push(StackVal::Nil),
        }
    } else {
        let obj = sess.run.pop_obj()?;
        let prop = sess.run.pop_prop()?;
        match sess.voc.notifier_time(obj, prop) {
            Some(t) => sess.run.push_num(t as i32),
            None => sess.run.push(StackVal::Nil),
        }
    }
}

pub fn runfuses(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 0)?;
    let any = sess.run_fuses()?;
    sess.run.push_logical(any)
}

pub fn rundaemons(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 0)?;
    sess.run_daemons()?;
    sess.run.push(StackVal::Nil)
}

/// incturn([turns]): advance the clock, firing what comes due.
pub fn incturn(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    let turns = match argc {
        0 => 1,
        1 => {
            let t = pop_num_checked(sess, "incturn")?;
            if t < 1 {
                return Err(TadsError::BifArgValue("incturn"));
            }
            t
        }
        _ => return Err(TadsError::BifArgCount),
    };
    sess.advance_turn(turns as u16, true)?;
    sess.run.push(StackVal::Nil)
}

/// skipturn(turns): burn the clock without running daemons.
pub fn skipturn(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    let turns = pop_num_checked(sess, "skipturn")?;
    if turns < 1 {
        return Err(TadsError::BifArgValue("skipturn"));
    }
    sess.advance_turn(turns as u16, false)?;
    sess.run.push(StackVal::Nil)
}

// -- word builtins --------------------------------------------------------

/// addword(obj, &pos, word): add vocabulary at runtime, undoably.  The
/// part of speech must be one of the vocabulary properties.
pub fn addword(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 3)?;
    let obj = sess.run.pop_obj()?;
    let pos = sess.run.pop_prop()?;
    check_top(sess, DAT_SSTRING, "addword")?;
    let text = sess.run.pop_str_bytes()?;
    if !is_pos_prop(pos) {
        return Err(TadsError::BifArgValue("addword"));
    }

    let mut flags = VOCF_NEW;
    if sess
        .voc
        .inh(obj)
        .map(|r| r.flags & VOCIF_CLASS != 0)
        .unwrap_or(false)
    {
        flags |= VOCF_CLASS;
    }
    let key = word_key_from_text(&text);
    sess.voc.add_word(key.clone(), obj, pos, flags);
    sess.cache
        .push_vocab_undo(VocabUndo::AddedWord { key, obj, pos });
    sess.run.push(StackVal::Nil)
}

/// delword(obj, &pos, word): remove vocabulary, undoably; unknown words
/// are an expected condition.
pub fn delword(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 3)?;
    let obj = sess.run.pop_obj()?;
    let pos = sess.run.pop_prop()?;
    check_top(sess, DAT_SSTRING, "delword")?;
    let text = sess.run.pop_str_bytes()?;
    if !is_pos_prop(pos) {
        return Err(TadsError::BifArgValue("delword"));
    }

    let key = word_key_from_text(&text);
    match sess.voc.del_word(&key, obj, pos) {
        Some(flags) => {
            sess.cache.push_vocab_undo(VocabUndo::DeletedWord {
                key,
                obj,
                pos,
                flags,
            });
            sess.run.push(StackVal::True)
        }
        None => sess.run.push(StackVal::Nil),
    }
}

/// getwords(obj, &pos): the words bound to an object for a part of
/// speech, as a list of strings.
pub fn getwords(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 2)?;
    let obj = sess.run.pop_obj()?;
    let pos = sess.run.pop_prop()?;
    if !is_pos_prop(pos) {
        return Err(TadsError::BifArgValue("getwords"));
    }
    let words = sess.voc.words_for_object(obj, pos);
    let mut body = Vec::new();
    for w in words {
        Value::Str(w).encode_tagged(&mut body);
    }
    sess.run.push_list_wire(&body)
}

fn word_key_from_text(text: &[u8]) -> WordKey {
    match text.iter().position(|&c| c == b' ') {
        Some(at) => WordKey::two(&text[..at], &text[at + 1..]),
        None => WordKey::one(text),
    }
}

/// verbinfo(verb [, prep]): the verification/action properties from the
/// verb's template list, or nil if no template matches.
pub fn verbinfo(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    let verb = sess.run.pop_obj()?;
    let prep = match argc {
        1 => OBJ_INVALID,
        2 => sess.run.pop_obj()?,
        _ => return Err(TadsError::BifArgCount),
    };

    let Some(tpl) = find_template(sess, verb, prep)? else {
        return sess.run.push(StackVal::Nil);
    };

    let mut body = Vec::new();
    Value::PropNum(tpl.ver_do).encode_tagged(&mut body);
    if prep == OBJ_INVALID {
        Value::PropNum(tpl.do_prop).encode_tagged(&mut body);
    } else {
        Value::PropNum(tpl.ver_io).encode_tagged(&mut body);
        Value::PropNum(tpl.io_prop).encode_tagged(&mut body);
        if tpl.dobj_first {
            Value::True.encode_tagged(&mut body);
        } else {
            Value::Nil.encode_tagged(&mut body);
        }
    }
    sess.run.push_list_wire(&body)
}

struct Template {
    ver_do: u16,
    do_prop: u16,
    ver_io: u16,
    io_prop: u16,
    dobj_first: bool,
}

/// A verb's templates live in its template-list property: one sublist per
/// template, `[prep, verDo, do, verIo, io, dobjFirst]`.
fn find_template(
    sess: &mut Session,
    verb: ObjNum,
    prep: ObjNum,
) -> Result<Option<Template>, TadsError> {
    let Some(val) = sess.cache.get_prop_direct(verb, PRP_TPL)? else {
        return Ok(None);
    };
    let Value::List(entries) = val else {
        return Ok(None);
    };
    for entry in entries {
        let Value::List(fields) = entry else { continue };
        if fields.len() < 6 {
            continue;
        }
        let entry_prep = match &fields[0] {
            Value::Object(o) => *o,
            Value::Nil => OBJ_INVALID,
            _ => continue,
        };
        if entry_prep != prep {
            continue;
        }
        let p = |v: &Value| -> u16 {
            match v {
                Value::PropNum(p) => *p,
                _ => 0,
            }
        };
        return Ok(Some(Template {
            ver_do: p(&fields[1]),
            do_prop: p(&fields[2]),
            ver_io: p(&fields[3]),
            io_prop: p(&fields[4]),
            dobj_first: fields[5].is_logical_true(),
        }));
    }
    Ok(None)
}

// -- parser builtins ------------------------------------------------------

pub fn parser_set_me(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    if sess.run.top_type()? == DAT_NIL {
        return Err(TadsError::BifArgValue("parserSetMe"));
    }
    let new_me = sess.run.pop_obj()?;
    let old = sess.voc.me;
    sess.voc.set_me(new_me);
    sess.cache.push_vocab_undo(VocabUndo::SetMe { old });
    sess.run.push(StackVal::Nil)
}

pub fn parser_get_me(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 0)?;
    let me = sess.voc.me;
    sess.run.push_obj(me)
}

/// parserGetObj(which): 1 actor, 2 verb, 3 dobj, 4 prep, 5 iobj, 6 it,
/// 7 him, 8 her, 9 them (a list).
pub fn parser_get_obj(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    let which = pop_num_checked(sess, "parserGetObj")?;
    let obj = match which {
        1 => {
            let actor = sess.cmd.actor;
            if actor == OBJ_INVALID {
                sess.voc.me
            } else {
                actor
            }
        }
        2 => sess.cmd.verb,
        3 => sess.cmd.dobj,
        4 => sess.cmd.prep,
        5 => sess.cmd.iobj,
        6 => sess.voc.it,
        7 => sess.voc.him,
        8 => sess.voc.her,
        9 => {
            let mut body = Vec::new();
            for o in &sess.voc.them {
                Value::Object(*o).encode_tagged(&mut body);
            }
            return sess.run.push_list_wire(&body);
        }
        _ => return Err(TadsError::BifArgValue("parserGetObj")),
    };
    sess.run.push_obj(obj)
}

/// parserTokenize(str): a list of token strings, or nil on a tokenizer
/// error.
pub fn parser_tokenize(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    check_top(sess, DAT_SSTRING, "parserTokenize")?;
    let text = sess.run.pop_str_bytes()?;
    match tokenizer::tokenize(&sess.voc, &text, false) {
        Ok(tokens) => {
            let mut body = Vec::new();
            for tok in &tokens {
                Value::Str(tok.text().to_vec()).encode_tagged(&mut body);
            }
            sess.run.push_list_wire(&body)
        }
        Err(_) => sess.run.push(StackVal::Nil),
    }
}

/// parserGetTokTypes(list): the type bits for each token string.
pub fn parser_get_tok_types(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    check_top(sess, DAT_LIST, "parserGetTokTypes")?;
    let items = sess.run.pop_list_items()?;
    let mut body = Vec::new();
    for item in items {
        if let Value::Str(text) = item {
            let tok = tokenizer::Token::Word(text);
            let bits = parser::token_types(&sess.voc, &tok);
            Value::Number(bits as i32).encode_tagged(&mut body);
        }
    }
    sess.run.push_list_wire(&body)
}

/// parserDictLookup(words, types): objects matching all given words under
/// the given part-of-speech properties.
pub fn parser_dict_lookup(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 2)?;
    check_top(sess, DAT_LIST, "parserDictLookup")?;
    let words = sess.run.pop_list_items()?;
    check_top(sess, DAT_LIST, "parserDictLookup")?;
    let types = sess.run.pop_list_items()?;
    if words.len() != types.len() {
        return Err(TadsError::BifArgValue("parserDictLookup"));
    }

    let mut result: Option<Vec<ObjNum>> = None;
    for (word, typ) in words.iter().zip(types.iter()) {
        let (Value::Str(text), Value::PropNum(pos)) = (word, typ) else {
            return Err(TadsError::BifArgType("parserDictLookup"));
        };
        let matches = sess.voc.objects_for(&WordKey::one(text), *pos);
        result = Some(match result {
            None => matches,
            Some(cur) => cur.into_iter().filter(|o| matches.contains(o)).collect(),
        });
    }

    let mut body = Vec::new();
    for obj in result.unwrap_or_default() {
        Value::Object(obj).encode_tagged(&mut body);
    }
    sess.run.push_list_wire(&body)
}

/// parserResolveObjects(actor, verb, wordlist): resolve a noun phrase to
/// an object list using the standard matcher (without the interactive
/// clarification dialogue).
pub fn parser_resolve_objects(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 3)?;
    let _actor = sess.run.pop_obj_nil()?;
    let _verb = sess.run.pop_obj_nil()?;
    check_top(sess, DAT_LIST, "parserResolveObjects")?;
    let words = sess.run.pop_list_items()?;

    let mut tokens = Vec::new();
    for w in words {
        if let Value::Str(text) = w {
            tokens.push(tokenizer::Token::Word(text));
        }
    }
    let np = parser::parse_noun_phrase(&sess.voc, &tokens, 0);
    let objs: Vec<ObjNum> = match np.objects {
        parser::Resolution::Unique(o) => vec![o],
        parser::Resolution::Ambiguous(os) => os,
        _ => Vec::new(),
    };
    let mut body = Vec::new();
    for obj in objs {
        Value::Object(obj).encode_tagged(&mut body);
    }
    sess.run.push_list_wire(&body)
}

/// parserReplaceCommand(str): abandon the current line and execute the
/// given command string instead; unwinds with the abort signal.
pub fn parser_replace_command(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    check_top(sess, DAT_SSTRING, "parserReplaceCommand")?;
    let text = sess.run.pop_str_bytes()?;
    sess.run_command_line(&text)?;
    sess.clear_command = true;
    Err(TadsError::AbortCommand)
}
