//! Built-in function dispatch.
//!
//! Bytecode invokes built-ins by numeric index into a flat table.  Every
//! entry validates its argument count and types before touching state;
//! wrong counts or types signal a script bug, while conditions a running
//! game can legitimately hit (missing files, nothing to undo) come back
//! as sentinel values the script can branch on.
//!
//! Calling convention: the caller pushes arguments last-first, so argument
//! one is on top of the stack; the built-in consumes all of its arguments
//! and pushes exactly one result (a handful of display built-ins push
//! nothing, matching their historical contracts).

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::errors::TadsError;
use crate::value::DAT_NUMBER;
use crate::vm::Session;

use crate::bif_file;
use crate::bif_list;
use crate::bif_object;
use crate::bif_output;
use crate::bif_string;
use crate::bif_system;
use crate::bif_vocab;

pub type BifFn = fn(&mut Session, usize) -> Result<(), TadsError>;

/// The dispatch table.  Indices are the bytecode-visible contract; new
/// entries go at the end.
pub const BIF_TABLE: &[(&str, BifFn)] = &[
    ("say", bif_output::say),
    ("car", bif_list::car),
    ("cdr", bif_list::cdr),
    ("length", bif_list::length),
    ("randomize", bif_system::randomize),
    ("rand", bif_system::rand),
    ("substr", bif_string::substr),
    ("upper", bif_string::upper),
    ("lower", bif_string::lower),
    ("cvtstr", bif_string::cvtstr),
    ("cvtnum", bif_string::cvtnum),
    ("datatype", bif_object::datatype),
    ("getarg", bif_object::getarg),
    ("find", bif_list::find),
    ("setit", bif_vocab::setit),
    ("isclass", bif_object::isclass),
    ("firstsc", bif_object::firstsc),
    ("firstobj", bif_object::firstobj),
    ("nextobj", bif_object::nextobj),
    ("defined", bif_object::defined),
    ("proptype", bif_object::proptype),
    ("intersect", bif_list::intersect),
    ("setfuse", bif_vocab::setfuse),
    ("remfuse", bif_vocab::remfuse),
    ("setdaemon", bif_vocab::setdaemon),
    ("remdaemon", bif_vocab::remdaemon),
    ("notify", bif_vocab::notify),
    ("unnotify", bif_vocab::unnotify),
    ("getfuse", bif_vocab::getfuse),
    ("runfuses", bif_vocab::runfuses),
    ("rundaemons", bif_vocab::rundaemons),
    ("incturn", bif_vocab::incturn),
    ("skipturn", bif_vocab::skipturn),
    ("quit", bif_system::quit),
    ("restart", bif_system::restart),
    ("undo", bif_system::undo),
    ("save", bif_file::save),
    ("restore", bif_file::restore),
    ("logging", bif_file::logging),
    ("input", bif_system::input),
    ("inputkey", bif_system::inputkey),
    ("inputevent", bif_system::inputevent),
    ("inputdialog", bif_system::inputdialog),
    ("askfile", bif_file::askfile),
    ("yorn", bif_system::yorn),
    ("setscore", bif_output::setscore),
    ("caps", bif_output::caps),
    ("nocaps", bif_output::nocaps),
    ("clearscreen", bif_output::clearscreen),
    ("morePrompt", bif_output::more_prompt),
    ("outhide", bif_output::outhide),
    ("outcapture", bif_output::outcapture),
    ("setOutputFilter", bif_output::set_output_filter),
    ("execCommand", bif_output::exec_command),
    ("parserSetMe", bif_vocab::parser_set_me),
    ("parserGetMe", bif_vocab::parser_get_me),
    ("parserGetObj", bif_vocab::parser_get_obj),
    ("parserTokenize", bif_vocab::parser_tokenize),
    ("parserGetTokTypes", bif_vocab::parser_get_tok_types),
    ("parserDictLookup", bif_vocab::parser_dict_lookup),
    ("parserResolveObjects", bif_vocab::parser_resolve_objects),
    ("parserReplaceCommand", bif_vocab::parser_replace_command),
    ("addword", bif_vocab::addword),
    ("delword", bif_vocab::delword),
    ("getwords", bif_vocab::getwords),
    ("verbinfo", bif_vocab::verbinfo),
    ("fopen", bif_file::fopen),
    ("fclose", bif_file::fclose),
    ("fwrite", bif_file::fwrite),
    ("fread", bif_file::fread),
    ("fseek", bif_file::fseek),
    ("fseekeof", bif_file::fseekeof),
    ("ftell", bif_file::ftell),
    ("gettime", bif_system::gettime),
    ("timeDelay", bif_system::time_delay),
    ("systemInfo", bif_system::system_info),
    ("reSearch", bif_string::re_search),
    ("reGetGroup", bif_string::re_get_group),
    ("setversion", bif_system::setversion),
    ("exitobj", bif_system::exitobj),
    ("resourceExists", bif_file::resource_exists),
    ("debugTrace", bif_system::debug_trace),
];

lazy_static! {
    static ref BIF_INDEX: HashMap<&'static str, u16> = {
        let mut m = HashMap::new();
        for (i, (name, _)) in BIF_TABLE.iter().enumerate() {
            m.insert(*name, i as u16);
        }
        m
    };
}

/// Table index for a built-in name (code generation and tests).
pub fn bif_index(name: &str) -> Option<u16> {
    BIF_INDEX.get(name).copied()
}

pub fn bif_name(index: u16) -> Option<&'static str> {
    BIF_TABLE.get(index as usize).map(|(n, _)| *n)
}

/// Invoke built-in `index` with `argc` arguments on the stack.
pub fn dispatch(sess: &mut Session, index: u16, argc: usize) -> Result<(), TadsError> {
    let (_, f) = BIF_TABLE
        .get(index as usize)
        .ok_or(TadsError::BadBuiltin(index))?;
    f(sess, argc)
}

/// Exact-argument-count check; a mismatch is a script bug, not a runtime
/// condition.
pub fn check_argc(argc: usize, expect: usize) -> Result<(), TadsError> {
    if argc != expect {
        return Err(TadsError::BifArgCount);
    }
    Ok(())
}

/// Verify the type of the next argument without consuming it.
pub fn check_top(sess: &Session, typ: u8, name: &'static str) -> Result<(), TadsError> {
    if sess.run.top_type()? != typ {
        return Err(TadsError::BifArgType(name));
    }
    Ok(())
}

/// Shorthand: pop a number after verifying it is one.
pub fn pop_num_checked(sess: &mut Session, name: &'static str) -> Result<i32, TadsError> {
    check_top(sess, DAT_NUMBER, name)?;
    sess.run.pop_num()
}
