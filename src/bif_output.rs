//! Display built-ins: say, hidden output, capture, and the recursive
//! command executor with its output-splicing rules.

use crate::bif::{check_argc, pop_num_checked};
use crate::errors::TadsError;
use crate::run::StackVal;
use crate::value::{DAT_FNADDR, DAT_NIL, DAT_NUMBER, DAT_SSTRING, DAT_TRUE, OBJ_INVALID};
use crate::vm::Session;

/// say(val): dispatches on the argument type - numbers print in decimal,
/// strings format through the output pipeline, nil prints nothing.
pub fn say(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    if argc != 1 && argc != 2 {
        return Err(TadsError::BifArgCount);
    }
    match sess.run.top_type()? {
        DAT_NUMBER => {
            let n = sess.run.pop_num()?;
            sess.print_plain(n.to_string().as_bytes())?;
        }
        DAT_SSTRING => {
            let text = sess.run.pop_str_bytes()?;
            sess.print_game_str(&text)?;
        }
        DAT_NIL => {
            sess.run.discard()?;
        }
        _ => return Err(TadsError::BifArgType("say")),
    }
    sess.run.push(StackVal::Nil)
}

/// setscore(score, turns) or setscore(str): update the status-line score.
pub fn setscore(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    if argc == 1 && sess.run.top_type()? == DAT_SSTRING {
        let text = sess.run.pop_str_bytes()?;
        // a free-form status string replaces the numeric pair
        sess.print_plain(b"[")?;
        sess.print_plain(&text)?;
        sess.print_plain(b"]\n")?;
        return sess.run.push(StackVal::Nil);
    }
    check_argc(argc, 2)?;
    let s1 = pop_num_checked(sess, "setscore")?;
    let s2 = pop_num_checked(sess, "setscore")?;
    sess.score = (s1, s2);
    sess.run.push(StackVal::Nil)
}

pub fn caps(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 0)?;
    // the next character would be capitalized by a full formatter; the
    // plain sink has no pending-case state to flip
    sess.run.push(StackVal::Nil)
}

pub fn nocaps(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 0)?;
    sess.run.push(StackVal::Nil)
}

pub fn clearscreen(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 0)?;
    sess.print_plain(b"\x0c")?;
    sess.run.push(StackVal::Nil)
}

pub fn more_prompt(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 0)?;
    sess.print_plain(b"[More]\n")?;
    sess.run.push(StackVal::Nil)
}

/// outhide(flag): the four-state hidden-output protocol.
///
/// `outhide(true)` hides output and returns a status code for the
/// matching call: 0 output was shown, 1 hidden with no output yet, 2
/// hidden and output had occurred.  `outhide(nil)` or `outhide(0)` shows
/// output and returns whether any was emitted while hidden; `outhide(1)`
/// and `outhide(2)` restore the state a nested region saved.
pub fn outhide(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    let (hidden, occurred) = sess.out.status();
    match sess.run.top_type()? {
        DAT_TRUE => {
            sess.run.discard()?;
            let code = if !hidden {
                0
            } else if !occurred {
                1
            } else {
                2
            };
            sess.out.hide();
            sess.run.push_num(code)
        }
        DAT_NIL => {
            sess.run.discard()?;
            let any = sess.out.show();
            sess.run.push_logical(any)
        }
        DAT_NUMBER => {
            let n = sess.run.pop_num()?;
            match n {
                0 => {
                    let any = sess.out.show();
                    sess.run.push_logical(any)
                }
                1 => {
                    // still hidden; report whether output has occurred
                    sess.run.push_logical(occurred)
                }
                2 => {
                    // hidden with prior output: report, then restore the
                    // occurred flag the outer region saw
                    sess.run.push_logical(occurred)?;
                    sess.out.set_hidden_output();
                    Ok(())
                }
                _ => Err(TadsError::BifArgValue("outhide")),
            }
        }
        _ => Err(TadsError::NumRequired),
    }
}

/// outcapture(true) begins capturing and returns the bookmark;
/// outcapture(bookmark) ends the region and returns the text captured
/// after the bookmark.  A bookmark past the buffer clamps to empty.
pub fn outcapture(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    match sess.run.top_type()? {
        DAT_TRUE => {
            sess.run.discard()?;
            sess.out.set_capture(&mut sess.cache, true)?;
            let bookmark = sess.out.capture_size();
            sess.run.push_num(bookmark as i32)
        }
        DAT_NUMBER => {
            let bookmark = sess.run.pop_num()?.max(0) as usize;
            if sess.out.capture_obj() == OBJ_INVALID {
                return sess.run.push(StackVal::Nil);
            }
            // the outermost region turns capture off and resets the buffer
            if bookmark == 0 {
                sess.out.set_capture(&mut sess.cache, false)?;
            }
            let text = sess.out.capture_tail(&mut sess.cache, bookmark)?;
            if bookmark == 0 {
                sess.out.clear_capture();
            }
            sess.run.push_str_bytes(&text)
        }
        _ => Err(TadsError::BifArgType("outcapture")),
    }
}

/// setOutputFilter(fn or nil).
pub fn set_output_filter(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    match sess.run.top_type()? {
        DAT_NIL => {
            sess.run.discard()?;
            sess.out.filter_fn = OBJ_INVALID;
        }
        DAT_FNADDR => {
            sess.out.filter_fn = sess.run.pop_fn()?;
        }
        _ => return Err(TadsError::BifArgType("setOutputFilter")),
    }
    sess.run.push(StackVal::Nil)
}

const EC_HIDE_SUCCESS: i32 = 0x0001;
const EC_HIDE_ERROR: i32 = 0x0002;
const EC_SKIP_VALIDDO: i32 = 0x0004;
const EC_SKIP_VALIDIO: i32 = 0x0008;

/// execCommand(actor, verb [, dobj [, prep [, iobj]]] [, flags]): run a
/// command recursively.  With a HIDE flag set, the executed command's
/// output is captured, and on the hide path it is spliced out of any
/// *enclosing* capture region rather than merely discarded.
pub fn exec_command(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    if !(2..=6).contains(&argc) {
        return Err(TadsError::BifArgCount);
    }
    let actor = sess.run.pop_obj_nil()?;
    let verb = sess.run.pop_obj_nil()?;

    let mut rem = argc - 2;
    let mut next_obj = |sess: &mut Session, rem: &mut usize| -> Result<u16, TadsError> {
        if *rem == 0 {
            return Ok(OBJ_INVALID);
        }
        match sess.run.top_type()? {
            crate::value::DAT_OBJECT | DAT_NIL => {
                *rem -= 1;
                sess.run.pop_obj_nil()
            }
            _ => Ok(OBJ_INVALID),
        }
    };
    let dobj = next_obj(sess, &mut rem)?;
    let prep = next_obj(sess, &mut rem)?;
    let iobj = next_obj(sess, &mut rem)?;
    let flags = if rem > 0 {
        rem -= 1;
        pop_num_checked(sess, "execCommand")?
    } else {
        0
    };
    if rem != 0 {
        // a mis-typed argument desynchronized the optional-argument scan
        return Err(TadsError::BifArgType("execCommand"));
    }

    let hide_any = flags & (EC_HIDE_SUCCESS | EC_HIDE_ERROR) != 0;
    let _ = flags & (EC_SKIP_VALIDDO | EC_SKIP_VALIDIO); // validation is the action's business here

    let mut capture_start = 0usize;
    if hide_any {
        sess.out.set_capture(&mut sess.cache, true)?;
        capture_start = sess.out.capture_size();
    }

    let err = sess.exec_parsed(actor, verb, dobj, prep, iobj)?;

    if hide_any {
        if capture_start == 0 {
            sess.out.set_capture(&mut sess.cache, false)?;
        }
        let hide = if err == 0 {
            flags & EC_HIDE_SUCCESS != 0
        } else {
            flags & EC_HIDE_ERROR != 0
        };
        if hide {
            // splice the command's output out of the enclosing capture
            if capture_start != 0 {
                sess.out.pop_capture(capture_start);
            }
        } else if capture_start == 0 {
            // show the text we captured; an enclosing capture just keeps it
            let text = sess.out.capture_tail(&mut sess.cache, capture_start)?;
            sess.print_plain(&text)?;
        }
        if capture_start == 0 {
            sess.out.clear_capture();
        }
    }

    sess.run.push_num(err)
}
