//! File built-ins: script file I/O under the safety policy, plus save,
//! restore, logging, and the file-prompt dialogs.
//!
//! Policy violations and OS failures are soft failures (nil) so script
//! code can probe for permission; malformed mode strings and bad handles
//! are script bugs and signal.

use std::io::{Read, Seek, SeekFrom, Write};

use log::debug;

use crate::bif::{check_argc, check_top, pop_num_checked};
use crate::errors::{RestoreCode, TadsError};
use crate::hostifc::{is_in_game_dir, resolve_game_relative};
use crate::run::StackVal;
use crate::value::{read_i32, read_u16, DAT_NUMBER, DAT_SSTRING, DAT_TRUE};
use crate::vm::{OpenFile, Session, FILE_SLOTS};

/// fopen(name, mode): mode is `r`/`w`, optional `+`, optional `b`/`t`.
/// Returns a slot number, or nil when the file cannot or may not be
/// opened.
pub fn fopen(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 2)?;
    check_top(sess, DAT_SSTRING, "fopen")?;
    let name = sess.run.pop_str_bytes()?;
    check_top(sess, DAT_SSTRING, "fopen")?;
    let mode = sess.run.pop_str_bytes()?;

    // parse the mode string strictly; a bad mode is a script bug
    let mut m = mode.as_slice();
    let main_mode = match m.first() {
        Some(b'r') | Some(b'R') => b'r',
        Some(b'w') | Some(b'W') => b'w',
        _ => return Err(TadsError::BifArgValue("fopen")),
    };
    m = &m[1..];
    let rw = if m.first() == Some(&b'+') {
        m = &m[1..];
        true
    } else {
        false
    };
    let binary = match m.first() {
        None => true,
        Some(b'b') | Some(b'B') => {
            m = &m[1..];
            true
        }
        Some(b't') | Some(b'T') => {
            m = &m[1..];
            false
        }
        _ => return Err(TadsError::BifArgValue("fopen")),
    };
    if !m.is_empty() || (!binary && rw) {
        return Err(TadsError::BifArgValue("fopen"));
    }

    // a free slot is required; none left is a soft failure
    let Some(slot) = sess.files.iter().position(|f| f.is_none()) else {
        return sess.run.push(StackVal::Nil);
    };

    // resolve against the game directory and apply the safety policy
    if let Some((read, write)) = sess.host.io_safety_override() {
        sess.safety.read_level = read;
        sess.safety.write_level = write;
    }
    let game_dir = sess.game_dir();
    let path = resolve_game_relative(&game_dir, &name);
    let in_dir = is_in_game_dir(&game_dir, &path);
    let allowed = match main_mode {
        b'w' => sess.safety.allows_write(in_dir),
        _ => sess.safety.allows_read(in_dir),
    };
    if !allowed {
        debug!("fopen {:?} blocked by safety policy", path);
        return sess.run.push(StackVal::Nil);
    }

    let result = match (main_mode, rw) {
        (b'w', _) => std::fs::File::options()
            .write(true)
            .read(rw)
            .create(true)
            .truncate(true)
            .open(&path),
        (_, true) => std::fs::File::options().read(true).write(true).open(&path),
        _ => std::fs::File::open(&path),
    };
    match result {
        Ok(file) => {
            sess.files[slot] = Some(OpenFile { file, binary });
            sess.run.push_num(slot as i32)
        }
        Err(_) => sess.run.push(StackVal::Nil),
    }
}

fn pop_handle(sess: &mut Session) -> Result<usize, TadsError> {
    let n = sess.run.pop_num().map_err(|_| TadsError::BadFileHandle)?;
    if n < 0 || n as usize >= FILE_SLOTS || sess.files[n as usize].is_none() {
        return Err(TadsError::BadFileHandle);
    }
    Ok(n as usize)
}

pub fn fclose(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    let slot = pop_handle(sess)?;
    sess.files[slot] = None;
    sess.run.push(StackVal::Nil)
}

pub fn ftell(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    let slot = pop_handle(sess)?;
    let file = &mut sess.files[slot].as_mut().expect("open").file;
    let pos = file.stream_position().unwrap_or(0);
    sess.run.push_num(pos as i32)
}

pub fn fseek(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 2)?;
    let slot = pop_handle(sess)?;
    let pos = pop_num_checked(sess, "fseek")?;
    let file = &mut sess.files[slot].as_mut().expect("open").file;
    let _ = file.seek(SeekFrom::Start(pos.max(0) as u64));
    sess.run.push(StackVal::Nil)
}

pub fn fseekeof(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    let slot = pop_handle(sess)?;
    let file = &mut sess.files[slot].as_mut().expect("open").file;
    let _ = file.seek(SeekFrom::End(0));
    sess.run.push(StackVal::Nil)
}

/// fwrite(file, value): binary files hold typed records (a type byte, then
/// the payload); text files take strings with escapes translated.
/// Returns nil on success, true on failure.
pub fn fwrite(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 2)?;
    let slot = pop_handle(sess)?;
    let val = sess.run.pop()?;
    let binary = sess.files[slot].as_ref().expect("open").binary;

    let ok = if binary {
        let typ = val.type_code();
        let mut buf = vec![typ];
        match val {
            StackVal::Number(n) => buf.extend_from_slice(&n.to_le_bytes()),
            StackVal::Str(h) => buf.extend_from_slice(sess.run.heap.get(h)?),
            StackVal::True => {}
            _ => return Err(TadsError::BifArgType("fwrite")),
        }
        let file = &mut sess.files[slot].as_mut().expect("open").file;
        file.write_all(&buf).is_ok()
    } else {
        let StackVal::Str(h) = val else {
            return Err(TadsError::BifArgType("fwrite"));
        };
        let text = sess.run.heap.get(h)?[2..].to_vec();
        let mut out = Vec::with_capacity(text.len());
        let mut i = 0;
        while i < text.len() {
            if text[i] == b'\\' && i + 1 < text.len() {
                match text[i + 1] {
                    b'n' => out.push(b'\n'),
                    b't' => out.push(b'\t'),
                    other => out.push(other),
                }
                i += 2;
            } else {
                out.push(text[i]);
                i += 1;
            }
        }
        let file = &mut sess.files[slot].as_mut().expect("open").file;
        file.write_all(&out).is_ok()
    };

    if ok {
        sess.run.push(StackVal::Nil)
    } else {
        sess.run.push(StackVal::True)
    }
}

/// fread(file): the next typed record from a binary file, or the next
/// line from a text file; nil at end of file or on error.
pub fn fread(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    let slot = pop_handle(sess)?;
    let binary = sess.files[slot].as_ref().expect("open").binary;
    let file = &mut sess.files[slot].as_mut().expect("open").file;

    if binary {
        let mut typ = [0u8; 1];
        if file.read_exact(&mut typ).is_err() {
            return sess.run.push(StackVal::Nil);
        }
        match typ[0] {
            DAT_NUMBER => {
                let mut b = [0u8; 4];
                if file.read_exact(&mut b).is_err() {
                    return sess.run.push(StackVal::Nil);
                }
                let n = read_i32(&b, 0);
                sess.run.push_num(n)
            }
            DAT_SSTRING => {
                let mut b = [0u8; 2];
                if file.read_exact(&mut b).is_err() {
                    return sess.run.push(StackVal::Nil);
                }
                let total = read_u16(&b, 0) as usize;
                if total < 2 {
                    return sess.run.push(StackVal::Nil);
                }
                let mut text = vec![0u8; total - 2];
                if file.read_exact(&mut text).is_err() {
                    return sess.run.push(StackVal::Nil);
                }
                sess.run.push_str_bytes(&text)
            }
            DAT_TRUE => sess.run.push(StackVal::True),
            _ => sess.run.push(StackVal::Nil),
        }
    } else {
        // text mode: one line, escapes reintroduced for backslashes
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match file.read_exact(&mut byte) {
                Ok(()) if byte[0] == b'\n' => break,
                Ok(()) => {
                    if byte[0] == b'\\' {
                        line.push(b'\\');
                    }
                    if byte[0] != b'\r' {
                        line.push(byte[0]);
                    }
                }
                Err(_) => {
                    if line.is_empty() {
                        return sess.run.push(StackVal::Nil);
                    }
                    break;
                }
            }
        }
        sess.run.push_str_bytes(&line)
    }
}

/// save(filename): nil on success, true on failure.
pub fn save(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    check_top(sess, DAT_SSTRING, "save")?;
    let name = sess.run.pop_str_bytes()?;
    let path = resolve_game_relative(&sess.game_dir(), &name);
    let ok = sess.save(&path);
    sess.run.push_logical(!ok)
}

/// restore(filename): a result code; zero is success, and the distinct
/// nonzero codes let the game message each failure differently.
pub fn restore(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    check_top(sess, DAT_SSTRING, "restore")?;
    let name = sess.run.pop_str_bytes()?;
    let path = resolve_game_relative(&sess.game_dir(), &name);
    let code = sess.restore(&path);
    sess.run.push_num(restore_code_num(code))
}

pub fn restore_code_num(code: RestoreCode) -> i32 {
    match code {
        RestoreCode::Success => 0,
        RestoreCode::FileNotFound => 1,
        RestoreCode::NotSaveFile => 2,
        RestoreCode::BadFormatVersion => 3,
        RestoreCode::BadGameVersion => 4,
        RestoreCode::ReadError => 5,
    }
}

/// logging(filename or nil): open or close the transcript log.
pub fn logging(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    if sess.run.top_type()? == crate::value::DAT_NIL {
        sess.run.discard()?;
        sess.out.close_log();
        return sess.run.push(StackVal::Nil);
    }
    check_top(sess, DAT_SSTRING, "logging")?;
    let name = sess.run.pop_str_bytes()?;
    let path = resolve_game_relative(&sess.game_dir(), &name);
    let ok = sess.out.open_log(&path);
    sess.run.push_logical(ok)
}

/// askfile(prompt [, prompt_type, file_type [, flags]]): prompt for a file
/// name.  Without a display dialog this reads a line; an empty reply is a
/// cancel (nil).
pub fn askfile(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    if argc != 1 && argc != 3 && argc != 4 {
        return Err(TadsError::BifArgCount);
    }
    check_top(sess, DAT_SSTRING, "askfile")?;
    let prompt = sess.run.pop_str_bytes()?;
    if argc >= 3 {
        let _prompt_type = pop_num_checked(sess, "askfile")?;
        let _file_type = pop_num_checked(sess, "askfile")?;
        if argc == 4 {
            let _flags = pop_num_checked(sess, "askfile")?;
        }
    }
    sess.print_plain(&prompt)?;
    sess.print_plain(b"\n")?;
    sess.out.sink.flush();
    match sess.out.sink.read_line() {
        Some(line) if !line.is_empty() => sess.run.push_str_bytes(&line),
        _ => sess.run.push(StackVal::Nil),
    }
}

/// resourceExists(name): whether a bundled resource (or plain file next to
/// the game) is present.
pub fn resource_exists(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    check_top(sess, DAT_SSTRING, "resourceExists")?;
    let name = sess.run.pop_str_bytes()?;
    let path = resolve_game_relative(&sess.game_dir(), &name);
    sess.run.push_logical(path.is_file())
}
