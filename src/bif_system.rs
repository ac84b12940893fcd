//! System built-ins: randomness, time, input, session control.

use regex::bytes::Regex;

use crate::bif::{check_argc, check_top, pop_num_checked};
use crate::errors::TadsError;
use crate::run::StackVal;
use crate::value::{Value, DAT_NUMBER, DAT_SSTRING};
use crate::vm::Session;

/// rand(max): a number in [1, max].  Until randomize() is called this uses
/// the legacy generator so recorded scripts replay identically; rand(0)
/// is 0.
pub fn rand(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    check_top(sess, DAT_NUMBER, "rand")?;
    let max = sess.run.pop_num()?;
    let n = sess.run.rand.next(max);
    sess.run.push_num(n)
}

/// randomize(): seed the good generator from the environment.
pub fn randomize(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 0)?;
    let seed: i64 = ::rand::random::<u32>() as i64;
    sess.run.rand.randomize(seed);
    sess.run.push(StackVal::Nil)
}

pub fn quit(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 0)?;
    sess.out.sink.flush();
    Err(TadsError::Quit)
}

pub fn restart(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 0)?;
    let _ = sess;
    Err(TadsError::Restart)
}

/// exitobj(): abandon the current command's object processing.
pub fn exitobj(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 0)?;
    let _ = sess;
    Err(TadsError::ExitObj)
}

/// undo(): roll back to the previous savepoint; nil when there is nothing
/// to undo (a normal early-game state, deliberately silent), true on
/// success.  Anything other than the two no-undo conditions re-raises.
pub fn undo(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 0)?;
    let undone = sess.undo()?;
    sess.run.push_logical(undone)
}

/// input(): one line of input as a string.
pub fn input(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 0)?;
    sess.out.sink.flush();
    match sess.out.sink.read_line() {
        Some(line) => sess.run.push_str_bytes(&line),
        None => Err(TadsError::Quit),
    }
}

/// inputkey(): a single keystroke; with a line-based sink, the first byte
/// of the next line (or return for an empty line).
pub fn inputkey(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 0)?;
    sess.out.sink.flush();
    match sess.out.sink.read_line() {
        Some(line) => {
            let key = line.first().copied().unwrap_or(b'\n');
            sess.run.push_str_bytes(&[key])
        }
        None => Err(TadsError::Quit),
    }
}

/// inputevent([timeout]): an event list [type, detail].  Line input is the
/// only event source here, reported as event type 1 with the line text.
pub fn inputevent(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    let _timeout = match argc {
        0 => None,
        1 => Some(pop_num_checked(sess, "inputevent")?),
        _ => return Err(TadsError::BifArgCount),
    };
    sess.out.sink.flush();
    match sess.out.sink.read_line() {
        Some(line) => {
            let mut body = Vec::new();
            Value::Number(1).encode_tagged(&mut body);
            Value::Str(line).encode_tagged(&mut body);
            sess.run.push_list_wire(&body)
        }
        None => Err(TadsError::Quit),
    }
}

/// inputdialog(icon, prompt, buttons, default, cancel): without a real
/// dialog layer, prints the prompt and reads a button number.
pub fn inputdialog(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 5)?;
    let _icon = pop_num_checked(sess, "inputdialog")?;
    check_top(sess, DAT_SSTRING, "inputdialog")?;
    let prompt = sess.run.pop_str_bytes()?;
    // buttons may be a list of labels or a standard-set number
    let _buttons = sess.run.pop_value()?;
    let default_btn = pop_num_checked(sess, "inputdialog")?;
    let _cancel_btn = pop_num_checked(sess, "inputdialog")?;

    sess.print_plain(&prompt)?;
    sess.print_plain(b"\n")?;
    sess.out.sink.flush();
    let choice = match sess.out.sink.read_line() {
        Some(line) => String::from_utf8_lossy(&line)
            .trim()
            .parse::<i32>()
            .unwrap_or(default_btn),
        None => default_btn,
    };
    sess.run.push_num(choice)
}

/// yorn(): read a yes/no answer; 1 yes, 0 no, -1 neither.  The reply
/// patterns are regular expressions, defaulting to `[Yy].*` / `[Nn].*`.
pub fn yorn(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 0)?;
    sess.out.sink.flush();
    let Some(line) = sess.out.sink.read_line() else {
        return Err(TadsError::Quit);
    };
    let reply: Vec<u8> = line
        .iter()
        .copied()
        .skip_while(|c| c.is_ascii_whitespace())
        .collect();

    let yes = Regex::new("^[Yy].*$").expect("yes pattern");
    let no = Regex::new("^[Nn].*$").expect("no pattern");
    let result = if yes.is_match(&reply) {
        1
    } else if no.is_match(&reply) {
        0
    } else {
        -1
    };
    sess.run.push_num(result)
}

/// gettime([type]): type 1 is the date/time list, type 2 the millisecond
/// timer.
pub fn gettime(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    let typ = match argc {
        0 => 1,
        1 => pop_num_checked(sess, "gettime")?,
        _ => return Err(TadsError::BifArgCount),
    };
    match typ {
        1 => {
            let secs = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let t = civil_time(secs as i64);
            let mut body = Vec::new();
            for n in [
                t.year,
                t.month,
                t.day,
                t.weekday,
                t.yearday,
                t.hour,
                t.minute,
                t.second,
                secs as i32,
            ] {
                Value::Number(n).encode_tagged(&mut body);
            }
            sess.run.push_list_wire(&body)
        }
        2 => {
            let ms = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            sess.run.push_num((ms & 0x7fff_ffff) as i32)
        }
        _ => Err(TadsError::BifArgValue("gettime")),
    }
}

struct CivilTime {
    year: i32,
    month: i32,
    day: i32,
    weekday: i32,
    yearday: i32,
    hour: i32,
    minute: i32,
    second: i32,
}

/// Convert a Unix timestamp to civil fields (UTC).  Days-from-epoch to
/// year/month/day by the usual era arithmetic.
fn civil_time(secs: i64) -> CivilTime {
    let days = secs.div_euclid(86400);
    let rem = secs.rem_euclid(86400);

    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = (if m <= 2 { y + 1 } else { y }) as i32;

    // day-of-year relative to January 1
    let jan1_days = days_from_civil(year, 1, 1);
    let yearday = (days - jan1_days + 1) as i32;

    CivilTime {
        year,
        month: m as i32,
        day: d as i32,
        // Unix day 0 was a Thursday; 1 = Sunday in the result list
        weekday: ((days + 4).rem_euclid(7) + 1) as i32,
        yearday,
        hour: (rem / 3600) as i32,
        minute: (rem % 3600 / 60) as i32,
        second: (rem % 60) as i32,
    }
}

fn days_from_civil(year: i32, month: i64, day: i64) -> i64 {
    let y = (year as i64) - if month <= 2 { 1 } else { 0 };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = if month > 2 { month - 3 } else { month + 9 };
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// timeDelay(milliseconds).
pub fn time_delay(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    let ms = pop_num_checked(sess, "timeDelay")?;
    sess.out.sink.flush();
    if ms > 0 {
        std::thread::sleep(std::time::Duration::from_millis(ms as u64));
    }
    sess.run.push(StackVal::Nil)
}

const SYSINFO_SYSINFO: i32 = 1;
const SYSINFO_VERSION: i32 = 2;
const SYSINFO_OS_NAME: i32 = 3;

/// systemInfo(id, ...): interpreter feature probes.  The id is argument 1;
/// unsupported feature probes answer 0 rather than failing, so games can
/// ask freely.
pub fn system_info(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    if argc == 0 {
        return Err(TadsError::BifArgCount);
    }
    let id = pop_num_checked(sess, "systemInfo")?;
    // a few probes carry extra arguments; consume whatever remains
    for _ in 1..argc {
        sess.run.discard()?;
    }
    match id {
        SYSINFO_SYSINFO => sess.run.push(StackVal::True),
        SYSINFO_VERSION => sess.run.push_str_bytes(env!("CARGO_PKG_VERSION").as_bytes()),
        SYSINFO_OS_NAME => sess.run.push_str_bytes(std::env::consts::OS.as_bytes()),
        _ => sess.run.push_num(0),
    }
}

/// setversion(str): retained for old games; the timestamp mechanism
/// superseded it, so the value is ignored.
pub fn setversion(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    check_top(sess, DAT_SSTRING, "setversion")?;
    let _ = sess.run.pop_str_bytes()?;
    sess.run.push(StackVal::Nil)
}

/// debugTrace(mode, flag): debugger hook; without a debugger attached it
/// reports nil.
pub fn debug_trace(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    for _ in 0..argc {
        sess.run.discard()?;
    }
    sess.run.push(StackVal::Nil)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bif;
    use crate::config::Config;
    use crate::hostifc::NullHost;
    use crate::output::ScriptSink;

    fn session_with_input(lines: &[&[u8]]) -> Session {
        Session::new(
            Config::default(),
            Box::new(ScriptSink::with_input(lines)),
            Box::new(NullHost),
        )
    }

    fn call(sess: &mut Session, name: &str, argc: usize) -> Result<(), TadsError> {
        bif::dispatch(sess, bif::bif_index(name).unwrap(), argc)
    }

    #[test]
    fn rand_legacy_golden_triple() {
        let mut sess = session_with_input(&[]);
        let mut got = Vec::new();
        for _ in 0..3 {
            sess.run.push_num(100).unwrap();
            call(&mut sess, "rand", 1).unwrap();
            got.push(sess.run.pop_num().unwrap());
        }
        assert_eq!(got, vec![6, 71, 16]);
    }

    #[test]
    fn yorn_returns_three_way() {
        let mut sess = session_with_input(&[b"  Yes please", b"nope", b"maybe"]);
        call(&mut sess, "yorn", 0).unwrap();
        assert_eq!(sess.run.pop_num().unwrap(), 1);
        call(&mut sess, "yorn", 0).unwrap();
        assert_eq!(sess.run.pop_num().unwrap(), 0);
        call(&mut sess, "yorn", 0).unwrap();
        assert_eq!(sess.run.pop_num().unwrap(), -1);
    }

    #[test]
    fn quit_and_restart_signal() {
        let mut sess = session_with_input(&[]);
        assert_eq!(call(&mut sess, "quit", 0).unwrap_err(), TadsError::Quit);
        assert_eq!(
            call(&mut sess, "restart", 0).unwrap_err(),
            TadsError::Restart
        );
        assert_eq!(
            call(&mut sess, "exitobj", 0).unwrap_err(),
            TadsError::ExitObj
        );
    }

    #[test]
    fn undo_without_savepoint_is_nil() {
        let mut sess = session_with_input(&[]);
        call(&mut sess, "undo", 0).unwrap();
        assert_eq!(sess.run.pop().unwrap(), StackVal::Nil);
    }

    #[test]
    fn gettime_list_shape() {
        let mut sess = session_with_input(&[]);
        call(&mut sess, "gettime", 0).unwrap();
        let items = sess.run.pop_list_items().unwrap();
        assert_eq!(items.len(), 9);
        let Value::Number(year) = items[0] else {
            panic!("year not a number")
        };
        assert!(year >= 2020);
        let Value::Number(month) = items[1] else {
            panic!("month not a number")
        };
        assert!((1..=12).contains(&month));
        let Value::Number(wday) = items[3] else {
            panic!("weekday not a number")
        };
        assert!((1..=7).contains(&wday));
    }

    #[test]
    fn civil_time_known_date() {
        // 2000-03-01 12:34:56 UTC
        let t = civil_time(951_914_096);
        assert_eq!(t.year, 2000);
        assert_eq!(t.month, 3);
        assert_eq!(t.day, 1);
        assert_eq!(t.hour, 12);
        assert_eq!(t.minute, 34);
        assert_eq!(t.second, 56);
        assert_eq!(t.weekday, 4); // Wednesday, with Sunday = 1
        assert_eq!(t.yearday, 61); // leap year: 31 + 29 + 1
    }

    #[test]
    fn system_info_probes() {
        let mut sess = session_with_input(&[]);
        sess.run.push_num(SYSINFO_SYSINFO).unwrap();
        call(&mut sess, "systemInfo", 1).unwrap();
        assert_eq!(sess.run.pop().unwrap(), StackVal::True);

        // unknown feature probe: 0, not an error
        sess.run.push_num(31).unwrap();
        call(&mut sess, "systemInfo", 1).unwrap();
        assert_eq!(sess.run.pop_num().unwrap(), 0);
    }

    #[test]
    fn inputevent_wraps_line() {
        let mut sess = session_with_input(&[b"go north"]);
        call(&mut sess, "inputevent", 0).unwrap();
        let items = sess.run.pop_list_items().unwrap();
        assert_eq!(items[0], Value::Number(1));
        assert_eq!(items[1], Value::Str(b"go north".to_vec()));
    }
}
