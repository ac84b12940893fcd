//! String built-ins.

use regex::bytes::Regex;

use crate::bif::{check_argc, check_top, pop_num_checked};
use crate::errors::TadsError;
use crate::run::StackVal;
use crate::value::{DAT_NIL, DAT_NUMBER, DAT_SSTRING, DAT_TRUE};
use crate::vm::Session;

/// substr(str, offset, length): 1-based offset; an offset past the end
/// yields the empty string; the length is clamped to what remains.
/// Offset < 1 or length < 0 is a script bug.
pub fn substr(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 3)?;
    check_top(sess, DAT_SSTRING, "substr")?;
    let s = sess.run.pop_str_bytes()?;
    let ofs = pop_num_checked(sess, "substr")?;
    if ofs < 1 {
        return Err(TadsError::BifArgValue("substr"));
    }
    let asklen = pop_num_checked(sess, "substr")?;
    if asklen < 0 {
        return Err(TadsError::BifArgValue("substr"));
    }

    let ofs = (ofs - 1) as usize;
    let out = if ofs >= s.len() {
        &[][..]
    } else {
        let avail = s.len() - ofs;
        let take = (asklen as usize).min(avail);
        &s[ofs..ofs + take]
    };
    let out = out.to_vec();
    sess.run.push_str_bytes(&out)
}

fn convert_case(sess: &mut Session, argc: usize, upper: bool) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    check_top(sess, DAT_SSTRING, if upper { "upper" } else { "lower" })?;
    let s = sess.run.pop_str_bytes()?;
    // escape sequences pass through untouched, including the escaped byte
    let mut out = Vec::with_capacity(s.len());
    let mut i = 0;
    while i < s.len() {
        let c = s[i];
        if c == b'\\' && i + 1 < s.len() {
            out.push(c);
            out.push(s[i + 1]);
            i += 2;
            continue;
        }
        out.push(if upper {
            c.to_ascii_uppercase()
        } else {
            c.to_ascii_lowercase()
        });
        i += 1;
    }
    sess.run.push_str_bytes(&out)
}

pub fn upper(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    convert_case(sess, argc, true)
}

pub fn lower(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    convert_case(sess, argc, false)
}

/// cvtstr(val): nil/true become their names, numbers print in decimal,
/// strings pass through unchanged.
pub fn cvtstr(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    match sess.run.top_type()? {
        DAT_NIL => {
            sess.run.discard()?;
            sess.run.push_str_bytes(b"nil")
        }
        DAT_TRUE => {
            sess.run.discard()?;
            sess.run.push_str_bytes(b"true")
        }
        DAT_NUMBER => {
            let n = sess.run.pop_num()?;
            sess.run.push_str_bytes(n.to_string().as_bytes())
        }
        DAT_SSTRING => Ok(()), // already a string; leave it in place
        _ => Err(TadsError::BifArgType("cvtstr")),
    }
}

/// cvtnum(str): "nil"/"true" convert to those values; anything else parses
/// as a signed decimal number (non-digits terminate the scan, matching the
/// historical digit-accumulator behavior).
pub fn cvtnum(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    check_top(sess, DAT_SSTRING, "cvtnum")?;
    let s = sess.run.pop_str_bytes()?;
    if s == b"nil" {
        return sess.run.push(StackVal::Nil);
    }
    if s == b"true" {
        return sess.run.push(StackVal::True);
    }
    let mut i = 0;
    while i < s.len() && s[i].is_ascii_whitespace() {
        i += 1;
    }
    let neg = i < s.len() && s[i] == b'-';
    if neg {
        i += 1;
        while i < s.len() && s[i].is_ascii_whitespace() {
            i += 1;
        }
    }
    let mut acc: i64 = 0;
    while i < s.len() && s[i].is_ascii_digit() {
        acc = acc * 10 + (s[i] - b'0') as i64;
        i += 1;
    }
    if neg {
        acc = -acc;
    }
    sess.run.push_num(acc as i32)
}

/// reSearch(pattern, string): returns [index, length, matchText] on a
/// match, nil otherwise; capture groups are retained for reGetGroup.
pub fn re_search(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 2)?;
    check_top(sess, DAT_SSTRING, "reSearch")?;
    let pat = sess.run.pop_str_bytes()?;
    check_top(sess, DAT_SSTRING, "reSearch")?;
    let subject = sess.run.pop_str_bytes()?;

    let pat_str = String::from_utf8_lossy(&pat).into_owned();
    let Ok(re) = Regex::new(&pat_str) else {
        return Err(TadsError::BifArgValue("reSearch"));
    };
    match re.captures(&subject) {
        Some(caps) => {
            let whole = caps.get(0).expect("group 0 exists");
            sess.re_groups = caps
                .iter()
                .skip(1)
                .map(|g| g.map(|m| m.as_bytes().to_vec()).unwrap_or_default())
                .collect();
            let mut body = Vec::new();
            crate::value::Value::Number(whole.start() as i32 + 1).encode_tagged(&mut body);
            crate::value::Value::Number(whole.len() as i32).encode_tagged(&mut body);
            crate::value::Value::Str(whole.as_bytes().to_vec()).encode_tagged(&mut body);
            sess.run.push_list_wire(&body)
        }
        None => {
            sess.re_groups.clear();
            sess.run.push(StackVal::Nil)
        }
    }
}

/// reGetGroup(n): the nth capture group of the last reSearch, or nil.
pub fn re_get_group(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    let n = pop_num_checked(sess, "reGetGroup")?;
    if n < 1 {
        return Err(TadsError::BifArgValue("reGetGroup"));
    }
    match sess.re_groups.get((n - 1) as usize) {
        Some(text) => {
            let text = text.clone();
            sess.run.push_str_bytes(&text)
        }
        None => sess.run.push(StackVal::Nil),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bif;

    fn session() -> Session {
        Session::new(
            crate::config::Config::default(),
            Box::new(crate::output::ScriptSink::default()),
            Box::<crate::hostifc::NullHost>::default(),
        )
    }

    fn call(sess: &mut Session, name: &str, argc: usize) -> Result<(), TadsError> {
        bif::dispatch(sess, bif::bif_index(name).unwrap(), argc)
    }

    #[test]
    fn substr_boundaries() {
        let mut sess = session();
        // args pushed last-first: length, offset, string
        sess.run.push_num(5).unwrap();
        sess.run.push_num(1).unwrap();
        sess.run.push_str_bytes(b"hello").unwrap();
        call(&mut sess, "substr", 3).unwrap();
        assert_eq!(sess.run.pop_str_bytes().unwrap(), b"hello");

        // offset one past the end: empty result for any length
        sess.run.push_num(99).unwrap();
        sess.run.push_num(6).unwrap();
        sess.run.push_str_bytes(b"hello").unwrap();
        call(&mut sess, "substr", 3).unwrap();
        assert_eq!(sess.run.pop_str_bytes().unwrap(), b"");

        // length clamps to what remains
        sess.run.push_num(100).unwrap();
        sess.run.push_num(4).unwrap();
        sess.run.push_str_bytes(b"hello").unwrap();
        call(&mut sess, "substr", 3).unwrap();
        assert_eq!(sess.run.pop_str_bytes().unwrap(), b"lo");
    }

    #[test]
    fn substr_invalid_args_signal() {
        let mut sess = session();
        sess.run.push_num(1).unwrap();
        sess.run.push_num(0).unwrap();
        sess.run.push_str_bytes(b"x").unwrap();
        assert_eq!(
            call(&mut sess, "substr", 3).unwrap_err(),
            TadsError::BifArgValue("substr")
        );
        // wrong argument count
        let mut sess = session();
        sess.run.push_str_bytes(b"x").unwrap();
        assert_eq!(
            call(&mut sess, "substr", 1).unwrap_err(),
            TadsError::BifArgCount
        );
    }

    #[test]
    fn case_conversion_skips_escapes() {
        let mut sess = session();
        sess.run.push_str_bytes(b"ab\\nCd").unwrap();
        call(&mut sess, "upper", 1).unwrap();
        assert_eq!(sess.run.pop_str_bytes().unwrap(), b"AB\\nCD");
    }

    #[test]
    fn cvtnum_and_cvtstr() {
        let mut sess = session();
        sess.run.push_str_bytes(b"  -42xyz").unwrap();
        call(&mut sess, "cvtnum", 1).unwrap();
        assert_eq!(sess.run.pop_num().unwrap(), -42);

        sess.run.push_str_bytes(b"nil").unwrap();
        call(&mut sess, "cvtnum", 1).unwrap();
        assert_eq!(sess.run.pop().unwrap(), StackVal::Nil);

        sess.run.push_num(17).unwrap();
        call(&mut sess, "cvtstr", 1).unwrap();
        assert_eq!(sess.run.pop_str_bytes().unwrap(), b"17");

        sess.run.push(StackVal::True).unwrap();
        call(&mut sess, "cvtstr", 1).unwrap();
        assert_eq!(sess.run.pop_str_bytes().unwrap(), b"true");
    }

    #[test]
    fn research_and_groups() {
        let mut sess = session();
        // args: string, pattern (pattern is argument 1, on top)
        sess.run.push_str_bytes(b"take the brass lamp").unwrap();
        sess.run.push_str_bytes(b"(b[a-z]+) (l[a-z]+)").unwrap();
        call(&mut sess, "reSearch", 2).unwrap();
        let items = sess.run.pop_list_items().unwrap();
        assert_eq!(items[0], crate::value::Value::Number(10));
        assert_eq!(items[1], crate::value::Value::Number(10));
        assert_eq!(items[2], crate::value::Value::Str(b"brass lamp".to_vec()));

        sess.run.push_num(2).unwrap();
        call(&mut sess, "reGetGroup", 1).unwrap();
        assert_eq!(sess.run.pop_str_bytes().unwrap(), b"lamp");

        // no match: nil, groups cleared
        sess.run.push_str_bytes(b"xyz").unwrap();
        sess.run.push_str_bytes(b"lamp").unwrap();
        call(&mut sess, "reSearch", 2).unwrap();
        assert_eq!(sess.run.pop().unwrap(), StackVal::Nil);
    }
}
