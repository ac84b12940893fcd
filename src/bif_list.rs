//! List built-ins.
//!
//! These work directly on the counted-length wire form, the way the
//! original runtime walks list bodies element by element; the size prefix
//! of every produced list is recomputed, never patched.

use crate::bif::{check_argc, check_top};
use crate::errors::TadsError;
use crate::run::{first_item_size, list_step, StackVal};
use crate::value::{
    read_i32, read_u16, Value, DAT_FNADDR, DAT_LIST, DAT_NUMBER, DAT_OBJECT, DAT_PROPNUM,
    DAT_SSTRING,
};
use crate::vm::Session;

/// car(list): the first element, or nil for an empty list.
pub fn car(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    check_top(sess, DAT_LIST, "car")?;
    let wire = sess.run.pop_list_wire()?;
    let body = &wire[2..];
    if body.is_empty() {
        return sess.run.push(StackVal::Nil);
    }
    let (typ, payload, _) = list_step(body)?;
    let (val, _) = Value::decode_payload(typ, payload)?;
    sess.run.push_value(&val)
}

/// cdr(list): everything but the first element, or nil for an empty list.
/// The element size of the head is recomputed from its type before
/// slicing.
pub fn cdr(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    check_top(sess, DAT_LIST, "cdr")?;
    let wire = sess.run.pop_list_wire()?;
    let body = &wire[2..];
    if body.is_empty() {
        return sess.run.push(StackVal::Nil);
    }
    let skip = first_item_size(body)?;
    let rest = body[skip..].to_vec();
    sess.run.push_list_wire(&rest)
}

/// length(str or list): character count, or element count.
pub fn length(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    match sess.run.top_type()? {
        DAT_SSTRING => {
            let s = sess.run.pop_str_bytes()?;
            sess.run.push_num(s.len() as i32)
        }
        DAT_LIST => {
            let wire = sess.run.pop_list_wire()?;
            let mut body = &wire[2..];
            let mut n = 0i32;
            while !body.is_empty() {
                let (_, _, rest) = list_step(body)?;
                body = rest;
                n += 1;
            }
            sess.run.push_num(n)
        }
        _ => Err(TadsError::BifArgType("length")),
    }
}

/// find(haystack, needle): 1-based offset/index as a number, or nil.
/// Strings search by substring; lists match the first element equal in
/// both type and value (numbers numerically, strings and lists by exact
/// content, references by identity).
pub fn find(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 2)?;
    match sess.run.top_type()? {
        DAT_SSTRING => {
            let hay = sess.run.pop_str_bytes()?;
            check_top(sess, DAT_SSTRING, "find")?;
            let needle = sess.run.pop_str_bytes()?;
            if needle.len() <= hay.len() {
                for i in 0..=hay.len() - needle.len() {
                    if &hay[i..i + needle.len()] == needle.as_slice() {
                        return sess.run.push_num(i as i32 + 1);
                    }
                }
            }
            sess.run.push(StackVal::Nil)
        }
        DAT_LIST => {
            let wire = sess.run.pop_list_wire()?;
            let target = sess.run.pop_value()?;
            let mut body = &wire[2..];
            let mut index = 1i32;
            while !body.is_empty() {
                let (typ, _, rest) = list_step(body)?;
                if typ == target.type_code() && element_matches(body, typ, &target) {
                    return sess.run.push_num(index);
                }
                body = rest;
                index += 1;
            }
            sess.run.push(StackVal::Nil)
        }
        _ => Err(TadsError::BifArgType("find")),
    }
}

fn element_matches(body: &[u8], typ: u8, target: &Value) -> bool {
    let payload = &body[1..];
    match (typ, target) {
        (DAT_NUMBER, Value::Number(n)) => read_i32(payload, 0) == *n,
        (DAT_OBJECT, Value::Object(o)) | (DAT_FNADDR, Value::FnAddr(o)) => {
            read_u16(payload, 0) == *o
        }
        (DAT_PROPNUM, Value::PropNum(p)) => read_u16(payload, 0) == *p,
        (DAT_SSTRING, Value::Str(s)) => {
            let len = read_u16(payload, 0) as usize;
            len == s.len() + 2 && &payload[2..len] == s.as_slice()
        }
        (DAT_LIST, Value::List(items)) => {
            let len = read_u16(payload, 0) as usize;
            let mut enc = Vec::new();
            for item in items {
                item.encode_tagged(&mut enc);
            }
            len == enc.len() + 2 && &payload[2..len] == enc.as_slice()
        }
        _ => true, // nil/true carry no payload; type equality suffices
    }
}

/// intersect(l1, l2): elements of the shorter list that also appear in the
/// other, in shorter-list order.
pub fn intersect(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 2)?;
    check_top(sess, DAT_LIST, "intersect")?;
    let a = sess.run.pop_list_wire()?;
    check_top(sess, DAT_LIST, "intersect")?;
    let b = sess.run.pop_list_wire()?;

    // operate with the smaller list first, as the result is at most its
    // size and its order is the result's order
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let mut out = Vec::new();
    let mut body = &small[2..];
    while !body.is_empty() {
        let n = first_item_size(body)?;
        let elem = &body[..n];
        let mut probe = &large[2..];
        while !probe.is_empty() {
            let m = first_item_size(probe)?;
            if elem == &probe[..m] {
                out.extend_from_slice(elem);
                break;
            }
            probe = &probe[m..];
        }
        body = &body[n..];
    }
    sess.run.push_list_wire(&out)
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

    fn push_list(sess: &mut Session, items: &[Value]) {
        sess.run
            .push_value(&Value::List(items.to_vec()))
            .unwrap();
    }

    #[test]
    fn car_cdr_roundtrip() {
        let mut sess = session();
        let items = [
            Value::Number(1),
            Value::Str(b"two".to_vec()),
            Value::Object(3),
        ];
        push_list(&mut sess, &items);
        call(&mut sess, "car", 1).unwrap();
        assert_eq!(sess.run.pop_value().unwrap(), Value::Number(1));

        push_list(&mut sess, &items);
        call(&mut sess, "cdr", 1).unwrap();
        let rest = sess.run.pop_list_items().unwrap();
        assert_eq!(rest, vec![Value::Str(b"two".to_vec()), Value::Object(3)]);
    }

    #[test]
    fn car_cdr_of_empty_are_nil() {
        let mut sess = session();
        push_list(&mut sess, &[]);
        call(&mut sess, "car", 1).unwrap();
        assert_eq!(sess.run.pop().unwrap(), StackVal::Nil);
        push_list(&mut sess, &[]);
        call(&mut sess, "cdr", 1).unwrap();
        assert_eq!(sess.run.pop().unwrap(), StackVal::Nil);
    }

    #[test]
    fn cdr_result_prefix_is_consistent() {
        let mut sess = session();
        push_list(&mut sess, &[Value::Number(5), Value::Number(6)]);
        call(&mut sess, "cdr", 1).unwrap();
        let StackVal::List(h) = sess.run.pop().unwrap() else {
            panic!("expected list");
        };
        let wire = sess.run.heap.get(h).unwrap();
        assert_eq!(read_u16(wire, 0) as usize, wire.len());
    }

    #[test]
    fn length_of_strings_and_lists() {
        let mut sess = session();
        sess.run.push_str_bytes(b"hello").unwrap();
        call(&mut sess, "length", 1).unwrap();
        assert_eq!(sess.run.pop_num().unwrap(), 5);

        push_list(
            &mut sess,
            &[Value::Number(1), Value::List(vec![Value::True]), Value::Nil],
        );
        call(&mut sess, "length", 1).unwrap();
        assert_eq!(sess.run.pop_num().unwrap(), 3);
    }

    #[test]
    fn find_in_string() {
        let mut sess = session();
        sess.run.push_str_bytes(b"sail").unwrap();
        sess.run.push_str_bytes(b"hello sailor").unwrap();
        call(&mut sess, "find", 2).unwrap();
        assert_eq!(sess.run.pop_num().unwrap(), 7);

        sess.run.push_str_bytes(b"zzz").unwrap();
        sess.run.push_str_bytes(b"hello").unwrap();
        call(&mut sess, "find", 2).unwrap();
        assert_eq!(sess.run.pop().unwrap(), StackVal::Nil);
    }

    #[test]
    fn find_in_list_matches_type_and_value() {
        let mut sess = session();
        let items = [
            Value::Str(b"3".to_vec()),
            Value::Number(3),
            Value::Object(3),
        ];
        // number 3 must find the *number*, not the string or object
        sess.run.push_value(&Value::Number(3)).unwrap();
        push_list(&mut sess, &items);
        call(&mut sess, "find", 2).unwrap();
        assert_eq!(sess.run.pop_num().unwrap(), 2);

        sess.run.push_value(&Value::Object(3)).unwrap();
        push_list(&mut sess, &items);
        call(&mut sess, "find", 2).unwrap();
        assert_eq!(sess.run.pop_num().unwrap(), 3);

        sess.run.push_value(&Value::Number(9)).unwrap();
        push_list(&mut sess, &items);
        call(&mut sess, "find", 2).unwrap();
        assert_eq!(sess.run.pop().unwrap(), StackVal::Nil);
    }

    #[test]
    fn intersect_keeps_smaller_list_order() {
        let mut sess = session();
        push_list(
            &mut sess,
            &[Value::Number(4), Value::Number(2), Value::Number(1)],
        );
        push_list(
            &mut sess,
            &[Value::Number(1), Value::Number(2), Value::Number(3)],
        );
        call(&mut sess, "intersect", 2).unwrap();
        let out = sess.run.pop_list_items().unwrap();
        assert_eq!(out, vec![Value::Number(1), Value::Number(2)]);
    }
}
