//! Object payload layout.
//!
//! An object is a byte string: a fixed header, the superclass list, then a
//! stream of property records.  Static properties (compiled into the game
//! file) live below the reset offset; runtime changes append records to the
//! mutable region above it, shadowing any static record for the same
//! property.  Reverting an object truncates back to the reset offset.
//!
//! ```text
//! offset  field
//! 0       flags (u16)
//! 2       superclass count (u16)
//! 4       property count, total (u16)
//! 6       free offset - end of used payload (u16)
//! 8       reset offset - start of the mutable region (u16)
//! 10      static property count (u16)
//! 12      superclass object numbers (u16 each)
//! ...     property records
//! ```
//!
//! Property record: `prop (u16) | type (u8) | flags (u8) | size (u16) | data`.

use std::collections::HashSet;

use crate::errors::TadsError;
use crate::objcache::ObjectCache;
use crate::value::{read_u16, write_u16, ObjNum, PropNum, Value};

pub const OBJ_HDR_SIZE: usize = 12;
pub const PRP_HDR_SIZE: usize = 6;

/// Object flag: this object is a class.
pub const OBJF_CLASS: u16 = 0x0002;

/// Property flag: deleted at runtime.
pub const PRPF_DELETED: u8 = 0x01;
/// Property flag: static record superseded by a runtime record.
pub const PRPF_IGNORE: u8 = 0x02;

pub fn obj_flags(p: &[u8]) -> u16 {
    read_u16(p, 0)
}

pub fn sc_count(p: &[u8]) -> usize {
    read_u16(p, 2) as usize
}

pub fn prop_count(p: &[u8]) -> usize {
    read_u16(p, 4) as usize
}

pub fn free_ofs(p: &[u8]) -> usize {
    read_u16(p, 6) as usize
}

pub fn reset_ofs(p: &[u8]) -> usize {
    read_u16(p, 8) as usize
}

pub fn static_prop_count(p: &[u8]) -> usize {
    read_u16(p, 10) as usize
}

pub fn superclasses(p: &[u8]) -> Vec<ObjNum> {
    let n = sc_count(p);
    (0..n).map(|i| read_u16(p, OBJ_HDR_SIZE + 2 * i)).collect()
}

pub fn first_superclass(p: &[u8]) -> Option<ObjNum> {
    if sc_count(p) > 0 {
        Some(read_u16(p, OBJ_HDR_SIZE))
    } else {
        None
    }
}

fn first_prop_ofs(p: &[u8]) -> usize {
    OBJ_HDR_SIZE + 2 * sc_count(p)
}

/// One property record, by offset into the payload.
#[derive(Debug, Clone, Copy)]
pub struct PropRec {
    pub ofs: usize,
    pub prop: PropNum,
    pub typ: u8,
    pub flags: u8,
    pub data_size: usize,
}

impl PropRec {
    pub fn data_ofs(&self) -> usize {
        self.ofs + PRP_HDR_SIZE
    }

    pub fn total_size(&self) -> usize {
        PRP_HDR_SIZE + self.data_size
    }
}

fn read_prop_rec(p: &[u8], ofs: usize) -> PropRec {
    PropRec {
        ofs,
        prop: read_u16(p, ofs),
        typ: p[ofs + 2],
        flags: p[ofs + 3],
        data_size: read_u16(p, ofs + 4) as usize,
    }
}

/// Iterate every property record, including ignored and deleted ones.
pub fn prop_records(p: &[u8]) -> Vec<PropRec> {
    let mut recs = Vec::with_capacity(prop_count(p));
    let mut ofs = first_prop_ofs(p);
    let free = free_ofs(p);
    while ofs + PRP_HDR_SIZE <= free {
        let rec = read_prop_rec(p, ofs);
        ofs += rec.total_size();
        recs.push(rec);
    }
    recs
}

/// Find the active (not ignored, not deleted) record for a property.
/// A deleted record hides the property entirely.
pub fn find_prop(p: &[u8], prop: PropNum) -> Option<PropRec> {
    match prop_defined_or_deleted(p, prop) {
        Some(rec) if rec.flags & PRPF_DELETED != 0 => None,
        other => other,
    }
}

/// Find the record that decides this property on this object, counting a
/// deleted record as a decision (the deletion shadows inheritance).
pub fn prop_defined_or_deleted(p: &[u8], prop: PropNum) -> Option<PropRec> {
    let mut found = None;
    for rec in prop_records(p) {
        if rec.prop == prop && rec.flags & PRPF_IGNORE == 0 {
            found = Some(rec);
        }
    }
    found
}

pub fn decode_prop_value(p: &[u8], rec: &PropRec) -> Result<Value, TadsError> {
    let data = &p[rec.data_ofs()..rec.data_ofs() + rec.data_size];
    let (val, _) = Value::decode_payload(rec.typ, data)?;
    Ok(val)
}

/// A property's content: a plain data value, method code to run, or a
/// double-quoted string that prints itself when evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropVal {
    Data(Value),
    Code(Vec<u8>),
    SelfPrint(Vec<u8>),
}

pub fn decode_prop(p: &[u8], rec: &PropRec) -> Result<PropVal, TadsError> {
    let data = &p[rec.data_ofs()..rec.data_ofs() + rec.data_size];
    match rec.typ {
        crate::value::DAT_CODE => Ok(PropVal::Code(data.to_vec())),
        crate::value::DAT_DSTRING => {
            let len = crate::value::read_u16(data, 0) as usize;
            if len < 2 || data.len() < len {
                return Err(TadsError::ReadGame);
            }
            Ok(PropVal::SelfPrint(data[2..len].to_vec()))
        }
        _ => {
            let (val, _) = Value::decode_payload(rec.typ, data)?;
            Ok(PropVal::Data(val))
        }
    }
}

/// Write a property, appending to the mutable region.  An existing mutable
/// record of the same size is overwritten in place; a static record is
/// flagged ignored and shadowed.  Callers go through the cache so dirty
/// tracking and undo see the change.
pub fn set_prop(p: &mut Vec<u8>, prop: PropNum, val: &Value) {
    let mut payload = Vec::with_capacity(val.wire_size());
    val.encode_payload(&mut payload);
    let typ = val.type_code();

    if let Some(rec) = prop_defined_or_deleted(&p[..], prop) {
        if rec.ofs >= reset_ofs(p) {
            if rec.data_size == payload.len() {
                // same-size runtime record: overwrite in place
                p[rec.ofs + 2] = typ;
                p[rec.ofs + 3] = 0;
                let d = rec.data_ofs();
                p[d..d + payload.len()].copy_from_slice(&payload);
                return;
            }
            remove_record(p, &rec);
        } else {
            p[rec.ofs + 3] |= PRPF_IGNORE;
        }
    }

    append_record(p, prop, typ, 0, &payload);
}

/// Delete a property.  Static records are flagged deleted (the flag itself
/// shadows inheritance); runtime records are removed outright.  Returns
/// false if the object has no such property.
pub fn del_prop(p: &mut Vec<u8>, prop: PropNum) -> bool {
    match prop_defined_or_deleted(&p[..], prop) {
        Some(rec) if rec.flags & PRPF_DELETED != 0 => false,
        Some(rec) => {
            if rec.ofs >= reset_ofs(p) {
                remove_record(p, &rec);
                // keep the deletion visible: the shadowed static record, if
                // any, is flagged deleted rather than resurfacing
                if let Some(stat) = {
                    let recs = prop_records(&p[..]);
                    recs.into_iter().find(|r| r.prop == prop)
                } {
                    p[stat.ofs + 3] = (stat.flags | PRPF_DELETED) & !PRPF_IGNORE;
                }
            } else {
                p[rec.ofs + 3] |= PRPF_DELETED;
            }
            true
        }
        None => false,
    }
}

fn remove_record(p: &mut Vec<u8>, rec: &PropRec) {
    let free = free_ofs(p);
    let end = rec.ofs + rec.total_size();
    p.copy_within(end..free, rec.ofs);
    let new_free = free - rec.total_size();
    write_u16(p, 6, new_free as u16);
    let n = prop_count(p) - 1;
    write_u16(p, 4, n as u16);
    p.truncate(new_free);
}

fn append_record(p: &mut Vec<u8>, prop: PropNum, typ: u8, flags: u8, payload: &[u8]) {
    let free = free_ofs(p);
    p.truncate(free);
    p.extend_from_slice(&prop.to_le_bytes());
    p.push(typ);
    p.push(flags);
    p.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    p.extend_from_slice(payload);
    let plen = p.len() as u16;
    write_u16(p, 6, plen);
    let n = prop_count(p) + 1;
    write_u16(p, 4, n as u16);
}

/// Revert an object to its post-compilation state: drop the mutable region
/// and clear the shadowing flags on the static records.
pub fn revert_payload(p: &mut Vec<u8>) {
    let rst = reset_ofs(p);
    p.truncate(rst);
    write_u16(p, 6, rst as u16);
    let stat = static_prop_count(p);
    write_u16(p, 4, stat as u16);
    let recs = prop_records(p);
    for rec in recs {
        p[rec.ofs + 3] &= !(PRPF_IGNORE | PRPF_DELETED);
    }
}

/// Re-derive the ignore flags on static records after a restore has
/// replayed the mutable region: any static record shadowed by a mutable
/// record for the same property is flagged ignored.
pub fn reset_ignore_flags(p: &mut Vec<u8>) {
    let rst = reset_ofs(p);
    let recs = prop_records(p);
    let shadowed: Vec<PropNum> = recs
        .iter()
        .filter(|r| r.ofs >= rst)
        .map(|r| r.prop)
        .collect();
    for rec in recs {
        if rec.ofs < rst {
            if shadowed.contains(&rec.prop) {
                p[rec.ofs + 3] |= PRPF_IGNORE;
            } else {
                p[rec.ofs + 3] &= !PRPF_IGNORE;
            }
        }
    }
}

/// Build a fresh object payload from a superclass list and property values.
/// Everything built this way is static (the reset offset lands at the end),
/// matching what the compiler would have emitted.
pub fn build_payload(class: bool, supers: &[ObjNum], props: &[(PropNum, Value)]) -> Vec<u8> {
    let mut p = vec![0u8; OBJ_HDR_SIZE];
    write_u16(&mut p, 0, if class { OBJF_CLASS } else { 0 });
    write_u16(&mut p, 2, supers.len() as u16);
    for sc in supers {
        p.extend_from_slice(&sc.to_le_bytes());
    }
    for (prop, val) in props {
        let mut payload = Vec::new();
        val.encode_payload(&mut payload);
        p.extend_from_slice(&prop.to_le_bytes());
        p.push(val.type_code());
        p.push(0);
        p.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        p.extend_from_slice(&payload);
    }
    let free = p.len();
    write_u16(&mut p, 4, props.len() as u16);
    write_u16(&mut p, 6, free as u16);
    write_u16(&mut p, 8, free as u16);
    write_u16(&mut p, 10, props.len() as u16);
    p
}

/// Like `build_payload`, with method-code properties as well.  The code
/// payload is a function body (local count + instructions).
pub fn build_payload_with_code(
    class: bool,
    supers: &[ObjNum],
    props: &[(PropNum, Value)],
    methods: &[(PropNum, Vec<u8>)],
) -> Vec<u8> {
    let mut p = build_payload(class, supers, props);
    for (prop, code) in methods {
        p.extend_from_slice(&prop.to_le_bytes());
        p.push(crate::value::DAT_CODE);
        p.push(0);
        p.extend_from_slice(&(code.len() as u16).to_le_bytes());
        p.extend_from_slice(code);
    }
    let n = props.len() + methods.len();
    write_u16(&mut p, 4, n as u16);
    let free = p.len();
    write_u16(&mut p, 6, free as u16);
    write_u16(&mut p, 8, free as u16);
    write_u16(&mut p, 10, n as u16);
    p
}

/// Property lookup with inheritance.  Walks the superclass graph
/// depth-first in declaration order, first match wins.  The explicit
/// worklist and visited set bound the traversal even on a malformed cyclic
/// graph while preserving the first-superclass-first visitation order.
pub fn find_prop_inherited(
    cache: &mut ObjectCache,
    obj: ObjNum,
    prop: PropNum,
) -> Result<Option<(ObjNum, PropVal)>, TadsError> {
    let mut work = vec![obj];
    let mut seen: HashSet<ObjNum> = HashSet::new();
    while let Some(cur) = work.pop() {
        if !seen.insert(cur) {
            continue;
        }
        let (hit, scs) = {
            let guard = cache.lock(cur)?;
            let p = guard.bytes();
            let hit = match prop_defined_or_deleted(p, prop) {
                Some(rec) if rec.flags & PRPF_DELETED != 0 => Some(None),
                Some(rec) => Some(Some(decode_prop(p, &rec)?)),
                None => None,
            };
            (hit, superclasses(p))
        };
        match hit {
            Some(Some(val)) => return Ok(Some((cur, val))),
            Some(None) => continue, // deleted here: this branch stops
            None => {
                // push in reverse so the first superclass is visited first
                for sc in scs.into_iter().rev() {
                    if !seen.contains(&sc) {
                        work.push(sc);
                    }
                }
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        build_payload(
            false,
            &[5, 9],
            &[(20, Value::Number(42)), (21, Value::Str(b"lamp".to_vec()))],
        )
    }

    #[test]
    fn header_fields() {
        let p = sample();
        assert_eq!(sc_count(&p), 2);
        assert_eq!(superclasses(&p), vec![5, 9]);
        assert_eq!(prop_count(&p), 2);
        assert_eq!(free_ofs(&p), p.len());
        assert_eq!(reset_ofs(&p), p.len());
        assert_eq!(static_prop_count(&p), 2);
    }

    #[test]
    fn find_and_decode() {
        let p = sample();
        let rec = find_prop(&p, 21).unwrap();
        assert_eq!(
            decode_prop_value(&p, &rec).unwrap(),
            Value::Str(b"lamp".to_vec())
        );
        assert!(find_prop(&p, 99).is_none());
    }

    #[test]
    fn set_prop_shadows_static() {
        let mut p = sample();
        let rst = reset_ofs(&p);
        set_prop(&mut p, 20, &Value::Number(7));
        let rec = find_prop(&p, 20).unwrap();
        assert!(rec.ofs >= rst);
        assert_eq!(decode_prop_value(&p, &rec).unwrap(), Value::Number(7));
        assert_eq!(prop_count(&p), 3);
        // free offset tracks the payload end exactly
        assert_eq!(free_ofs(&p), p.len());
    }

    #[test]
    fn set_prop_in_place_when_same_size() {
        let mut p = sample();
        set_prop(&mut p, 20, &Value::Number(7));
        let len_before = p.len();
        set_prop(&mut p, 20, &Value::Number(8));
        assert_eq!(p.len(), len_before);
        let rec = find_prop(&p, 20).unwrap();
        assert_eq!(decode_prop_value(&p, &rec).unwrap(), Value::Number(8));
    }

    #[test]
    fn revert_restores_compiled_state() {
        let mut p = sample();
        let orig = p.clone();
        set_prop(&mut p, 20, &Value::Number(7));
        set_prop(&mut p, 30, &Value::True);
        del_prop(&mut p, 21);
        revert_payload(&mut p);
        assert_eq!(p, orig);
    }

    #[test]
    fn delete_static_prop_sticks() {
        let mut p = sample();
        assert!(del_prop(&mut p, 20));
        assert!(find_prop(&p, 20).is_none());
        assert!(!del_prop(&mut p, 20));
        // the deleted record still shadows inheritance
        assert!(prop_defined_or_deleted(&p, 20).is_some());
    }

    #[test]
    fn delete_runtime_record_marks_static() {
        let mut p = sample();
        set_prop(&mut p, 20, &Value::True);
        assert!(del_prop(&mut p, 20));
        assert!(find_prop(&p, 20).is_none());
        let stat = prop_defined_or_deleted(&p, 20).unwrap();
        assert!(stat.flags & PRPF_DELETED != 0);
    }

    #[test]
    fn reset_ignore_after_replay() {
        let mut p = sample();
        set_prop(&mut p, 20, &Value::Number(7));
        // clear every flag, as a revert-then-replay would leave them
        let recs = prop_records(&p);
        for rec in &recs {
            p[rec.ofs + 3] = 0;
        }
        reset_ignore_flags(&mut p);
        let rec = find_prop(&p, 20).unwrap();
        assert!(rec.ofs >= reset_ofs(&p));
    }
}
