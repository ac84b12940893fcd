//! Object and reflection built-ins.

use crate::bif::{check_argc, pop_num_checked};
use crate::errors::TadsError;
use crate::object;
use crate::run::StackVal;
use crate::value::{DAT_DEMAND, DAT_LIST, DAT_NIL, OBJ_INVALID};
use crate::vm::Session;

/// datatype(val): the type code of any value, as a number.
pub fn datatype(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    let v = sess.run.pop()?;
    sess.run.push_num(v.type_code() as i32)
}

/// getarg(n): the current function's nth argument.
pub fn getarg(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    let n = pop_num_checked(sess, "getarg")?;
    if n < 1 {
        return Err(TadsError::BifArgValue("getarg"));
    }
    let val = sess.run.get_arg(n as usize)?;
    sess.run.push(val)
}

/// isclass(obj, cls): transitive superclass test; nil for a nil object.
pub fn isclass(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 2)?;
    if sess.run.top_type()? == DAT_NIL {
        sess.run.discard()?;
        sess.run.discard()?;
        return sess.run.push(StackVal::Nil);
    }
    let obj = sess.run.pop_obj()?;
    let cls = sess.run.pop_obj()?;
    let result = sess.voc.is_class(obj, cls);
    sess.run.push_logical(result)
}

/// firstsc(obj): the first superclass from the object's own header.
pub fn firstsc(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 1)?;
    let obj = sess.run.pop_obj()?;
    let sc = {
        let guard = sess.cache.lock(obj)?;
        object::first_superclass(guard.bytes())
    };
    sess.run.push_obj(sc.unwrap_or(OBJ_INVALID))
}

/// firstobj([cls]): the first non-class object, optionally filtered.
pub fn firstobj(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    let cls = match argc {
        0 => None,
        1 => Some(sess.run.pop_obj()?),
        _ => return Err(TadsError::BifArgCount),
    };
    let obj = sess.voc.first_obj(cls);
    sess.run.push_obj(obj.unwrap_or(OBJ_INVALID))
}

/// nextobj(prev [, cls]): the next object after `prev` in numeric order.
pub fn nextobj(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    let prev = sess.run.pop_obj()?;
    let cls = match argc {
        1 => None,
        2 => Some(sess.run.pop_obj()?),
        _ => return Err(TadsError::BifArgCount),
    };
    let obj = sess.voc.next_obj(prev, cls);
    sess.run.push_obj(obj.unwrap_or(OBJ_INVALID))
}

const DEFINED_ANY: i32 = 1;
const DEFINED_DIRECTLY: i32 = 2;
const DEFINED_INHERITS: i32 = 3;
const DEFINED_GET_CLASS: i32 = 4;

/// defined(obj, prop [, flag]): whether and where a property is defined.
/// The flag selects the question being asked; an unknown flag value is a
/// script bug.
pub fn defined(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    let obj = sess.run.pop_obj()?;
    let prop = sess.run.pop_prop()?;
    let flag = match argc {
        2 => DEFINED_ANY,
        3 => pop_num_checked(sess, "defined")?,
        _ => return Err(TadsError::BifArgCount),
    };

    let found = object::find_prop_inherited(&mut sess.cache, obj, prop)?;
    match flag {
        DEFINED_ANY => sess.run.push_logical(found.is_some()),
        DEFINED_DIRECTLY => {
            sess.run
                .push_logical(matches!(found, Some((def, _)) if def == obj))
        }
        DEFINED_INHERITS => {
            sess.run
                .push_logical(matches!(found, Some((def, _)) if def != obj))
        }
        DEFINED_GET_CLASS => match found {
            Some((def, _)) => sess.run.push_obj(def),
            None => sess.run.push(StackVal::Nil),
        },
        _ => Err(TadsError::BifArgValue("defined")),
    }
}

/// proptype(obj, prop): the type code the property would evaluate to; nil
/// type for an undefined property, and demand-loaded contents report as
/// lists.
pub fn proptype(sess: &mut Session, argc: usize) -> Result<(), TadsError> {
    check_argc(argc, 2)?;
    let obj = sess.run.pop_obj()?;
    let prop = sess.run.pop_prop()?;

    let mut typ = DAT_NIL;
    if let Some((def, _)) = object::find_prop_inherited(&mut sess.cache, obj, prop)? {
        let guard = sess.cache.lock(def)?;
        if let Some(rec) = object::find_prop(guard.bytes(), prop) {
            typ = rec.typ;
        }
    }
    if typ == DAT_DEMAND {
        typ = DAT_LIST;
    }
    sess.run.push_num(typ as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bif;
    use crate::object::build_payload;
    use crate::value::Value;
    use crate::vocab::VOCIF_CLASS;

    fn session() -> Session {
        let mut sess = Session::new(
            crate::config::Config::default(),
            Box::new(crate::output::ScriptSink::default()),
            Box::<crate::hostifc::NullHost>::default(),
        );
        // class chain: 3 <- 2 <- 1, plus unrelated 4
        sess.cache
            .alloc_with_num(3, build_payload(true, &[], &[(20, Value::Number(9))]));
        sess.cache.alloc_with_num(2, build_payload(true, &[3], &[]));
        sess.cache.alloc_with_num(
            1,
            build_payload(false, &[2], &[(21, Value::Str(b"own".to_vec()))]),
        );
        sess.cache.alloc_with_num(4, build_payload(true, &[], &[]));
        sess.voc.add_inh(3, VOCIF_CLASS, vec![], OBJ_INVALID);
        sess.voc.add_inh(2, VOCIF_CLASS, vec![3], OBJ_INVALID);
        sess.voc.add_inh(1, 0, vec![2], OBJ_INVALID);
        sess.voc.add_inh(4, VOCIF_CLASS, vec![], OBJ_INVALID);
        sess
    }

    fn call(sess: &mut Session, name: &str, argc: usize) -> Result<(), TadsError> {
        bif::dispatch(sess, bif::bif_index(name).unwrap(), argc)
    }

    #[test]
    fn isclass_transitive_and_negative() {
        let mut sess = session();
        sess.run.push(StackVal::Object(3)).unwrap();
        sess.run.push(StackVal::Object(1)).unwrap();
        call(&mut sess, "isclass", 2).unwrap();
        assert_eq!(sess.run.pop().unwrap(), StackVal::True);

        sess.run.push(StackVal::Object(4)).unwrap();
        sess.run.push(StackVal::Object(1)).unwrap();
        call(&mut sess, "isclass", 2).unwrap();
        assert_eq!(sess.run.pop().unwrap(), StackVal::Nil);

        // nil object: nil result, args consumed
        sess.run.push(StackVal::Object(3)).unwrap();
        sess.run.push(StackVal::Nil).unwrap();
        call(&mut sess, "isclass", 2).unwrap();
        assert_eq!(sess.run.pop().unwrap(), StackVal::Nil);
        assert!(sess.run.stack.is_empty());
    }

    #[test]
    fn firstsc_reads_object_header() {
        let mut sess = session();
        sess.run.push(StackVal::Object(1)).unwrap();
        call(&mut sess, "firstsc", 1).unwrap();
        assert_eq!(sess.run.pop_obj().unwrap(), 2);

        sess.run.push(StackVal::Object(3)).unwrap();
        call(&mut sess, "firstsc", 1).unwrap();
        assert_eq!(sess.run.pop().unwrap(), StackVal::Nil);
    }

    #[test]
    fn object_iteration_skips_classes() {
        let mut sess = session();
        call(&mut sess, "firstobj", 0).unwrap();
        assert_eq!(sess.run.pop_obj().unwrap(), 1);
        sess.run.push(StackVal::Object(1)).unwrap();
        call(&mut sess, "nextobj", 1).unwrap();
        assert_eq!(sess.run.pop().unwrap(), StackVal::Nil);
    }

    #[test]
    fn defined_flag_modes() {
        let mut sess = session();
        // own property: defined directly
        sess.run.push(StackVal::PropNum(21)).unwrap();
        sess.run.push(StackVal::Object(1)).unwrap();
        call(&mut sess, "defined", 2).unwrap();
        assert_eq!(sess.run.pop().unwrap(), StackVal::True);

        sess.run.push_num(DEFINED_DIRECTLY).unwrap();
        sess.run.push(StackVal::PropNum(21)).unwrap();
        sess.run.push(StackVal::Object(1)).unwrap();
        call(&mut sess, "defined", 3).unwrap();
        assert_eq!(sess.run.pop().unwrap(), StackVal::True);

        // inherited property
        sess.run.push_num(DEFINED_INHERITS).unwrap();
        sess.run.push(StackVal::PropNum(20)).unwrap();
        sess.run.push(StackVal::Object(1)).unwrap();
        call(&mut sess, "defined", 3).unwrap();
        assert_eq!(sess.run.pop().unwrap(), StackVal::True);

        // which class defines it
        sess.run.push_num(DEFINED_GET_CLASS).unwrap();
        sess.run.push(StackVal::PropNum(20)).unwrap();
        sess.run.push(StackVal::Object(1)).unwrap();
        call(&mut sess, "defined", 3).unwrap();
        assert_eq!(sess.run.pop_obj().unwrap(), 3);

        // invalid flag is a script bug
        sess.run.push_num(99).unwrap();
        sess.run.push(StackVal::PropNum(20)).unwrap();
        sess.run.push(StackVal::Object(1)).unwrap();
        assert_eq!(
            call(&mut sess, "defined", 3).unwrap_err(),
            TadsError::BifArgValue("defined")
        );
    }

    #[test]
    fn proptype_reports_wire_type() {
        let mut sess = session();
        sess.run.push(StackVal::PropNum(20)).unwrap();
        sess.run.push(StackVal::Object(1)).unwrap();
        call(&mut sess, "proptype", 2).unwrap();
        assert_eq!(sess.run.pop_num().unwrap(), crate::value::DAT_NUMBER as i32);

        sess.run.push(StackVal::PropNum(99)).unwrap();
        sess.run.push(StackVal::Object(1)).unwrap();
        call(&mut sess, "proptype", 2).unwrap();
        assert_eq!(sess.run.pop_num().unwrap(), DAT_NIL as i32);
    }

    #[test]
    fn datatype_and_getarg() {
        let mut sess = session();
        sess.run.push_str_bytes(b"x").unwrap();
        call(&mut sess, "datatype", 1).unwrap();
        assert_eq!(
            sess.run.pop_num().unwrap(),
            crate::value::DAT_SSTRING as i32
        );

        // getarg outside any frame is a stack error
        sess.run.push_num(1).unwrap();
        assert!(call(&mut sess, "getarg", 1).is_err());
    }
}
