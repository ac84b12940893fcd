//! Turn-machinery tests driven through the full VM: fuses and daemons
//! executing real bytecode, and undo across turns.

use crate::bif;
use crate::config::Config;
use crate::hostifc::NullHost;
use crate::object::build_payload;
use crate::opcode::{CodeBuf, OPC_RET};
use crate::output::ScriptSink;
use crate::run::StackVal;
use crate::value::Value;
use crate::vm::Session;
use crate::vocab::{SchedKind, PRP_ACTION};

use test_log::test;

fn session() -> Session {
    Session::new(
        Config::default(),
        Box::new(ScriptSink::default()),
        Box::<NullHost>::default(),
    )
}

/// A function that stores its argument into object 60 prop 40.
fn marker_fn() -> Vec<u8> {
    let mut cb = CodeBuf::new(0);
    // value is the function's argument; getarg(1) fetches it
    cb.num(1)
        .builtin(bif::bif_index("getarg").unwrap(), 1)
        .obj(60)
        .setp(40)
        .op(OPC_RET);
    cb.into_code()
}

fn marker_value(sess: &mut Session) -> Option<Value> {
    sess.cache.get_prop_direct(60, 40).unwrap()
}

fn setup(sess: &mut Session) {
    sess.cache
        .alloc_with_num(60, build_payload(false, &[], &[(40, Value::Number(0))]));
    sess.cache.alloc_with_num(700, marker_fn());
}

#[test]
fn fuse_runs_bytecode_on_third_turn() {
    let mut sess = session();
    setup(&mut sess);
    sess.voc
        .set_sched(SchedKind::Fuse, 700, 0, 3, Value::Number(99))
        .unwrap();

    sess.advance_turn(1, true).unwrap();
    sess.advance_turn(1, true).unwrap();
    assert_eq!(marker_value(&mut sess), Some(Value::Number(0)));

    sess.advance_turn(1, true).unwrap();
    assert_eq!(marker_value(&mut sess), Some(Value::Number(99)));

    // the slot is gone; later turns don't refire
    sess.cache.set_prop(60, 40, &Value::Number(0)).unwrap();
    sess.advance_turn(1, true).unwrap();
    assert_eq!(marker_value(&mut sess), Some(Value::Number(0)));
}

#[test]
fn daemon_runs_every_turn_until_removed() {
    let mut sess = session();
    setup(&mut sess);
    sess.voc
        .set_sched(SchedKind::Daemon, 700, 0, 0, Value::Number(5))
        .unwrap();

    sess.advance_turn(1, true).unwrap();
    assert_eq!(marker_value(&mut sess), Some(Value::Number(5)));

    sess.cache.set_prop(60, 40, &Value::Number(0)).unwrap();
    sess.advance_turn(1, false).unwrap(); // schedules skipped
    assert_eq!(marker_value(&mut sess), Some(Value::Number(0)));

    sess.voc
        .rem_sched(SchedKind::Daemon, 700, 0, &Value::Number(5))
        .unwrap();
    sess.advance_turn(1, true).unwrap();
    assert_eq!(marker_value(&mut sess), Some(Value::Number(0)));
}

#[test]
fn notifier_method_fires_on_object() {
    let mut sess = session();
    // object 61 defines prop 41 as a method that sets its own prop 42
    let mut method = CodeBuf::new(0);
    method.num(123).obj(61).setp(42).op(OPC_RET);
    let p = crate::object::build_payload_with_code(
        false,
        &[],
        &[],
        &[(41, method.into_code())],
    );
    sess.cache.alloc_with_num(61, p);

    sess.voc
        .set_sched(SchedKind::Notifier, 61, 41, 2, Value::Nil)
        .unwrap();
    sess.advance_turn(1, true).unwrap();
    assert_eq!(sess.cache.get_prop_direct(61, 42).unwrap(), None);
    sess.advance_turn(1, true).unwrap();
    assert_eq!(
        sess.cache.get_prop_direct(61, 42).unwrap(),
        Some(Value::Number(123))
    );
}

#[test]
fn undo_rolls_back_a_full_turn() {
    let mut sess = session();
    setup(&mut sess);

    // a verb whose action marks the world
    let mut action = CodeBuf::new(0);
    action.num(7).obj(60).setp(40).op(OPC_RET);
    let verb = crate::object::build_payload_with_code(
        false,
        &[],
        &[],
        &[(PRP_ACTION, action.into_code())],
    );
    sess.cache.alloc_with_num(62, verb);
    sess.voc.add_word(
        crate::vocab::WordKey::one(b"mark"),
        62,
        crate::vocab::PRP_VERB,
        0,
    );

    sess.run_command_line(b"mark").unwrap();
    assert_eq!(marker_value(&mut sess), Some(Value::Number(7)));

    // undo through the built-in
    bif::dispatch(&mut sess, bif::bif_index("undo").unwrap(), 0).unwrap();
    assert_eq!(sess.run.pop().unwrap(), StackVal::True);
    assert_eq!(marker_value(&mut sess), Some(Value::Number(0)));

    // a second undo has nothing left and reports nil
    bif::dispatch(&mut sess, bif::bif_index("undo").unwrap(), 0).unwrap();
    assert_eq!(sess.run.pop().unwrap(), StackVal::Nil);
}
