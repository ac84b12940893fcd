//! End-to-end game image tests: build a minimal game, load it through a
//! real session, and drive the tokenizer/parser against it.

use tadpole::bif;
use tadpole::config::Config;
use tadpole::gamebuild::GameBuilder;
use tadpole::hostifc::NullHost;
use tadpole::opcode::{CodeBuf, OPC_RET};
use tadpole::output::ScriptSink;
use tadpole::value::Value;
use tadpole::vm::Session;
use tadpole::vocab::{PRP_ACTION, PRP_ADJ, PRP_NOUN, PRP_VERB};

fn minimal_game(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("minimal.gam");
    let mut gb = GameBuilder::new();

    // a class-flagged superclass with one instance carrying vocabulary
    gb.object(100, true, &[], &[(20, Value::Number(1))]);
    gb.object(101, false, &[100], &[(21, Value::Str(b"a brass lamp".to_vec()))]);
    gb.word(b"lamp", PRP_NOUN, 101);
    gb.word(b"brass", PRP_ADJ, 101);

    // a verb whose action prints
    let mut action = CodeBuf::new(0);
    action.say(b"Taken.\\n").op(OPC_RET);
    gb.object_raw(102, false, &[], {
        tadpole::object::build_payload_with_code(
            false,
            &[],
            &[],
            &[(PRP_ACTION, action.into_code())],
        )
    });
    gb.word(b"take", PRP_VERB, 102);

    gb.me(101);
    gb.write_to(&path).unwrap();
    path
}

fn session_for(path: &std::path::Path) -> (Session, std::rc::Rc<std::cell::RefCell<Vec<u8>>>) {
    let sink = ScriptSink::default();
    let out = sink.output_handle();
    let mut sess = Session::new(Config::default(), Box::new(sink), Box::new(NullHost));
    sess.init_character_map();
    sess.load_game(path).unwrap();
    (sess, out)
}

#[test]
fn load_resolves_class_and_vocabulary() {
    let dir = tempfile::tempdir().unwrap();
    let path = minimal_game(dir.path());
    let (mut sess, _) = session_for(&path);

    assert_eq!(sess.voc.me, 101);
    assert!(sess.voc.is_class(101, 100));
    assert_eq!(
        sess.cache.get_prop_direct(101, 21).unwrap(),
        Some(Value::Str(b"a brass lamp".to_vec()))
    );
}

#[test]
fn tokenize_builtin_returns_words_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = minimal_game(dir.path());
    let (mut sess, _) = session_for(&path);

    sess.run.push_str_bytes(b"look at it").unwrap();
    bif::dispatch(&mut sess, bif::bif_index("parserTokenize").unwrap(), 1).unwrap();
    let tokens = sess.run.pop_list_items().unwrap();
    assert_eq!(
        tokens,
        vec![
            Value::Str(b"look".to_vec()),
            Value::Str(b"at".to_vec()),
            Value::Str(b"it".to_vec()),
        ]
    );
}

#[test]
fn command_runs_verb_action_and_binds_it() {
    let dir = tempfile::tempdir().unwrap();
    let path = minimal_game(dir.path());
    let (mut sess, out) = session_for(&path);

    sess.run_command_line(b"take brass lamp").unwrap();
    assert_eq!(*out.borrow(), b"Taken.\n");
    // the pronoun now refers to the lamp
    assert_eq!(sess.voc.it, 101);

    out.borrow_mut().clear();
    sess.run_command_line(b"take it").unwrap();
    assert_eq!(*out.borrow(), b"Taken.\n");
}

#[test]
fn unknown_words_report_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let path = minimal_game(dir.path());
    let (mut sess, out) = session_for(&path);

    sess.run_command_line(b"take xyzzy").unwrap();
    let text = out.borrow().clone();
    let text = String::from_utf8_lossy(&text).into_owned();
    assert!(text.contains("xyzzy"), "got: {text}");
}

#[test]
fn object_iteration_sees_instances_not_classes() {
    let dir = tempfile::tempdir().unwrap();
    let path = minimal_game(dir.path());
    let (mut sess, _) = session_for(&path);

    bif::dispatch(&mut sess, bif::bif_index("firstobj").unwrap(), 0).unwrap();
    let first = sess.run.pop_obj().unwrap();
    assert_eq!(first, 101);
}
