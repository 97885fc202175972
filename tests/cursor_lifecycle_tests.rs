//! Cursor lifecycle: paging, drain, explicit close, idle reaping.

use kvsearch::{Engine, FieldSpec, QueryError, Reply, Value};
use std::time::Duration;

fn argv(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|s| s.to_string()).collect()
}

fn seeded_engine(docs: usize) -> Engine {
    let engine = Engine::with_defaults();
    engine
        .store()
        .create_index("idx", vec![FieldSpec::text("t1")])
        .unwrap();
    for i in 1..=docs {
        engine
            .store()
            .put_document(&format!("d{i}"), vec![("t1", Value::string(format!("value {i}")))]);
    }
    engine
}

/// `(rows, cursor_id)` from a cursor-shaped reply.
fn page(reply: &Reply) -> (usize, i64) {
    let outer = reply.as_array().unwrap();
    let body = outer[0].as_array().unwrap();
    let id = outer[1].as_int().unwrap();
    (body[0].as_int().unwrap() as usize, id)
}

#[test]
fn cursor_pages_until_drained() {
    let engine = seeded_engine(5);
    let reply = engine
        .dispatch(&argv(&[
            "AGGREGATE", "idx", "*", "LOAD", "1", "@t1", "WITHCURSOR", "COUNT", "2",
        ]))
        .unwrap();
    let (rows, id) = page(&reply);
    assert_eq!(rows, 2);
    assert!(id > 0);

    let id_str = id.to_string();
    let reply = engine
        .dispatch(&argv(&["CURSOR", "READ", "idx", &id_str, "COUNT", "2"]))
        .unwrap();
    let (rows, id2) = page(&reply);
    assert_eq!(rows, 2);
    assert_eq!(id2, id);

    // the final page returns the remainder and cursor id 0
    let reply = engine
        .dispatch(&argv(&["CURSOR", "READ", "idx", &id_str, "COUNT", "2"]))
        .unwrap();
    let (rows, id3) = page(&reply);
    assert_eq!(rows, 1);
    assert_eq!(id3, 0);

    // a drained cursor is gone
    let err = engine
        .dispatch(&argv(&["CURSOR", "READ", "idx", &id_str]))
        .unwrap_err();
    assert_eq!(err, QueryError::NoCursor(id as u64));
}

#[test]
fn exact_fit_drains_on_the_boundary_read() {
    let engine = seeded_engine(4);
    let reply = engine
        .dispatch(&argv(&["AGGREGATE", "idx", "*", "WITHCURSOR", "COUNT", "2"]))
        .unwrap();
    let (rows, id) = page(&reply);
    assert_eq!(rows, 2);
    assert!(id > 0);
    let id_str = id.to_string();
    // second page fills exactly; the pipeline pauses before seeing Eof
    let (rows, id2) = page(&engine.dispatch(&argv(&["CURSOR", "READ", "idx", &id_str])).unwrap());
    assert_eq!(rows, 2);
    assert_eq!(id2, id);
    // the next read observes the drain
    let (rows, id3) = page(&engine.dispatch(&argv(&["CURSOR", "READ", "idx", &id_str])).unwrap());
    assert_eq!(rows, 0);
    assert_eq!(id3, 0);
}

#[test]
fn cursor_del_closes_early() {
    let engine = seeded_engine(5);
    let reply = engine
        .dispatch(&argv(&["AGGREGATE", "idx", "*", "WITHCURSOR", "COUNT", "2"]))
        .unwrap();
    let (_, id) = page(&reply);
    let id_str = id.to_string();
    let ok = engine
        .dispatch(&argv(&["CURSOR", "DEL", "idx", &id_str]))
        .unwrap();
    assert_eq!(ok, Reply::Str("OK".to_string()));
    let err = engine
        .dispatch(&argv(&["CURSOR", "READ", "idx", &id_str]))
        .unwrap_err();
    assert_eq!(err, QueryError::NoCursor(id as u64));
}

#[test]
fn cursor_ids_never_recycle() {
    let engine = seeded_engine(5);
    let mut last = 0;
    for _ in 0..3 {
        let reply = engine
            .dispatch(&argv(&["AGGREGATE", "idx", "*", "WITHCURSOR", "COUNT", "1"]))
            .unwrap();
        let (_, id) = page(&reply);
        assert!(id > last);
        last = id;
        engine
            .dispatch(&argv(&["CURSOR", "DEL", "idx", &id.to_string()]))
            .unwrap();
    }
}

#[test]
fn wrong_index_does_not_consume_the_cursor() {
    let engine = seeded_engine(3);
    engine
        .store()
        .create_index("other", vec![FieldSpec::text("t1")])
        .unwrap();
    let reply = engine
        .dispatch(&argv(&["AGGREGATE", "idx", "*", "WITHCURSOR", "COUNT", "1"]))
        .unwrap();
    let (_, id) = page(&reply);
    let id_str = id.to_string();
    let err = engine
        .dispatch(&argv(&["CURSOR", "READ", "other", &id_str]))
        .unwrap_err();
    assert_eq!(err, QueryError::NoCursor(id as u64));
    // still readable under its own index
    assert!(engine
        .dispatch(&argv(&["CURSOR", "READ", "idx", &id_str]))
        .is_ok());
}

#[test]
fn idle_cursors_get_reaped() {
    let engine = seeded_engine(5);
    let reply = engine
        .dispatch(&argv(&[
            "AGGREGATE", "idx", "*", "WITHCURSOR", "COUNT", "1", "MAXIDLE", "30",
        ]))
        .unwrap();
    let (_, id) = page(&reply);
    assert_eq!(engine.cursors().len(), 1);
    // the reaper samples at a quarter of the smallest idle bound
    std::thread::sleep(Duration::from_millis(700));
    assert_eq!(engine.cursors().len(), 0);
    let err = engine
        .dispatch(&argv(&["CURSOR", "READ", "idx", &id.to_string()]))
        .unwrap_err();
    assert_eq!(err, QueryError::NoCursor(id as u64));
}
