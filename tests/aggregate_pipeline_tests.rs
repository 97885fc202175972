//! End-to-end aggregation pipeline tests against the in-memory store.

use kvsearch::{Engine, FieldSpec, Reply, Value};

fn argv(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|s| s.to_string()).collect()
}

/// `{d1: value one, d2: value two, d3: value three}`
fn simple_engine() -> Engine {
    let engine = Engine::with_defaults();
    engine
        .store()
        .create_index("idx", vec![FieldSpec::text("t1")])
        .unwrap();
    engine
        .store()
        .put_document("d1", vec![("t1", Value::string("value one"))]);
    engine
        .store()
        .put_document("d2", vec![("t1", Value::string("value two"))]);
    engine
        .store()
        .put_document("d3", vec![("t1", Value::string("value three"))]);
    engine
}

/// A small games catalog for grouping tests.
fn games_engine() -> Engine {
    let engine = Engine::with_defaults();
    engine
        .store()
        .create_index(
            "games",
            vec![
                FieldSpec::text("title"),
                FieldSpec::tag("brand"),
                FieldSpec::numeric("price"),
            ],
        )
        .unwrap();
    for (key, title, brand, price) in [
        ("g1", "gravity ball", "sony", 10.0),
        ("g2", "space race", "sony", 30.0),
        ("g3", "kart chaos", "nintendo", 50.0),
        ("g4", "pixel quest", "nintendo", 70.0),
        ("g5", "retro pong", "atari", 5.0),
    ] {
        engine.store().put_document(
            key,
            vec![
                ("title", Value::string(title)),
                ("brand", Value::string(brand)),
                ("price", Value::number(price)),
            ],
        );
    }
    engine
}

/// Pull the field map out of a row frame.
fn row_pairs(frame: &Reply) -> Vec<(String, Reply)> {
    frame
        .as_array()
        .unwrap()
        .chunks_exact(2)
        .map(|chunk| (chunk[0].as_str().unwrap().to_string(), chunk[1].clone()))
        .collect()
}

#[test]
fn load_returns_rows_in_doc_id_order() {
    let engine = simple_engine();
    let reply = engine
        .dispatch(&argv(&["AGGREGATE", "idx", "*", "LOAD", "1", "@t1"]))
        .unwrap();
    let frames = reply.as_array().unwrap();
    assert_eq!(frames[0], Reply::Int(3));
    let values: Vec<String> = frames[1..]
        .iter()
        .map(|f| row_pairs(f)[0].1.as_str().unwrap().to_string())
        .collect();
    assert_eq!(values, vec!["value one", "value two", "value three"]);
}

#[test]
fn groupby_with_reducers() {
    let engine = games_engine();
    let reply = engine
        .dispatch(&argv(&[
            "AGGREGATE", "games", "*",
            "GROUPBY", "1", "@brand",
            "REDUCE", "COUNT", "0", "AS", "n",
            "REDUCE", "AVG", "1", "@price", "AS", "avg_price",
        ]))
        .unwrap();
    let frames = reply.as_array().unwrap();
    assert_eq!(frames[0], Reply::Int(3));
    // groups come back in insertion order: sony, nintendo, atari
    let rows: Vec<Vec<(String, Reply)>> = frames[1..].iter().map(row_pairs).collect();
    assert_eq!(rows[0][0], ("brand".to_string(), Reply::Str("sony".to_string())));
    assert_eq!(rows[0][1], ("n".to_string(), Reply::Int(2)));
    assert_eq!(rows[0][2], ("avg_price".to_string(), Reply::Int(20)));
    assert_eq!(rows[1][0].1, Reply::Str("nintendo".to_string()));
    assert_eq!(rows[1][2].1, Reply::Int(60));
    assert_eq!(rows[2][0].1, Reply::Str("atari".to_string()));
    assert_eq!(rows[2][1].1, Reply::Int(1));
}

#[test]
fn filter_and_apply_compose() {
    let engine = games_engine();
    let reply = engine
        .dispatch(&argv(&[
            "AGGREGATE", "games", "*",
            "FILTER", "@price > 10",
            "APPLY", "@price * 2", "AS", "doubled",
            "SORTBY", "2", "@doubled", "ASC",
        ]))
        .unwrap();
    let frames = reply.as_array().unwrap();
    assert_eq!(frames[0], Reply::Int(3));
    let doubled: Vec<i64> = frames[1..]
        .iter()
        .map(|f| {
            row_pairs(f)
                .iter()
                .find(|(name, _)| name == "doubled")
                .unwrap()
                .1
                .as_int()
                .unwrap()
        })
        .collect();
    assert_eq!(doubled, vec![60, 100, 140]);
}

#[test]
fn sortby_desc_with_limit_window() {
    let engine = games_engine();
    let reply = engine
        .dispatch(&argv(&[
            "AGGREGATE", "games", "*",
            "LOAD", "1", "@price",
            "SORTBY", "2", "@price", "DESC",
            "LIMIT", "1", "2",
        ]))
        .unwrap();
    let frames = reply.as_array().unwrap();
    assert_eq!(frames[0], Reply::Int(2));
    let prices: Vec<i64> = frames[1..]
        .iter()
        .map(|f| row_pairs(f)[0].1.as_int().unwrap())
        .collect();
    // 70, 50, 30, 10, 5 windowed by offset 1 count 2
    assert_eq!(prices, vec![50, 30]);
}

#[test]
fn case_expression_short_circuits_in_apply() {
    let engine = games_engine();
    // the false branch divides by zero; short-circuit keeps it inert
    let reply = engine
        .dispatch(&argv(&[
            "AGGREGATE", "games", "*",
            "FILTER", "@brand == 'atari'",
            "APPLY", "case(1, @price + 10, @price / 0)", "AS", "adjusted",
        ]))
        .unwrap();
    let frames = reply.as_array().unwrap();
    assert_eq!(frames[0], Reply::Int(1));
    let pairs = row_pairs(&frames[1]);
    let adjusted = pairs.iter().find(|(n, _)| n == "adjusted").unwrap();
    assert_eq!(adjusted.1, Reply::Int(15));
}

#[test]
fn groupby_splits_array_values() {
    let engine = Engine::with_defaults();
    engine
        .store()
        .create_index("docs", vec![FieldSpec::text("body"), FieldSpec::tag("tags")])
        .unwrap();
    engine.store().put_document(
        "a",
        vec![
            ("body", Value::string("alpha")),
            ("tags", Value::array(vec![Value::string("x"), Value::string("y")])),
        ],
    );
    engine.store().put_document(
        "b",
        vec![
            ("body", Value::string("beta")),
            ("tags", Value::array(vec![Value::string("y")])),
        ],
    );
    let reply = engine
        .dispatch(&argv(&[
            "AGGREGATE", "docs", "*",
            "GROUPBY", "1", "@tags",
            "REDUCE", "COUNT", "0", "AS", "n",
        ]))
        .unwrap();
    let frames = reply.as_array().unwrap();
    assert_eq!(frames[0], Reply::Int(2));
    let rows: Vec<Vec<(String, Reply)>> = frames[1..].iter().map(row_pairs).collect();
    assert_eq!(rows[0][0].1, Reply::Str("x".to_string()));
    assert_eq!(rows[0][1].1, Reply::Int(1));
    assert_eq!(rows[1][0].1, Reply::Str("y".to_string()));
    assert_eq!(rows[1][1].1, Reply::Int(2));
}

#[test]
fn expired_field_sorts_as_null() {
    let engine = games_engine();
    engine.store().expire_field("g4", "price");
    let reply = engine
        .dispatch(&argv(&[
            "AGGREGATE", "games", "*",
            "LOAD", "1", "@price",
            "SORTBY", "2", "@price", "ASC",
        ]))
        .unwrap();
    let frames = reply.as_array().unwrap();
    assert_eq!(frames[0], Reply::Int(5));
    // the expired row reads Null and sorts first; its field is omitted
    assert!(row_pairs(&frames[1]).is_empty());
    let rest: Vec<i64> = frames[2..]
        .iter()
        .map(|f| row_pairs(f)[0].1.as_int().unwrap())
        .collect();
    assert_eq!(rest, vec![5, 10, 30, 50]);
}

#[test]
fn unknown_field_fails_at_bind_time() {
    let engine = games_engine();
    let err = engine
        .dispatch(&argv(&["AGGREGATE", "games", "*", "FILTER", "@ghost > 1"]))
        .unwrap_err();
    assert_eq!(err, kvsearch::QueryError::NoField("ghost".to_string()));
}

#[test]
fn load_star_fetches_all_schema_fields() {
    let engine = games_engine();
    let reply = engine
        .dispatch(&argv(&["AGGREGATE", "games", "pong", "LOAD", "*"]))
        .unwrap();
    let frames = reply.as_array().unwrap();
    assert_eq!(frames[0], Reply::Int(1));
    let names: Vec<String> = row_pairs(&frames[1]).iter().map(|(n, _)| n.clone()).collect();
    assert_eq!(names, vec!["title", "brand", "price"]);
}

#[test]
fn metadata_operators_read_the_source_document() {
    let engine = games_engine();
    // g5 is the only atari title; hasprefix matches the key space,
    // hasfield probes the stored hash
    let reply = engine
        .dispatch(&argv(&[
            "AGGREGATE", "games", "*",
            "FILTER", "hasprefix('g') && hasfield('price') && @brand == 'atari'",
            "LOAD", "1", "@title",
        ]))
        .unwrap();
    let frames = reply.as_array().unwrap();
    assert_eq!(frames[0], Reply::Int(1));

    let reply = engine
        .dispatch(&argv(&["AGGREGATE", "games", "*", "FILTER", "hasfield('missing_field')"]))
        .unwrap();
    assert_eq!(reply.as_array().unwrap()[0], Reply::Int(0));
}

#[test]
fn term_query_matches_subset() {
    let engine = games_engine();
    let reply = engine
        .dispatch(&argv(&[
            "AGGREGATE", "games", "sony", "GROUPBY", "1", "@brand", "REDUCE", "COUNT", "0", "AS", "n",
        ]))
        .unwrap();
    let frames = reply.as_array().unwrap();
    assert_eq!(frames[0], Reply::Int(1));
    let pairs = row_pairs(&frames[1]);
    assert_eq!(pairs[0].1, Reply::Str("sony".to_string()));
    assert_eq!(pairs[1].1, Reply::Int(2));
}
