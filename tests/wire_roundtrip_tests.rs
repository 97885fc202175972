//! Property round-trips for the wire blobs and expression dumps.

use kvsearch::doc_meta::DocIdMeta;
use kvsearch::expr;
use kvsearch::wire::{
    deserialize_doc_ids, deserialize_slot_ranges, serialize_doc_ids, serialize_slot_ranges,
    SlotRange,
};
use proptest::prelude::*;

proptest! {
    #[test]
    fn slot_ranges_round_trip(
        pairs in prop::collection::vec((any::<u16>(), any::<u16>()), 0..64)
    ) {
        let ranges: Vec<SlotRange> = pairs
            .into_iter()
            .map(|(start, end)| SlotRange { start, end })
            .collect();
        let buf = serialize_slot_ranges(&ranges);
        prop_assert_eq!(buf.len(), 4 + ranges.len() * 4);
        prop_assert_eq!(deserialize_slot_ranges(&buf).unwrap(), ranges);
    }

    #[test]
    fn slot_ranges_reject_truncation(
        pairs in prop::collection::vec((any::<u16>(), any::<u16>()), 1..16),
        cut in 1usize..4,
    ) {
        let ranges: Vec<SlotRange> = pairs
            .into_iter()
            .map(|(start, end)| SlotRange { start, end })
            .collect();
        let buf = serialize_slot_ranges(&ranges);
        prop_assert!(deserialize_slot_ranges(&buf[..buf.len() - cut]).is_err());
    }

    #[test]
    fn doc_ids_round_trip(ids in prop::collection::vec(any::<u64>(), 0..128)) {
        let buf = serialize_doc_ids(&ids);
        prop_assert_eq!(deserialize_doc_ids(&buf).unwrap(), ids);
    }

    #[test]
    fn doc_meta_blob_round_trips(
        entries in prop::collection::vec((0usize..32, 1u64..u64::MAX), 1..16)
    ) {
        let mut meta = DocIdMeta::new();
        for (slot, id) in &entries {
            meta.set(*slot, *id).unwrap();
        }
        let back = DocIdMeta::from_blob(&meta.to_blob()).unwrap();
        prop_assert_eq!(back, meta);
    }
}

/// `parse(dump(parse(s))) == parse(s)` over a corpus of realistic
/// expressions.
#[test]
fn expression_dump_round_trips() {
    let corpus = [
        "@price",
        "1 + 2 * 3 - 4 / 5 % 6",
        "2 ^ 3 ^ 4",
        "!@flag && (@a < @b || @c >= 10)",
        "case(@x == null, 'none', format('%s', @x))",
        "sqrt(@a ^ 2 + @b ^ 2)",
        "upper(substr(@name, 0, 3)) == 'ABC'",
        "hasfield('title') || hasprefix('doc:')",
        "exists(@maybe) && @maybe != 0",
        "timefmt(day(@ts))",
        "-3.5e2 + @x",
        "case(1, @foo + 10, @foo / 0)",
    ];
    for src in corpus {
        let once = expr::parse(src).unwrap();
        let dumped = once.dump();
        let twice = expr::parse(&dumped).unwrap();
        assert_eq!(once, twice, "round-trip failed: `{src}` → `{dumped}`");
        // and the dump is a fixed point
        assert_eq!(dumped, twice.dump());
    }
}

#[test]
fn obfuscated_dumps_hide_every_literal() {
    let e = expr::parse("@user == 'alice' && @token != 'se\\'cret' && @n > 12345").unwrap();
    let masked = e.dump_obfuscated();
    assert!(!masked.contains("alice"));
    assert!(!masked.contains("cret"));
    assert!(!masked.contains("12345"));
    // structure and property names survive
    assert!(masked.contains("@user"));
    assert!(masked.contains("&&"));
}
