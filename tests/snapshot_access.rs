//! Integration tests for snapshot loading and entity references
//!
//! Builds snapshots in memory, loads them through the database, and checks
//! that relationships, id lookups and the verification gate hold.

use gamescript::runtime::{
    ActorSpec, ConversationSpec, Database, EdgeSpec, EdgeType, NodeSpec, NodeType, PropertyType,
    PropertyValue, SnapshotBuilder,
};
use proptest::prelude::*;

/// Two conversations, actors, properties and a hidden edge
fn sample(id_base: i32, locale: &str) -> SnapshotBuilder {
    let mut b = SnapshotBuilder::new(1, locale);
    let hero = b.add_actor(ActorSpec::new(id_base + 1, "Hero"));
    let mood = b.add_property_template(id_base + 1, "mood", PropertyType::String);
    let weight = b.add_property_template(id_base + 2, "weight", PropertyType::Integer);
    b.add_localization(id_base + 1, "greeting", "Hello there");

    for c in 0..2 {
        let conv = b.add_conversation(ConversationSpec::new(id_base + 10 + c, format!("Conv{}", c)));
        let base = id_base + 100 * (c + 1);
        let root = b.add_node(NodeSpec::root(base, conv));
        let a = b.add_node(NodeSpec::dialogue(base + 1, conv).actor(hero).voice("A"));
        let z = b.add_node(NodeSpec::logic(base + 2, conv).with_condition());
        b.add_edge(EdgeSpec::new(base, root, a));
        b.add_edge(EdgeSpec::new(base + 1, a, z).priority(2));
        b.add_edge(EdgeSpec::new(base + 2, a, root).hidden());
        b.add_node_property(a, mood, PropertyValue::String("calm"));
        b.add_node_property(a, weight, PropertyValue::Integer(7));
        b.add_conversation_property(conv, weight, PropertyValue::Integer(c));
    }
    b
}

fn load(builder: &SnapshotBuilder) -> Database {
    let mut db = Database::new();
    db.load_snapshot_bytes(builder.build()).unwrap();
    db
}

#[test]
fn test_relationships_survive_load() {
    let db = load(&sample(0, "en"));
    assert_eq!(db.conversation_count(), 2);
    assert_eq!(db.node_count(), 6);
    assert_eq!(db.edge_count(), 6);

    for conversation in db.conversations() {
        let root = conversation.root_node();
        assert!(root.is_root());
        assert_eq!(root.conversation(), conversation);

        for node in conversation.nodes() {
            assert_eq!(node.conversation().id(), conversation.id());
            for edge in node.outgoing_edges() {
                assert_eq!(edge.source(), node);
                assert_eq!(edge.conversation(), conversation);
                assert!(edge.target().incoming_edges().any(|e| e == edge));
            }
        }
    }

    let a = db.find_node(101);
    assert_eq!(a.node_type(), NodeType::Dialogue);
    assert_eq!(a.actor().name(), "Hero");
    assert_eq!(a.outgoing_edge_count(), 2);
    assert_eq!(a.outgoing_edge(0).priority(), 2);
    assert_eq!(a.outgoing_edge(1).edge_type(), EdgeType::Hidden);

    let mood = a.find_property("mood").unwrap();
    assert_eq!(mood.template().property_type(), PropertyType::String);
    assert_eq!(mood.try_get_string(), Some("calm"));
    assert_eq!(mood.try_get_integer(), None);
    assert_eq!(mood.integer_value(), 0);
    assert_eq!(a.find_property("weight").unwrap().integer_value(), 7);

    let conv1 = db.find_conversation(11);
    assert_eq!(conv1.find_property("weight").unwrap().integer_value(), 1);
    assert_eq!(db.find_localization(1).text(), "Hello there");
}

#[test]
fn test_corrupt_load_keeps_previous_snapshot() {
    let mut db = load(&sample(0, "en"));
    let hash = db.content_hash();

    let mut corrupt = sample(0, "en").build();
    corrupt.truncate(corrupt.len() / 2);
    assert!(db.load_snapshot_bytes(corrupt).is_err());

    let mut bad_magic = sample(0, "en").build();
    bad_magic[0] = b'X';
    assert!(db.load_snapshot_bytes(bad_magic).is_err());

    assert_eq!(db.content_hash(), hash);
    assert_eq!(db.conversation_count(), 2);
    assert_eq!(db.find_node(101).voice_text(), "A");
}

#[test]
fn test_id_maps_are_replaced_on_reload() {
    let mut db = load(&sample(0, "en"));
    let first_ids: Vec<i32> = (0..db.node_count() as i32).map(|i| db.node(i).id()).collect();
    for id in &first_ids {
        assert_eq!(db.find_node(*id).id(), *id);
    }
    assert!(!db.find_node(5000).is_valid());

    db.load_snapshot_bytes(sample(1000, "fr").build()).unwrap();
    assert_eq!(db.locale_name(), "fr");
    for id in &first_ids {
        assert!(!db.find_node(*id).is_valid());
    }
    assert_eq!(db.find_node(1101).id(), 1101);
    assert_eq!(db.find_actor(1001).name(), "Hero");
    assert!(!db.find_actor(1).is_valid());
}

#[test]
fn test_references_outliving_their_position_are_invalid() {
    let db = load(&sample(0, "en"));
    let node = db.node(db.node_count() as i32);
    assert!(!node.is_valid());
    assert_eq!(node.id(), -1);
    assert_eq!(node.voice_text(), "");
    assert!(!node.conversation().is_valid());
    assert_eq!(node.outgoing_edges().count(), 0);

    let empty = Database::new();
    assert!(!empty.node(0).is_valid());
    assert!(!empty.find_conversation(10).is_valid());
}

proptest! {
    #[test]
    fn prop_flipped_byte_never_panics_or_corrupts(pos in 0usize..4096, value in any::<u8>()) {
        let mut db = load(&sample(0, "en"));
        let mut bytes = sample(0, "en").build();
        let pos = pos % bytes.len();
        bytes[pos] = value;

        if db.load_snapshot_bytes(bytes).is_ok() {
            // every reference must still resolve without panicking
            for conversation in db.conversations() {
                for node in conversation.nodes() {
                    let _ = node.voice_text();
                    let _ = node.actor().name();
                    for edge in node.outgoing_edges() {
                        let _ = edge.target().id();
                    }
                    for property in node.properties() {
                        let _ = property.value();
                    }
                }
            }
        } else {
            prop_assert_eq!(db.find_node(101).voice_text(), "A");
        }
    }

    #[test]
    fn prop_truncation_is_rejected(cut in 1usize..64) {
        let mut db = Database::new();
        let bytes = sample(0, "en").build();
        let len = bytes.len().saturating_sub(cut);
        prop_assert!(db.load_snapshot_bytes(bytes[..len].to_vec()).is_err());
        prop_assert!(!db.is_loaded());
    }
}
