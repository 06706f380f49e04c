//! Navigation across layers of a two-speaker transcript.

use annotation_graph::{Alignment, Anchor, Annotation, AnnotationRef, Graph, Layer, Schema};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn make_schema() -> Schema {
    Schema::new()
        .with_participant_layer("who")
        .with_turn_layer("turn")
        .with_utterance_layer("utterance")
        .with_word_layer("word")
        .with_layer(Layer::new("who", None).with_peers(true))
        .with_layer(
            Layer::new("turn", Some("who"))
                .with_alignment(Alignment::Interval)
                .with_peers(true),
        )
        .with_layer(
            Layer::new("utterance", Some("turn"))
                .with_alignment(Alignment::Interval)
                .with_peers(true),
        )
        .with_layer(
            Layer::new("word", Some("turn"))
                .with_alignment(Alignment::Interval)
                .with_peers(true),
        )
        .with_layer(Layer::new("pos", Some("word")))
}

/// Speakers A and B take turns over 0-6:
///
/// ```text
/// 0    1    2    3    4    5    6
/// |- tA1 --|- tB1 --|- tA2 --|
/// |w1 |w2  |w3 |w4  |w5 |w6  |
/// ```
///
/// Each turn holds one utterance; every word carries a `pos` tag.
fn make_graph() -> Graph {
    let mut graph = Graph::new("dialogue").with_schema(make_schema());
    for i in 0..=6 {
        graph.add_anchor(Anchor::new(format!("a{}", i), Some(i as f64))).unwrap();
    }
    for speaker in ["A", "B"] {
        graph
            .add_annotation(Annotation::new("who", speaker).with_id(speaker).with_anchors("a0", "a6"))
            .unwrap();
    }
    for (turn, utterance, speaker, start) in [("tA1", "u1", "A", 0), ("tB1", "u2", "B", 2), ("tA2", "u3", "A", 4)] {
        graph
            .add_annotation(
                Annotation::new("turn", speaker)
                    .with_id(turn)
                    .with_anchors(format!("a{}", start), format!("a{}", start + 2))
                    .with_parent(speaker)
                    .with_child(
                        Annotation::new("utterance", speaker)
                            .with_id(utterance)
                            .with_anchors(format!("a{}", start), format!("a{}", start + 2)),
                    ),
            )
            .unwrap();
        for i in [start + 1, start + 2] {
            graph
                .add_annotation(
                    Annotation::new("word", format!("w{}", i))
                        .with_id(format!("w{}", i))
                        .with_anchors(format!("a{}", i - 1), format!("a{}", i))
                        .with_parent(turn)
                        .with_child(Annotation::new("pos", "N").with_id(format!("pos{}", i))),
                )
                .unwrap();
        }
    }
    graph
}

fn ids(annotations: &[AnnotationRef<'_>]) -> Vec<String> {
    annotations.iter().map(|a| a.id().to_string()).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// HIERARCHY TESTS
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_graph_walks_words_in_time_order() {
    let graph = make_graph();
    let root = graph.root();
    assert_eq!(root.first("word").unwrap().id(), "w1");
    assert_eq!(root.last("word").unwrap().id(), "w6");
    assert_eq!(
        ids(&root.all("word")),
        vec!["w1", "w2", "w3", "w4", "w5", "w6"]
    );
    assert_eq!(ids(&root.all("pos")).len(), 6);
}

#[test]
fn test_speaker_descendants() {
    let graph = make_graph();
    let a = graph.annotation("A").unwrap();
    let b = graph.annotation("B").unwrap();
    assert_eq!(ids(&a.all("utterance")), vec!["u1", "u3"]);
    assert_eq!(ids(&b.all("utterance")), vec!["u2"]);
    assert_eq!(ids(&b.all("word")), vec!["w3", "w4"]);
    assert_eq!(ids(&a.all("pos")), vec!["pos1", "pos2", "pos5", "pos6"]);
}

#[test]
fn test_tag_reaches_every_related_layer() {
    let graph = make_graph();
    let tag = graph.annotation("pos3").unwrap();
    assert_eq!(tag.start_id(), Some("a2"));
    assert_eq!(tag.end_id(), Some("a3"));
    assert_eq!(tag.first("word").unwrap().id(), "w3");
    assert_eq!(tag.first("turn").unwrap().id(), "tB1");
    assert_eq!(tag.first("who").unwrap().id(), "B");
    assert_eq!(tag.first("utterance").unwrap().id(), "u2");
    assert_eq!(tag.ancestors().len(), 4);
}

#[test]
fn test_word_finds_its_utterance() {
    let graph = make_graph();
    for (word, utterance) in [("w1", "u1"), ("w4", "u2"), ("w6", "u3")] {
        let word = graph.annotation(word).unwrap();
        assert_eq!(word.first("utterance").unwrap().id(), utterance);
    }
    let words: Vec<(String, Vec<String>)> = graph
        .words_by_utterance()
        .into_iter()
        .map(|(utterance, words)| (utterance.id().to_string(), ids(&words)))
        .collect();
    assert_eq!(words[1], ("u2".to_string(), vec!["w3".to_string(), "w4".to_string()]));
}

// ─────────────────────────────────────────────────────────────────────────────
// SIBLING TESTS
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_siblings_stay_within_parent() {
    let graph = make_graph();
    let w3 = graph.annotation("w3").unwrap();
    assert_eq!(w3.next().unwrap().id(), "w4");
    assert!(w3.previous().is_none());
    assert!(w3.next().unwrap().next().is_none());

    let first_turn = graph.annotation("tA1").unwrap();
    assert_eq!(first_turn.next().unwrap().id(), "tA2");
}

#[test]
fn test_destroyed_sibling_is_skipped() {
    let mut graph = make_graph();
    graph.destroy("w2").unwrap();
    let w1 = graph.annotation("w1").unwrap();
    assert!(w1.next().is_none());
    assert_eq!(graph.root().all("word").len(), 5);
    assert!(graph.annotation("pos2").unwrap().is_destroyed());
}

// ─────────────────────────────────────────────────────────────────────────────
// ANCHOR TESTS
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_anchor_links_by_layer() {
    let graph = make_graph();
    let anchor = graph.anchor("a2").unwrap();
    assert_eq!(ids(&anchor.starting_on("word")), vec!["w3"]);
    assert_eq!(ids(&anchor.ending_on("word")), vec!["w2"]);
    assert!(anchor.is_start_on("turn"));
    assert!(anchor.is_end_on("utterance"));
    assert!(!anchor.is_start_on("who"));
}

#[test]
fn test_anchor_order() {
    let graph = make_graph();
    let a1 = graph.anchor("a1").unwrap();
    let a4 = graph.anchor("a4").unwrap();
    assert!(a1.precedes(&a4));
    assert!(a4.follows(&a1));
    assert!(!a4.precedes(&a1));
    assert_eq!(a1.preceding().len(), 1);
    assert_eq!(graph.anchor("a0").unwrap().following().len(), 6);

    let a0 = graph.anchor("a0").unwrap();
    let a6 = graph.anchor("a6").unwrap();
    assert_eq!(a0.annotation_to(&a6).unwrap().id(), "A");
    assert!(a6.annotation_to(&a0).is_none());
}
