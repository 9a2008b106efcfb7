use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use screen_canvas::graph::{GraphState, check_invariants, from_node_list, serialize};
use screen_canvas::persistence::RemoteDocument;
use screen_canvas::session::{DocumentStore, Edit, EditorSession};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Script {
    screen: String,
    edits: Vec<Edit>,
    expect: Expectation,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Expectation {
    root_ids: Vec<String>,
    selection_id: Option<String>,
    children: BTreeMap<String, Vec<String>>,
    /// Keyed by `<parent>.<slot>`.
    slots: BTreeMap<String, Vec<String>>,
    parents: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
    absent: Vec<String>,
}

fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

fn load_screen(name: &str) -> RemoteDocument {
    let path = fixtures_dir().join("screens").join(name);
    let contents = std::fs::read_to_string(&path).expect("screen fixture read failed");
    serde_json::from_str(&contents).expect("screen fixture parse failed")
}

fn check_expectation(state: &GraphState, expect: &Expectation, fixture: &str) {
    assert_eq!(*state.root_ids, expect.root_ids, "{fixture}: root ids");
    assert_eq!(state.selection_id, expect.selection_id, "{fixture}: selection");
    for (id, children) in &expect.children {
        let node = state
            .node(id)
            .unwrap_or_else(|| panic!("{fixture}: missing node {id}"));
        assert_eq!(&node.child_ids, children, "{fixture}: children of {id}");
    }
    for (key, ids) in &expect.slots {
        let (parent, slot) = key.split_once('.').expect("slot key is parent.slot");
        let node = state
            .node(parent)
            .unwrap_or_else(|| panic!("{fixture}: missing node {parent}"));
        assert_eq!(
            node.slot_child_ids.get(slot),
            Some(ids),
            "{fixture}: slot {key}"
        );
    }
    for (id, parent) in &expect.parents {
        let node = state.node(id).expect("node with expected parent");
        assert_eq!(node.parent_id.as_deref(), Some(parent.as_str()), "{fixture}: parent of {id}");
    }
    for (id, label) in &expect.labels {
        let node = state.node(id).expect("node with expected label");
        assert_eq!(node.label.as_deref(), Some(label.as_str()), "{fixture}: label of {id}");
    }
    for id in &expect.absent {
        assert!(!state.contains(id), "{fixture}: {id} should be gone");
    }
}

#[test]
fn run_all_edit_scripts() {
    let candidates = [
        "build_from_empty.json",
        "move_between_roots.json",
        "patch_and_remove.json",
        "refused_moves.json",
        "reorder_and_slots.json",
    ];

    for fixture in candidates {
        let path = fixtures_dir().join("scripts").join(fixture);
        let contents = std::fs::read_to_string(&path).expect("script read failed");
        let script: Script = serde_json::from_str(&contents).expect("script parse failed");
        let screen = load_screen(&script.screen);

        let session = EditorSession::new(DocumentStore::new(from_node_list(&screen.nodes)));
        for edit in &script.edits {
            session.apply(edit);
        }
        let state = session.state();
        check_expectation(&state, &script.expect, fixture);

        let violations = check_invariants(&state);
        assert!(violations.is_empty(), "{fixture}: {violations:?}");

        let reloaded = from_node_list(&serialize(&state));
        assert_eq!(*reloaded.nodes, *state.nodes, "{fixture}: serialize round trip");
        assert_eq!(reloaded.root_ids, state.root_ids, "{fixture}: root order");
    }
}

#[test]
fn refused_edits_keep_the_same_snapshot() {
    let screen = load_screen("landing.json");
    let session = EditorSession::new(DocumentStore::new(from_node_list(&screen.nodes)));
    let before = session.state();

    let edits: Vec<Edit> = serde_json::from_value(json!([
        { "op": "reparent", "id": "root", "parentId": "cta" },
        { "op": "reparent", "id": "hero", "parentId": "root", "index": 0 },
        { "op": "reparent", "id": "hero", "parentId": "root", "index": 1 },
        { "op": "select", "id": "hero" },
        { "op": "patch", "id": "hero", "componentId": "hero-block" }
    ]))
    .unwrap();
    for edit in &edits {
        let after = session.apply(edit);
        assert!(Arc::ptr_eq(&before, &after), "{edit:?} changed the snapshot");
    }
}

#[test]
fn normalization_skips_blank_and_duplicate_ids() {
    let screen = load_screen("duplicates.json");
    let state = from_node_list(&screen.nodes);
    assert_eq!(*state.root_ids, vec!["page".to_string()]);
    assert_eq!(state.node("page").unwrap().child_ids, vec!["title".to_string()]);
    assert_eq!(state.node("title").unwrap().label.as_deref(), Some("First"));
    assert!(!state.contains("orphan"));
    assert_eq!(state.selection_id.as_deref(), Some("page"));
    assert!(check_invariants(&state).is_empty());
}

#[test]
fn landing_screen_normalizes_layout_and_legacy_style() {
    let screen = load_screen("landing.json");
    let state = from_node_list(&screen.nodes);
    assert_eq!(state.selection_id.as_deref(), Some("hero"));
    assert_eq!(state.node("root").unwrap().layout["gap"], json!(16));
    let links = state.node("links").unwrap();
    assert_eq!(links.style["padding"], json!(8));
    assert_eq!(links.legacy_style, links.style);

    let nested = serialize(&state);
    let written = serde_json::to_value(&nested[0].slots["footer"][0]).unwrap();
    assert_eq!(written["style"], json!({ "padding": 8 }));
    assert_eq!(written["styles"], json!({ "padding": 8 }));
}

#[test]
fn untouched_subtrees_keep_their_allocations() {
    let screen = load_screen("landing.json");
    let session = EditorSession::new(DocumentStore::new(from_node_list(&screen.nodes)));
    let before = session.state();
    let after = session.reparent_node("feature-a", &screen_canvas::ir::Placement::under("secondary"));

    for id in ["hero", "cta", "links", "feature-b", "feature-c"] {
        assert!(
            Arc::ptr_eq(before.node(id).unwrap(), after.node(id).unwrap()),
            "{id} was cloned"
        );
    }
    assert!(!Arc::ptr_eq(before.node("features").unwrap(), after.node("features").unwrap()));
}
