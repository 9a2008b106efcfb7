//! Normalized canvas document: a flat, id-keyed node table plus the ordered
//! list of root ids.
//!
//! Every transformation here is pure. It takes `&Arc<GraphState>` and hands
//! back an `Arc<GraphState>`; when nothing changes the input `Arc` itself is
//! returned, so `Arc::ptr_eq` is a valid change check. Mutations clone only
//! the containers and nodes they touch, and every other node keeps its
//! allocation across snapshots.
//!
//! Invalid requests (unknown ids, missing parents, duplicate ids) never
//! error; they degrade to returning the input unchanged.

use crate::catalog::ComponentCatalog;
use crate::ir::{Container, FieldMap, Node, NodeId, NodePatch, Placement, RawNode};
use serde_json::{Number, Value};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub type NodeTable = BTreeMap<NodeId, Arc<Node>>;

/// Prop keys consulted, in order, when a node has no explicit label.
const DISPLAY_PROP_KEYS: [&str; 5] = ["title", "heading", "label", "name", "id"];

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GraphState {
    pub root_ids: Arc<Vec<NodeId>>,
    pub nodes: Arc<NodeTable>,
    pub selection_id: Option<NodeId>,
}

impl GraphState {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn node(&self, id: &str) -> Option<&Arc<Node>> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn selected(&self) -> Option<&Arc<Node>> {
        self.selection_id.as_deref().and_then(|id| self.node(id))
    }

    /// The container a node claims to live in, read from its back-links.
    pub fn container_of(&self, id: &str) -> Option<Container> {
        self.node(id)
            .map(|node| Container::from_parts(node.parent_id.as_deref(), node.parent_slot.as_deref()))
    }

    /// Ids held by `container`. A named slot that was never created reads as
    /// empty; a missing parent reads as `None`.
    pub fn container_ids(&self, container: &Container) -> Option<&[NodeId]> {
        match container {
            Container::Root => Some(self.root_ids.as_slice()),
            Container::Children(parent) => self.node(parent).map(|node| node.child_ids.as_slice()),
            Container::Slot(parent, slot) => self
                .node(parent)
                .map(|node| node.slot_child_ids.get(slot).map_or(&[][..], Vec::as_slice)),
        }
    }
}

/// Copy-on-write view over a snapshot. Containers are cloned on first write
/// through `Arc::make_mut`; nodes are cloned individually when touched.
struct Draft {
    root_ids: Arc<Vec<NodeId>>,
    nodes: Arc<NodeTable>,
    selection_id: Option<NodeId>,
}

impl Draft {
    fn new(state: &GraphState) -> Self {
        Self {
            root_ids: Arc::clone(&state.root_ids),
            nodes: Arc::clone(&state.nodes),
            selection_id: state.selection_id.clone(),
        }
    }

    fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        Arc::make_mut(&mut self.nodes).get_mut(id).map(Arc::make_mut)
    }

    fn list_mut(&mut self, container: &Container) -> Option<&mut Vec<NodeId>> {
        match container {
            Container::Root => Some(Arc::make_mut(&mut self.root_ids)),
            Container::Children(parent) => self.node_mut(parent).map(|node| &mut node.child_ids),
            Container::Slot(parent, slot) => self
                .node_mut(parent)
                .map(|node| node.slot_child_ids.entry(slot.clone()).or_default()),
        }
    }

    fn finish(self) -> Arc<GraphState> {
        Arc::new(GraphState {
            root_ids: self.root_ids,
            nodes: self.nodes,
            selection_id: self.selection_id,
        })
    }
}

/// Flattens a nested node list into a fresh snapshot.
///
/// The first occurrence of an id wins; later duplicates are dropped together
/// with their subtrees. The initial selection is the first node, in
/// depth-first order, that references a component, else the first node.
pub fn from_node_list(raw_nodes: &[RawNode]) -> Arc<GraphState> {
    let taken = NodeTable::new();
    let mut table = NodeTable::new();
    let mut order = Vec::new();
    let root_ids: Vec<NodeId> = raw_nodes
        .iter()
        .filter_map(|raw| normalize_into(raw, None, None, &taken, &mut table, &mut order))
        .collect();

    let selection_id = order
        .iter()
        .find(|id| table.get(*id).is_some_and(|node| node.component_id.is_some()))
        .or_else(|| order.first())
        .cloned();

    Arc::new(GraphState {
        root_ids: Arc::new(root_ids),
        nodes: Arc::new(table),
        selection_id,
    })
}

fn normalize_into(
    raw: &RawNode,
    parent: Option<&str>,
    slot: Option<&str>,
    taken: &NodeTable,
    table: &mut NodeTable,
    order: &mut Vec<NodeId>,
) -> Option<NodeId> {
    let id = raw.id.trim();
    if id.is_empty() {
        debug!(node_type = %raw.node_type, "skipping node without id");
        return None;
    }
    if taken.contains_key(id) || table.contains_key(id) {
        debug!(id, "skipping duplicate node id");
        return None;
    }

    let mut node = build_node(raw, parent, slot);
    let id = node.id.clone();
    // Reserve the id before descending so a descendant cannot reuse it.
    table.insert(id.clone(), Arc::new(Node::default()));
    order.push(id.clone());

    node.child_ids = raw
        .children
        .iter()
        .filter_map(|child| normalize_into(child, Some(&id), None, taken, table, order))
        .collect();
    for (slot_name, entries) in &raw.slots {
        let ids = entries
            .iter()
            .filter_map(|child| normalize_into(child, Some(&id), Some(slot_name), taken, table, order))
            .collect();
        node.slot_child_ids.insert(slot_name.clone(), ids);
    }

    table.insert(id.clone(), Arc::new(node));
    Some(id)
}

fn build_node(raw: &RawNode, parent: Option<&str>, slot: Option<&str>) -> Node {
    let style = if raw.style.is_empty() {
        raw.styles.clone()
    } else {
        raw.style.clone()
    };
    Node {
        id: raw.id.trim().to_string(),
        node_type: raw.node_type.trim().to_string(),
        component_id: clean_text(raw.component_id.as_deref()),
        label: clean_text(raw.label.as_deref()),
        parent_id: parent.map(str::to_string),
        parent_slot: slot.map(str::to_string),
        props: raw.props.clone(),
        bindings: raw.bindings.clone(),
        metadata: raw.metadata.clone(),
        layout: normalize_layout(&raw.layout),
        legacy_style: style.clone(),
        style,
        child_ids: Vec::new(),
        slot_child_ids: BTreeMap::new(),
    }
}

fn clean_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn normalize_layout(layout: &FieldMap) -> FieldMap {
    layout
        .iter()
        .map(|(key, value)| (key.clone(), numeric_or_value(value)))
        .collect()
}

/// Numeric strings become JSON numbers; everything else passes through.
fn numeric_or_value(value: &Value) -> Value {
    let Value::String(text) = value else {
        return value.clone();
    };
    let trimmed = text.trim();
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::from(int);
    }
    match trimmed.parse::<f64>() {
        Ok(float) if float.is_finite() => Number::from_f64(float)
            .map(Value::Number)
            .unwrap_or_else(|| value.clone()),
        _ => value.clone(),
    }
}

fn clamp_index(index: Option<usize>, len: usize) -> usize {
    index.map_or(len, |index| index.min(len))
}

pub fn select(state: &Arc<GraphState>, node_id: Option<&str>) -> Arc<GraphState> {
    let next = node_id
        .filter(|id| state.contains(id))
        .map(str::to_string);
    if next == state.selection_id {
        return Arc::clone(state);
    }
    Arc::new(GraphState {
        root_ids: Arc::clone(&state.root_ids),
        nodes: Arc::clone(&state.nodes),
        selection_id: next,
    })
}

/// Merges the fields present in `patch` into the existing node.
///
/// Text fields are trimmed, and a blank label or component id clears it.
/// Numeric strings are parsed only inside `layout`; `props`, `bindings` and
/// `metadata` are stored exactly as sent. A style patch replaces both style fields.
pub fn patch(state: &Arc<GraphState>, patch: &NodePatch) -> Arc<GraphState> {
    let Some(current) = state.node(patch.id.trim()) else {
        return Arc::clone(state);
    };
    let mut next = Node::clone(current);
    apply_patch(&mut next, patch);
    if next == **current {
        return Arc::clone(state);
    }

    let mut draft = Draft::new(state);
    Arc::make_mut(&mut draft.nodes).insert(next.id.clone(), Arc::new(next));
    draft.finish()
}

fn apply_patch(node: &mut Node, patch: &NodePatch) {
    if let Some(node_type) = clean_text(patch.node_type.as_deref()) {
        node.node_type = node_type;
    }
    if let Some(component_id) = &patch.component_id {
        node.component_id = clean_text(component_id.as_deref());
    }
    if let Some(label) = &patch.label {
        node.label = clean_text(label.as_deref());
    }
    if let Some(props) = &patch.props {
        node.props = props.clone();
    }
    if let Some(bindings) = &patch.bindings {
        node.bindings = bindings.clone();
    }
    if let Some(metadata) = &patch.metadata {
        node.metadata = metadata.clone();
    }
    if let Some(layout) = &patch.layout {
        node.layout = normalize_layout(layout);
    }
    if let Some(style) = patch.style.as_ref().or(patch.styles.as_ref()) {
        node.style = style.clone();
        node.legacy_style = style.clone();
    }
}

/// Normalizes `raw` (with any nested children and slot children) and places
/// it at `placement`. No-op if the id already exists or the parent is unknown.
pub fn insert(state: &Arc<GraphState>, raw: &RawNode, placement: &Placement) -> Arc<GraphState> {
    let id = raw.id.trim();
    if id.is_empty() || state.contains(id) {
        return Arc::clone(state);
    }
    let container = Container::from_parts(placement.parent_id.as_deref(), placement.slot.as_deref());
    if container.parent_id().is_some_and(|parent| !state.contains(parent)) {
        return Arc::clone(state);
    }

    let mut fresh = NodeTable::new();
    let mut order = Vec::new();
    let Some(new_id) = normalize_into(
        raw,
        container.parent_id(),
        container.slot(),
        &state.nodes,
        &mut fresh,
        &mut order,
    ) else {
        return Arc::clone(state);
    };

    let mut draft = Draft::new(state);
    Arc::make_mut(&mut draft.nodes).extend(fresh);
    if let Some(list) = draft.list_mut(&container) {
        let at = clamp_index(placement.index, list.len());
        list.insert(at, new_id.clone());
    }
    if placement.select {
        draft.selection_id = Some(new_id);
    }
    draft.finish()
}

/// Moves an existing node to `placement`.
///
/// The target index is read against the target container as it looks
/// before the move, so dropping a node just before or just after itself
/// leaves the order unchanged. Cycles are not checked here; callers gate
/// this with [`crate::placement::can_drop`].
pub fn reparent(state: &Arc<GraphState>, node_id: &str, placement: &Placement) -> Arc<GraphState> {
    let Some((from, from_index)) = index_in_container(state, node_id) else {
        return Arc::clone(state);
    };
    let to = Container::from_parts(placement.parent_id.as_deref(), placement.slot.as_deref());
    if to.parent_id() == Some(node_id) {
        return Arc::clone(state);
    }
    let Some(target_len) = state.container_ids(&to).map(<[NodeId]>::len) else {
        return Arc::clone(state);
    };

    let mut at = clamp_index(placement.index, target_len);
    if from == to {
        if at > from_index {
            at -= 1;
        }
        if at == from_index {
            return if placement.select {
                select(state, Some(node_id))
            } else {
                Arc::clone(state)
            };
        }
    }

    let mut draft = Draft::new(state);
    if let Some(list) = draft.list_mut(&from) {
        list.retain(|id| id != node_id);
    }
    if let Some(list) = draft.list_mut(&to) {
        let at = at.min(list.len());
        list.insert(at, node_id.to_string());
    }
    if let Some(node) = draft.node_mut(node_id) {
        node.parent_id = to.parent_id().map(str::to_string);
        node.parent_slot = to.slot().map(str::to_string);
    }
    if placement.select {
        draft.selection_id = Some(node_id.to_string());
    }
    draft.finish()
}

/// Deletes a node and its whole subtree.
pub fn remove(state: &Arc<GraphState>, node_id: &str) -> Arc<GraphState> {
    let Some(container) = state.container_of(node_id) else {
        return Arc::clone(state);
    };
    let doomed = subtree_ids(state, node_id);

    let mut draft = Draft::new(state);
    if let Some(list) = draft.list_mut(&container) {
        list.retain(|id| id != node_id);
    }
    let nodes = Arc::make_mut(&mut draft.nodes);
    for id in &doomed {
        nodes.remove(id);
    }
    if draft
        .selection_id
        .as_ref()
        .is_some_and(|selected| doomed.contains(selected))
    {
        draft.selection_id = None;
    }
    draft.finish()
}

fn child_id_iter(node: &Node) -> impl Iterator<Item = &NodeId> {
    node.child_ids
        .iter()
        .chain(node.slot_child_ids.values().flatten())
}

fn subtree_ids(state: &GraphState, root: &str) -> HashSet<NodeId> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([root.to_string()]);
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(node) = state.node(&id) {
            queue.extend(child_id_iter(node).cloned());
        }
    }
    seen
}

pub fn index_in_container(state: &GraphState, node_id: &str) -> Option<(Container, usize)> {
    let container = state.container_of(node_id)?;
    let index = state
        .container_ids(&container)?
        .iter()
        .position(|id| id == node_id)?;
    Some((container, index))
}

/// Parent chain of `node_id`, nearest first.
pub fn ancestors_of(state: &GraphState, node_id: &str) -> Vec<NodeId> {
    let mut chain = Vec::new();
    let mut seen = HashSet::from([node_id.to_string()]);
    let mut cursor = state.node(node_id).and_then(|node| node.parent_id.clone());
    while let Some(id) = cursor {
        if !seen.insert(id.clone()) {
            break;
        }
        cursor = state.node(&id).and_then(|node| node.parent_id.clone());
        chain.push(id);
    }
    chain
}

#[derive(Debug, Clone)]
pub struct ChildEntry {
    pub node: Arc<Node>,
    pub slot: Option<String>,
}

/// Default children first, then each named slot in slot-name order.
pub fn children_of(state: &GraphState, node_id: &str) -> Vec<ChildEntry> {
    let Some(node) = state.node(node_id) else {
        return Vec::new();
    };
    let defaults = node.child_ids.iter().map(|id| (id, None::<&String>));
    let slotted = node
        .slot_child_ids
        .iter()
        .flat_map(|(slot, ids)| ids.iter().map(move |id| (id, Some(slot))));
    defaults
        .chain(slotted)
        .filter_map(|(id, slot)| {
            state.node(id).map(|child| ChildEntry {
                node: Arc::clone(child),
                slot: slot.cloned(),
            })
        })
        .collect()
}

pub fn display_name_of(node: &Node) -> String {
    display_name_with(node, None)
}

/// Like [`display_name_of`], but consults the component catalog before
/// falling back to the raw `componentId`.
pub fn display_name_with(node: &Node, catalog: Option<&dyn ComponentCatalog>) -> String {
    if let Some(label) = clean_text(node.label.as_deref()) {
        return label;
    }
    if let Some(text) = prop_label(node) {
        return text;
    }
    if let Some(component_id) = node.component_id.as_deref() {
        let resolved = catalog
            .and_then(|catalog| catalog.resolve(component_id))
            .and_then(|info| clean_text(Some(&info.label)));
        return resolved.unwrap_or_else(|| component_id.to_string());
    }
    if node.node_type.is_empty() {
        node.id.clone()
    } else {
        node.node_type.clone()
    }
}

fn prop_label(node: &Node) -> Option<String> {
    DISPLAY_PROP_KEYS
        .iter()
        .find_map(|key| match node.props.get(*key) {
            Some(Value::String(text)) => clean_text(Some(text)),
            Some(Value::Number(number)) => Some(number.to_string()),
            _ => None,
        })
}

/// Short descriptor shown next to the display name.
pub fn meta_of(node: &Node) -> String {
    match node.component_id.as_deref() {
        Some(component_id) if node.node_type.is_empty() => component_id.to_string(),
        Some(component_id) => format!("{} / {}", node.node_type, component_id),
        None => node.node_type.clone(),
    }
}

/// Rebuilds the nested node list, the inverse of [`from_node_list`].
pub fn serialize(state: &GraphState) -> Vec<RawNode> {
    let mut emitted = HashSet::new();
    state
        .root_ids
        .iter()
        .filter_map(|id| serialize_node(state, id, &mut emitted))
        .collect()
}

fn serialize_node(state: &GraphState, id: &str, emitted: &mut HashSet<NodeId>) -> Option<RawNode> {
    let node = state.node(id)?;
    // Each node is written once even if a corrupted table lists it twice.
    if !emitted.insert(id.to_string()) {
        return None;
    }
    let children = node
        .child_ids
        .iter()
        .filter_map(|child| serialize_node(state, child, emitted))
        .collect();
    let slots = node
        .slot_child_ids
        .iter()
        .map(|(slot, ids)| {
            let entries = ids
                .iter()
                .filter_map(|child| serialize_node(state, child, emitted))
                .collect();
            (slot.clone(), entries)
        })
        .collect();
    Some(RawNode {
        id: node.id.clone(),
        node_type: node.node_type.clone(),
        component_id: node.component_id.clone(),
        label: node.label.clone(),
        props: node.props.clone(),
        bindings: node.bindings.clone(),
        metadata: node.metadata.clone(),
        layout: node.layout.clone(),
        style: node.style.clone(),
        styles: node.style.clone(),
        children,
        slots,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("{container} references missing node `{id}`")]
    DanglingReference { container: String, id: NodeId },
    #[error("node `{id}` is held by {count} containers")]
    MultiplePlacements { id: NodeId, count: usize },
    #[error("node `{id}` is not held by any container")]
    Unplaced { id: NodeId },
    #[error("node `{id}` records parent {recorded} but is held by {actual}")]
    ParentMismatch {
        id: NodeId,
        recorded: String,
        actual: String,
    },
    #[error("node `{id}` is its own ancestor")]
    Cycle { id: NodeId },
    #[error("selection `{id}` does not exist")]
    DanglingSelection { id: NodeId },
}

/// Checks every structural invariant of the snapshot. Empty means healthy.
pub fn check_invariants(state: &GraphState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    let mut lists: Vec<(Container, &[NodeId])> = vec![(Container::Root, state.root_ids.as_slice())];
    for (id, node) in state.nodes.iter() {
        lists.push((Container::Children(id.clone()), node.child_ids.as_slice()));
        for (slot, ids) in &node.slot_child_ids {
            lists.push((Container::Slot(id.clone(), slot.clone()), ids.as_slice()));
        }
    }

    let mut holders: BTreeMap<&str, Vec<&Container>> = BTreeMap::new();
    for (container, ids) in &lists {
        for id in ids.iter() {
            if state.contains(id) {
                holders.entry(id.as_str()).or_default().push(container);
            } else {
                violations.push(InvariantViolation::DanglingReference {
                    container: container.to_string(),
                    id: id.clone(),
                });
            }
        }
    }

    for (id, node) in state.nodes.iter() {
        let recorded = Container::from_parts(node.parent_id.as_deref(), node.parent_slot.as_deref());
        match holders.get(id.as_str()).map(Vec::as_slice) {
            None | Some([]) => violations.push(InvariantViolation::Unplaced { id: id.clone() }),
            Some([actual]) if **actual != recorded => {
                violations.push(InvariantViolation::ParentMismatch {
                    id: id.clone(),
                    recorded: recorded.to_string(),
                    actual: actual.to_string(),
                });
            }
            Some([_]) => {}
            Some(many) => violations.push(InvariantViolation::MultiplePlacements {
                id: id.clone(),
                count: many.len(),
            }),
        }
        if is_own_ancestor(state, id) {
            violations.push(InvariantViolation::Cycle { id: id.clone() });
        }
    }

    if let Some(selected) = state.selection_id.as_ref().filter(|id| !state.contains(id)) {
        violations.push(InvariantViolation::DanglingSelection {
            id: selected.clone(),
        });
    }
    violations
}

fn is_own_ancestor(state: &GraphState, node_id: &str) -> bool {
    let mut seen = HashSet::new();
    let mut cursor = state.node(node_id).and_then(|node| node.parent_id.as_deref());
    while let Some(id) = cursor {
        if id == node_id {
            return true;
        }
        if !seen.insert(id) {
            return false;
        }
        cursor = state.node(id).and_then(|node| node.parent_id.as_deref());
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ComponentInfo, StaticCatalog};
    use serde_json::json;

    fn landing_page() -> Vec<RawNode> {
        vec![
            RawNode::new("root", "frame")
                .with_child(RawNode::new("hero", "component").with_component("hero-block"))
                .with_slot_child("footer", RawNode::new("links", "primitive")),
            RawNode::new("secondary", "frame"),
        ]
    }

    #[test]
    fn builds_scenario_tree_through_insert() {
        let state = GraphState::empty();
        let state = insert(&state, &RawNode::new("root", "frame"), &Placement::root());
        let hero = RawNode::new("hero", "component").with_component("hero-block");
        let state = insert(&state, &hero, &Placement::under("root").selecting());

        assert_eq!(*state.root_ids, vec!["root".to_string()]);
        assert_eq!(state.node("root").unwrap().child_ids, vec!["hero".to_string()]);
        assert_eq!(state.selection_id.as_deref(), Some("hero"));
        assert_eq!(state.node("hero").unwrap().parent_id.as_deref(), Some("root"));
        assert!(check_invariants(&state).is_empty());
    }

    #[test]
    fn from_node_list_links_parents_and_prefers_component_selection() {
        let state = from_node_list(&landing_page());
        assert_eq!(*state.root_ids, vec!["root".to_string(), "secondary".to_string()]);
        assert_eq!(state.selection_id.as_deref(), Some("hero"));
        let links = state.node("links").unwrap();
        assert_eq!(links.parent_id.as_deref(), Some("root"));
        assert_eq!(links.parent_slot.as_deref(), Some("footer"));
        assert!(check_invariants(&state).is_empty());
    }

    #[test]
    fn from_node_list_keeps_first_duplicate() {
        let raw = vec![
            RawNode::new("a", "frame").with_child(RawNode::new("b", "primitive")),
            RawNode::new("b", "frame").with_child(RawNode::new("c", "primitive")),
        ];
        let state = from_node_list(&raw);
        assert_eq!(*state.root_ids, vec!["a".to_string()]);
        assert_eq!(state.node("b").unwrap().node_type, "primitive");
        assert!(!state.contains("c"));
        assert_eq!(state.selection_id.as_deref(), Some("a"));
    }

    #[test]
    fn from_empty_list_selects_nothing() {
        let state = from_node_list(&[]);
        assert!(state.is_empty());
        assert!(state.selection_id.is_none());
    }

    #[test]
    fn select_is_identity_when_unchanged() {
        let state = from_node_list(&landing_page());
        let same = select(&state, state.selection_id.as_deref());
        assert!(Arc::ptr_eq(&state, &same));

        let cleared = select(&state, Some("missing"));
        assert!(cleared.selection_id.is_none());
        assert!(Arc::ptr_eq(&state.nodes, &cleared.nodes));
    }

    #[test]
    fn patch_trims_parses_and_mirrors_style() {
        let state = from_node_list(&landing_page());
        let mut layout = FieldMap::new();
        layout.insert("x".into(), json!(" 12 "));
        layout.insert("width".into(), json!("33.5"));
        layout.insert("align".into(), json!("center"));
        let mut props = FieldMap::new();
        props.insert("count".into(), json!("12"));
        let mut style = FieldMap::new();
        style.insert("color".into(), json!("#333"));
        let next = patch(
            &state,
            &NodePatch::new("hero")
                .with_label(Some("  Welcome  "))
                .with_layout(layout)
                .with_props(props)
                .with_style(style.clone()),
        );

        let hero = next.node("hero").unwrap();
        assert_eq!(hero.label.as_deref(), Some("Welcome"));
        assert_eq!(hero.layout["x"], json!(12));
        assert_eq!(hero.layout["width"], json!(33.5));
        assert_eq!(hero.layout["align"], json!("center"));
        assert_eq!(hero.props["count"], json!("12"));
        assert_eq!(hero.style, style);
        assert_eq!(hero.legacy_style, style);
        assert!(Arc::ptr_eq(
            state.node("secondary").unwrap(),
            next.node("secondary").unwrap()
        ));
    }

    #[test]
    fn patch_unknown_or_noop_returns_same_state() {
        let state = from_node_list(&landing_page());
        let unknown = patch(&state, &NodePatch::new("ghost").with_label(Some("x")));
        assert!(Arc::ptr_eq(&state, &unknown));
        let noop = patch(&state, &NodePatch::new("hero").with_component(Some("hero-block")));
        assert!(Arc::ptr_eq(&state, &noop));
    }

    #[test]
    fn patch_can_clear_component_reference() {
        let state = from_node_list(&landing_page());
        let next = patch(&state, &NodePatch::new("hero").with_component(None));
        assert!(next.node("hero").unwrap().component_id.is_none());
    }

    #[test]
    fn insert_clamps_index_and_rejects_duplicates() {
        let state = from_node_list(&landing_page());
        let next = insert(&state, &RawNode::new("first", "frame"), &Placement::root().at(0));
        let far = insert(&next, &RawNode::new("last", "frame"), &Placement::root().at(99));
        assert_eq!(
            *far.root_ids,
            vec!["first", "root", "secondary", "last"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
        let dup = insert(&far, &RawNode::new("hero", "frame"), &Placement::root());
        assert!(Arc::ptr_eq(&far, &dup));
        let orphan = insert(&far, &RawNode::new("x", "frame"), &Placement::under("ghost"));
        assert!(Arc::ptr_eq(&far, &orphan));
    }

    #[test]
    fn insert_brings_nested_children_and_slots() {
        let state = from_node_list(&landing_page());
        let card = RawNode::new("card", "frame")
            .with_child(RawNode::new("card-title", "primitive"))
            .with_slot_child("actions", RawNode::new("card-cta", "primitive"))
            .with_slot_child("actions", RawNode::new("hero", "primitive"));
        let next = insert(&state, &card, &Placement::under("secondary").in_slot("body"));

        let node = next.node("card").unwrap();
        assert_eq!(node.parent_slot.as_deref(), Some("body"));
        assert_eq!(node.slot_child_ids["actions"], vec!["card-cta".to_string()]);
        assert_eq!(next.node("hero").unwrap().node_type, "component");
        assert_eq!(
            next.node("secondary").unwrap().slot_child_ids["body"],
            vec!["card".to_string()]
        );
        assert!(check_invariants(&next).is_empty());
    }

    #[test]
    fn reparent_moves_between_roots() {
        let state = from_node_list(&landing_page());
        let next = reparent(&state, "hero", &Placement::under("secondary"));
        assert!(next.node("root").unwrap().child_ids.is_empty());
        assert_eq!(next.node("secondary").unwrap().child_ids, vec!["hero".to_string()]);
        assert_eq!(next.node("hero").unwrap().parent_id.as_deref(), Some("secondary"));
        assert!(check_invariants(&next).is_empty());
        assert!(Arc::ptr_eq(state.node("links").unwrap(), next.node("links").unwrap()));
    }

    #[test]
    fn reparent_within_container_uses_pre_move_gaps() {
        let raw = vec![RawNode::new("list", "frame")
            .with_child(RawNode::new("a", "primitive"))
            .with_child(RawNode::new("b", "primitive"))
            .with_child(RawNode::new("c", "primitive"))];
        let state = from_node_list(&raw);

        let same = reparent(&state, "a", &Placement::under("list").at(1));
        assert!(Arc::ptr_eq(&state, &same));

        let moved = reparent(&state, "a", &Placement::under("list").at(3));
        assert_eq!(moved.node("list").unwrap().child_ids, vec!["b", "c", "a"]);

        let front = reparent(&state, "c", &Placement::under("list").at(0));
        assert_eq!(front.node("list").unwrap().child_ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn reparent_into_slot_and_back_to_root() {
        let state = from_node_list(&landing_page());
        let slotted = reparent(&state, "secondary", &Placement::under("root").in_slot("footer").at(0));
        let root = slotted.node("root").unwrap();
        assert_eq!(root.slot_child_ids["footer"], vec!["secondary", "links"]);
        assert_eq!(*slotted.root_ids, vec!["root".to_string()]);

        let back = reparent(&slotted, "links", &Placement::root());
        assert_eq!(*back.root_ids, vec!["root".to_string(), "links".to_string()]);
        assert!(back.node("links").unwrap().parent_id.is_none());
        assert!(check_invariants(&back).is_empty());
    }

    #[test]
    fn reparent_rejects_self_and_unknown_targets() {
        let state = from_node_list(&landing_page());
        assert!(Arc::ptr_eq(&state, &reparent(&state, "root", &Placement::under("root"))));
        assert!(Arc::ptr_eq(&state, &reparent(&state, "ghost", &Placement::root())));
        assert!(Arc::ptr_eq(&state, &reparent(&state, "hero", &Placement::under("ghost"))));
    }

    #[test]
    fn remove_drops_subtree_and_selection() {
        let state = from_node_list(&landing_page());
        let next = remove(&state, "root");
        assert_eq!(*next.root_ids, vec!["secondary".to_string()]);
        assert!(!next.contains("hero"));
        assert!(!next.contains("links"));
        assert!(next.selection_id.is_none());
        assert!(check_invariants(&next).is_empty());
    }

    #[test]
    fn children_of_lists_defaults_then_slots() {
        let state = from_node_list(&landing_page());
        let children = children_of(&state, "root");
        let ids: Vec<(&str, Option<&str>)> = children
            .iter()
            .map(|entry| (entry.node.id.as_str(), entry.slot.as_deref()))
            .collect();
        assert_eq!(ids, vec![("hero", None), ("links", Some("footer"))]);
    }

    #[test]
    fn display_name_follows_priority() {
        let state = from_node_list(&[RawNode::new("card", "component")
            .with_component("promo-card")
            .with_prop("heading", json!("Spring sale"))]);
        let node = state.node("card").unwrap();
        assert_eq!(display_name_of(node), "Spring sale");
        assert_eq!(meta_of(node), "component / promo-card");

        let mut catalog = StaticCatalog::new();
        catalog.insert(
            "promo-card",
            ComponentInfo {
                label: "Promo card".into(),
                tags: vec![],
            },
        );
        let bare = from_node_list(&[RawNode::new("p", "component").with_component("promo-card")]);
        let bare = bare.node("p").unwrap();
        assert_eq!(display_name_with(bare, Some(&catalog)), "Promo card");
        assert_eq!(display_name_of(bare), "promo-card");
    }

    #[test]
    fn serialize_round_trips_nested_shape() {
        let state = from_node_list(&landing_page());
        let nested = serialize(&state);
        assert_eq!(nested.len(), 2);
        assert_eq!(nested[0].children[0].id, "hero");
        assert_eq!(nested[0].slots["footer"][0].id, "links");
        let again = from_node_list(&nested);
        assert_eq!(*again, *state);
    }

    #[test]
    fn legacy_styles_field_is_read_when_style_is_absent() {
        let raw: RawNode = serde_json::from_value(json!({
            "id": "box", "type": "frame", "styles": { "padding": 8 }
        }))
        .unwrap();
        let state = from_node_list(&[raw]);
        let node = state.node("box").unwrap();
        assert_eq!(node.style["padding"], json!(8));
        assert_eq!(node.style, node.legacy_style);
    }

    #[test]
    fn check_invariants_reports_corruption() {
        let state = from_node_list(&landing_page());
        let mut draft = Draft::new(&state);
        draft.list_mut(&Container::Root).unwrap().push("hero".into());
        draft.selection_id = Some("ghost".into());
        let broken = draft.finish();
        let violations = check_invariants(&broken);
        assert!(violations.contains(&InvariantViolation::MultiplePlacements {
            id: "hero".into(),
            count: 2
        }));
        assert!(violations.contains(&InvariantViolation::DanglingSelection { id: "ghost".into() }));
    }
}
