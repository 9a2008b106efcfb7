use crate::graph::{GraphState, index_in_container};
use crate::ir::{Container, NodeId, Placement, RawNode};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// What the drag layer reports as picked up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DragItem {
    /// A node already placed on the canvas.
    Node(NodeId),
    /// A fresh entry from the component or primitive palette.
    Palette(RawNode),
}

/// True when `candidate_id` is `ancestor_id` or sits anywhere below it,
/// through default children or named slots.
pub fn can_contain(state: &GraphState, ancestor_id: &str, candidate_id: &str) -> bool {
    if ancestor_id == candidate_id {
        return true;
    }
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([ancestor_id]);
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        let Some(node) = state.node(id) else {
            continue;
        };
        for child in node.child_ids.iter().chain(node.slot_child_ids.values().flatten()) {
            if child == candidate_id {
                return true;
            }
            queue.push_back(child.as_str());
        }
    }
    false
}

/// Decides whether dropping `item` at `target` is allowed.
///
/// Palette entries are always admissible. An existing node is refused when
/// the target parent is the node itself or one of its descendants, and when
/// the drop would leave it exactly where it already is.
pub fn can_drop(state: &GraphState, item: &DragItem, target: &Placement) -> bool {
    let node_id = match item {
        DragItem::Palette(_) => return true,
        DragItem::Node(node_id) => node_id,
    };
    let Some((current, current_index)) = index_in_container(state, node_id) else {
        return false;
    };

    let destination = Container::from_parts(target.parent_id.as_deref(), target.slot.as_deref());
    if let Some(parent_id) = destination.parent_id() {
        if !state.contains(parent_id) || can_contain(state, node_id, parent_id) {
            return false;
        }
    }

    !(destination == current && is_gap_beside(state, &current, current_index, target))
}

/// True when moving `node_id` to `target` would leave it where it already is.
pub fn is_resting_position(state: &GraphState, node_id: &str, target: &Placement) -> bool {
    let Some((current, current_index)) = index_in_container(state, node_id) else {
        return false;
    };
    Container::from_parts(target.parent_id.as_deref(), target.slot.as_deref()) == current
        && is_gap_beside(state, &current, current_index, target)
}

fn is_gap_beside(state: &GraphState, container: &Container, at: usize, target: &Placement) -> bool {
    let len = state.container_ids(container).map_or(0, <[NodeId]>::len);
    let index = target.index.map_or(len, |index| index.min(len));
    index == at || index == at + 1
}
