use crate::catalog::ComponentCatalog;
use crate::graph::{GraphState, ancestors_of, check_invariants, display_name_with, meta_of};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDump {
    pub root_ids: Vec<String>,
    pub selection_id: Option<String>,
    pub node_count: usize,
    pub nodes: Vec<NodeDump>,
    pub violations: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDump {
    pub id: String,
    pub display_name: String,
    pub meta: String,
    pub parent_id: Option<String>,
    pub parent_slot: Option<String>,
    pub depth: usize,
    pub child_ids: Vec<String>,
    pub slots: Vec<SlotDump>,
}

#[derive(Debug, Serialize)]
pub struct SlotDump {
    pub name: String,
    pub ids: Vec<String>,
}

impl StateDump {
    pub fn from_state(state: &GraphState, catalog: Option<&dyn ComponentCatalog>) -> Self {
        let nodes = state
            .nodes
            .values()
            .map(|node| NodeDump {
                id: node.id.clone(),
                display_name: display_name_with(node, catalog),
                meta: meta_of(node),
                parent_id: node.parent_id.clone(),
                parent_slot: node.parent_slot.clone(),
                depth: ancestors_of(state, &node.id).len(),
                child_ids: node.child_ids.clone(),
                slots: node
                    .slot_child_ids
                    .iter()
                    .map(|(name, ids)| SlotDump {
                        name: name.clone(),
                        ids: ids.clone(),
                    })
                    .collect(),
            })
            .collect();

        StateDump {
            root_ids: state.root_ids.to_vec(),
            selection_id: state.selection_id.clone(),
            node_count: state.len(),
            nodes,
            violations: check_invariants(state)
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

pub fn write_state_dump(
    path: &Path,
    state: &GraphState,
    catalog: Option<&dyn ComponentCatalog>,
) -> anyhow::Result<()> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    let dump = StateDump::from_state(state, catalog);
    serde_json::to_writer_pretty(writer, &dump)?;
    Ok(())
}
