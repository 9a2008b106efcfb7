use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

pub type NodeId = String;

/// Free-form key/value payload (props, bindings, metadata, layout, style).
pub type FieldMap = Map<String, Value>;

/// Opaque revision token handed out by the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A placed element in the normalized node table.
///
/// Containment is expressed only through ids: `parent_id`/`parent_slot` point
/// up, `child_ids`/`slot_child_ids` point down.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    pub component_id: Option<String>,
    pub label: Option<String>,
    pub parent_id: Option<NodeId>,
    pub parent_slot: Option<String>,
    pub props: FieldMap,
    pub bindings: FieldMap,
    pub metadata: FieldMap,
    pub layout: FieldMap,
    pub style: FieldMap,
    /// Mirror of `style` under the older field name; always equal to it.
    #[serde(rename = "styles")]
    pub legacy_style: FieldMap,
    pub child_ids: Vec<NodeId>,
    pub slot_child_ids: BTreeMap<String, Vec<NodeId>>,
}

impl Node {
    pub fn has_children(&self) -> bool {
        !self.child_ids.is_empty() || self.slot_child_ids.values().any(|ids| !ids.is_empty())
    }
}

/// Nested node shape used on the wire and in persisted documents.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNode {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub props: FieldMap,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub bindings: FieldMap,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: FieldMap,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub layout: FieldMap,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub style: FieldMap,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub styles: FieldMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RawNode>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub slots: BTreeMap<String, Vec<RawNode>>,
}

impl RawNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            ..Self::default()
        }
    }

    pub fn with_component(mut self, component_id: impl Into<String>) -> Self {
        self.component_id = Some(component_id.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: Value) -> Self {
        self.props.insert(key.into(), value);
        self
    }

    pub fn with_child(mut self, child: RawNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_slot_child(mut self, slot: impl Into<String>, child: RawNode) -> Self {
        self.slots.entry(slot.into()).or_default().push(child);
        self
    }
}

/// Partial update for one node. Absent fields are left untouched.
///
/// `component_id` and `label` distinguish "absent" (`None`) from "clear"
/// (`Some(None)`, sent as JSON `null`).
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePatch {
    pub id: NodeId,
    #[serde(rename = "type", default)]
    pub node_type: Option<String>,
    #[serde(default, deserialize_with = "present_or_null")]
    pub component_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "present_or_null")]
    pub label: Option<Option<String>>,
    #[serde(default)]
    pub props: Option<FieldMap>,
    #[serde(default)]
    pub bindings: Option<FieldMap>,
    #[serde(default)]
    pub metadata: Option<FieldMap>,
    #[serde(default)]
    pub layout: Option<FieldMap>,
    #[serde(default)]
    pub style: Option<FieldMap>,
    #[serde(default)]
    pub styles: Option<FieldMap>,
}

fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl NodePatch {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = Some(node_type.into());
        self
    }

    pub fn with_component(mut self, component_id: Option<&str>) -> Self {
        self.component_id = Some(component_id.map(str::to_string));
        self
    }

    pub fn with_label(mut self, label: Option<&str>) -> Self {
        self.label = Some(label.map(str::to_string));
        self
    }

    pub fn with_props(mut self, props: FieldMap) -> Self {
        self.props = Some(props);
        self
    }

    pub fn with_layout(mut self, layout: FieldMap) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn with_style(mut self, style: FieldMap) -> Self {
        self.style = Some(style);
        self
    }
}

/// Where a node should land: a parent (or the root list), an optional named
/// slot, and an index into that container.
///
/// `index` addresses the gaps of the container as it looks before the
/// operation; `None` appends. Out-of-range indices are clamped.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    #[serde(default)]
    pub parent_id: Option<NodeId>,
    #[serde(default)]
    pub slot: Option<String>,
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub select: bool,
}

impl Placement {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn under(parent_id: impl Into<String>) -> Self {
        Self {
            parent_id: Some(parent_id.into()),
            ..Self::default()
        }
    }

    pub fn in_slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = Some(slot.into());
        self
    }

    pub fn at(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn selecting(mut self) -> Self {
        self.select = true;
        self
    }
}

/// The list that holds a node: the root list, a parent's default children,
/// or one of a parent's named slots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Container {
    Root,
    Children(NodeId),
    Slot(NodeId, String),
}

impl Container {
    pub fn from_parts(parent_id: Option<&str>, slot: Option<&str>) -> Self {
        match (parent_id, slot) {
            (None, _) => Container::Root,
            (Some(parent), None) => Container::Children(parent.to_string()),
            (Some(parent), Some(slot)) => Container::Slot(parent.to_string(), slot.to_string()),
        }
    }

    pub fn parent_id(&self) -> Option<&str> {
        match self {
            Container::Root => None,
            Container::Children(parent) | Container::Slot(parent, _) => Some(parent),
        }
    }

    pub fn slot(&self) -> Option<&str> {
        match self {
            Container::Slot(_, slot) => Some(slot),
            _ => None,
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Container::Root => write!(f, "root"),
            Container::Children(parent) => write!(f, "{parent}"),
            Container::Slot(parent, slot) => write!(f, "{parent}[{slot}]"),
        }
    }
}
