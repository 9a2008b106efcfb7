//! Session-scoped document store and the mutation façade in front of it.
//!
//! [`DocumentStore`] holds the current snapshot and notifies observers that
//! registered through [`DocumentStore::subscribe`]. [`EditorSession`] is the
//! only path that advances the store on behalf of the user; every structural
//! edit that changes the snapshot is handed to the autosave coordinator.

use crate::autosave::AutosaveHandle;
use crate::graph::{self, GraphState};
use crate::ir::{NodeId, NodePatch, Placement, RawNode};
use crate::placement::{DragItem, can_drop, is_resting_position};
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::debug;

type Listener = Arc<dyn Fn(&Arc<GraphState>) + Send + Sync>;

/// The current snapshot and the reload generation it belongs to.
struct Revision {
    state: Arc<GraphState>,
    generation: u64,
}

struct StoreInner {
    revision: Mutex<Revision>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
}

impl StoreInner {
    fn listeners(&self) -> Vec<Listener> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    fn unsubscribe(&self, id: u64) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(listener_id, _)| *listener_id != id);
    }
}

/// Observable holder of the current [`GraphState`].
///
/// Cloning is cheap and every clone observes the same document.
#[derive(Clone)]
pub struct DocumentStore {
    inner: Arc<StoreInner>,
}

impl DocumentStore {
    pub fn new(state: Arc<GraphState>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                revision: Mutex::new(Revision {
                    state,
                    generation: 0,
                }),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    pub fn current(&self) -> Arc<GraphState> {
        Arc::clone(&self.revision().state)
    }

    /// Bumped by every [`DocumentStore::replace`]. Snapshots produced by
    /// [`DocumentStore::update`] keep the generation they were derived in.
    pub fn generation(&self) -> u64 {
        self.revision().generation
    }

    fn revision(&self) -> MutexGuard<'_, Revision> {
        self.inner.revision.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swaps in `next` wholesale and starts a new generation. Returns the
    /// new generation, or `None` when `next` is already current.
    pub fn replace(&self, next: Arc<GraphState>) -> Option<u64> {
        self.advance(|_| next, true).map(|(_, generation)| generation)
    }

    /// Applies `edit` to the current snapshot under the store lock.
    ///
    /// Returns the new snapshot when it differs (by pointer) from the old
    /// one. Observers run after the lock is released.
    pub fn update<F>(&self, edit: F) -> Option<Arc<GraphState>>
    where
        F: FnOnce(&Arc<GraphState>) -> Arc<GraphState>,
    {
        self.advance(edit, false).map(|(next, _)| next)
    }

    /// Like [`DocumentStore::update`], also returning the generation the new
    /// snapshot was committed in.
    pub fn update_tracked<F>(&self, edit: F) -> Option<(Arc<GraphState>, u64)>
    where
        F: FnOnce(&Arc<GraphState>) -> Arc<GraphState>,
    {
        self.advance(edit, false)
    }

    fn advance<F>(&self, edit: F, reload: bool) -> Option<(Arc<GraphState>, u64)>
    where
        F: FnOnce(&Arc<GraphState>) -> Arc<GraphState>,
    {
        let (next, generation) = {
            let mut revision = self.revision();
            let next = edit(&revision.state);
            if Arc::ptr_eq(&revision.state, &next) {
                return None;
            }
            revision.state = Arc::clone(&next);
            if reload {
                revision.generation += 1;
            }
            (next, revision.generation)
        };
        for listener in self.inner.listeners() {
            listener(&next);
        }
        Some((next, generation))
    }

    /// Registers `listener` for every future snapshot change. The listener
    /// stays registered until the returned [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<GraphState>) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        Subscription {
            store: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStore")
            .field("nodes", &self.current().len())
            .field("generation", &self.generation())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Handle returned by [`DocumentStore::subscribe`].
#[must_use = "dropping a Subscription unsubscribes immediately"]
#[derive(Debug)]
pub struct Subscription {
    store: Weak<StoreInner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.unsubscribe(self.id);
        }
    }
}

/// One step of an edit script, as the UI or the CLI sends it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Edit {
    Select {
        #[serde(default)]
        id: Option<NodeId>,
    },
    Patch(NodePatch),
    Insert {
        node: RawNode,
        #[serde(flatten)]
        placement: Placement,
    },
    Reparent {
        id: NodeId,
        #[serde(flatten)]
        placement: Placement,
    },
    Remove {
        id: NodeId,
    },
    Drop {
        item: DragItem,
        #[serde(default)]
        target: Placement,
    },
}

/// Mutation façade for one open screen.
#[derive(Debug, Clone)]
pub struct EditorSession {
    store: DocumentStore,
    autosave: Option<AutosaveHandle>,
}

impl EditorSession {
    /// A session whose edits stay local.
    pub fn new(store: DocumentStore) -> Self {
        Self {
            store,
            autosave: None,
        }
    }

    pub fn with_autosave(store: DocumentStore, autosave: AutosaveHandle) -> Self {
        Self {
            store,
            autosave: Some(autosave),
        }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn autosave(&self) -> Option<&AutosaveHandle> {
        self.autosave.as_ref()
    }

    pub fn state(&self) -> Arc<GraphState> {
        self.store.current()
    }

    /// Changes the selection. Never schedules a save.
    pub fn select_node(&self, node_id: Option<&str>) -> Arc<GraphState> {
        self.store
            .update(|state| graph::select(state, node_id))
            .unwrap_or_else(|| self.store.current())
    }

    pub fn patch_node(&self, patch: &NodePatch) -> Arc<GraphState> {
        debug!(id = %patch.id, "patch node");
        self.commit(|state| graph::patch(state, patch))
    }

    pub fn insert_node(&self, raw: &RawNode, placement: &Placement) -> Arc<GraphState> {
        debug!(id = %raw.id, parent = ?placement.parent_id, "insert node");
        self.commit(|state| graph::insert(state, raw, placement))
    }

    /// Moves a node, refusing any target [`can_drop`] rejects.
    ///
    /// A drop onto the node's own position still honours `placement.select`,
    /// as a plain selection change.
    pub fn reparent_node(&self, node_id: &str, placement: &Placement) -> Arc<GraphState> {
        debug!(id = node_id, parent = ?placement.parent_id, "reparent node");
        self.drop_item(&DragItem::Node(node_id.to_string()), placement)
    }

    pub fn remove_node(&self, node_id: &str) -> Arc<GraphState> {
        debug!(id = node_id, "remove node");
        self.commit(|state| graph::remove(state, node_id))
    }

    /// Completes a drag: inserts a palette entry or moves an existing node.
    /// The drop is validated again against the current snapshot.
    pub fn drop_item(&self, item: &DragItem, target: &Placement) -> Arc<GraphState> {
        if let DragItem::Node(node_id) = item {
            if target.select && is_resting_position(&self.store.current(), node_id, target) {
                return self.select_node(Some(node_id));
            }
        }
        self.commit(|state| {
            if !can_drop(state, item, target) {
                debug!(?item, "drop refused");
                return Arc::clone(state);
            }
            match item {
                DragItem::Palette(raw) => graph::insert(state, raw, target),
                DragItem::Node(node_id) => graph::reparent(state, node_id, target),
            }
        })
    }

    pub fn apply(&self, edit: &Edit) -> Arc<GraphState> {
        match edit {
            Edit::Select { id } => self.select_node(id.as_deref()),
            Edit::Patch(patch) => self.patch_node(patch),
            Edit::Insert { node, placement } => self.insert_node(node, placement),
            Edit::Reparent { id, placement } => self.reparent_node(id, placement),
            Edit::Remove { id } => self.remove_node(id),
            Edit::Drop { item, target } => self.drop_item(item, target),
        }
    }

    fn commit<F>(&self, edit: F) -> Arc<GraphState>
    where
        F: FnOnce(&Arc<GraphState>) -> Arc<GraphState>,
    {
        let Some((next, generation)) = self.store.update_tracked(edit) else {
            return self.store.current();
        };
        if let Some(autosave) = &self.autosave {
            autosave.enqueue(Arc::clone(&next), generation);
        }
        next
    }
}
