//! Family/task tree model and the cross-refresh ingest engine
//!
//! A [`RootFlowNode`] owns an arena of nodes addressed by [`NodeId`]. Parent
//! links are plain ids, so there are no ownership cycles: a refresh builds a
//! brand new arena and carries user state across by *path*.
//!
//! ```text
//! A157                      <- NodeId(0), path ""
//! └── 20200114              <- path "20200114"
//!     └── 12
//!         └── assim
//!             └── obsextract   <- path "20200114/12/assim/obsextract"
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::observer::{ListenerId, Observer, Subject};
use crate::status::FlowStatus;

/// Stable index of a node inside its own tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// The root node of any tree
    pub const ROOT: NodeId = NodeId(0);
}

/// A fold/unfold decision taken by the user, pinned to the status the node
/// had at that moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserExpanded {
    pub expanded: bool,
    pub status: FlowStatus,
}

/// Emitted whenever a node's `flagged` property changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagChange {
    pub path: String,
    pub flagged: bool,
}

#[derive(Debug)]
struct NodeData {
    name: String,
    status: FlowStatus,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    flagged: bool,
    expanded: bool,
    user_expanded: Option<UserExpanded>,
}

/// Root of a family/task tree (one per suite root, plus one for the roots list)
pub struct RootFlowNode {
    nodes: Vec<NodeData>,
    created_at: Instant,
    focused: Option<NodeId>,
    flag_events: Subject<FlagChange>,
}

/// Read-only view on one node of a [`RootFlowNode`]
#[derive(Clone, Copy)]
pub struct FlowNode<'a> {
    tree: &'a RootFlowNode,
    id: NodeId,
}

impl RootFlowNode {
    pub fn new(name: impl Into<String>, status: FlowStatus) -> Self {
        Self {
            nodes: vec![NodeData {
                name: name.into(),
                status,
                parent: None,
                children: Vec::new(),
                flagged: false,
                // The first entry is always expanded
                expanded: true,
                user_expanded: None,
            }],
            created_at: Instant::now(),
            focused: None,
            flag_events: Subject::new(),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Structure
    // ─────────────────────────────────────────────────────────────

    pub fn root(&self) -> FlowNode<'_> {
        self.node(NodeId::ROOT)
    }

    /// View on node `id`.
    ///
    /// Panics if `id` was not produced by this tree.
    pub fn node(&self, id: NodeId) -> FlowNode<'_> {
        assert!(id.0 < self.nodes.len(), "{:?} does not belong to this tree", id);
        FlowNode { tree: self, id }
    }

    pub fn name(&self) -> &str {
        &self.nodes[0].name
    }

    pub fn status(&self) -> FlowStatus {
        self.nodes[0].status
    }

    /// Number of direct children of the root
    pub fn len(&self) -> usize {
        self.nodes[0].children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Direct children of the root
    pub fn children(&self) -> impl Iterator<Item = FlowNode<'_>> + '_ {
        self.root().children()
    }

    /// Whether the root has a direct child called `name`
    pub fn contains(&self, name: &str) -> bool {
        self.child_of(NodeId::ROOT, name).is_some()
    }

    fn child_of(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[parent.0]
            .children
            .iter()
            .copied()
            .find(|c| self.nodes[c.0].name == name)
    }

    /// Create a child node under `parent`.
    ///
    /// Nodes created with an "interesting" status are expanded by default,
    /// together with all of their ancestors. A sibling with the same name is
    /// replaced (keeping its position).
    pub fn add(&mut self, parent: NodeId, name: impl Into<String>, status: FlowStatus) -> NodeId {
        let name = name.into();
        let id = NodeId(self.nodes.len());
        let existing = self.child_of(parent, &name);
        self.nodes.push(NodeData {
            name,
            status,
            parent: Some(parent),
            children: Vec::new(),
            flagged: false,
            expanded: false,
            user_expanded: None,
        });
        match existing {
            Some(old) => {
                let slot = self.nodes[parent.0]
                    .children
                    .iter_mut()
                    .find(|c| **c == old);
                if let Some(slot) = slot {
                    *slot = id;
                }
            }
            None => self.nodes[parent.0].children.push(id),
        }
        if status.expands_by_default() {
            self.set_expanded(id);
        }
        id
    }

    fn set_expanded(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(c_id) = current {
            self.nodes[c_id.0].expanded = true;
            current = self.nodes[c_id.0].parent;
        }
    }

    /// Resolve a `/`-separated path relative to the root (`""` is the root)
    pub fn resolve_path(&self, path: &str) -> Option<NodeId> {
        let mut node = NodeId::ROOT;
        if path.is_empty() {
            return Some(node);
        }
        for item in path.split('/') {
            node = self.child_of(node, item)?;
        }
        Some(node)
    }

    /// Depth-first (pre-order) walk over every node reachable from the root
    pub fn walk(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![NodeId::ROOT];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id.0].children.iter().rev().copied());
        }
        order
    }

    // ─────────────────────────────────────────────────────────────
    // Age
    // ─────────────────────────────────────────────────────────────

    /// Time elapsed since creation or since the last [`touch`](Self::touch)
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn touch(&mut self) {
        self.created_at = Instant::now();
    }

    // ─────────────────────────────────────────────────────────────
    // Selection (flagged nodes)
    // ─────────────────────────────────────────────────────────────

    /// Listen to `flagged` changes on any node of this tree
    pub fn observe_flags<O: Observer<FlagChange> + 'static>(&self, observer: &Arc<O>) -> ListenerId {
        self.flag_events.attach(observer)
    }

    pub fn unobserve_flags(&self, id: ListenerId) -> bool {
        self.flag_events.detach(id)
    }

    pub fn set_flagged(&mut self, id: NodeId, flagged: bool) {
        if self.nodes[id.0].flagged == flagged {
            return;
        }
        self.nodes[id.0].flagged = flagged;
        let path = self.node(id).path();
        self.flag_events.notify(&FlagChange { path, flagged });
    }

    /// Flag every node with `status` (only leaves when `leaf_only`)
    pub fn flag_status(&mut self, status: FlowStatus, leaf_only: bool) {
        for id in self.walk() {
            let node = &self.nodes[id.0];
            if node.status == status && (!leaf_only || node.children.is_empty()) {
                self.set_flagged(id, true);
            }
        }
    }

    pub fn reset_flagged(&mut self) {
        for id in self.walk() {
            self.set_flagged(id, false);
        }
    }

    /// Paths (relative to the root) of the flagged nodes, in tree order
    pub fn flagged_paths(&self) -> Vec<String> {
        self.walk()
            .into_iter()
            .filter(|id| self.nodes[id.0].flagged)
            .map(|id| self.node(id).path())
            .collect()
    }

    // ─────────────────────────────────────────────────────────────
    // Fold state
    // ─────────────────────────────────────────────────────────────

    /// Record an explicit fold/unfold decision, pinned to the current status
    pub fn set_user_expanded(&mut self, id: NodeId, expanded: bool) {
        let status = self.nodes[id.0].status;
        self.nodes[id.0].user_expanded = Some(UserExpanded { expanded, status });
    }

    pub fn clear_user_expanded(&mut self, id: NodeId) {
        self.nodes[id.0].user_expanded = None;
    }

    pub fn user_expanded_paths(&self) -> Vec<(String, UserExpanded)> {
        self.walk()
            .into_iter()
            .filter_map(|id| {
                self.nodes[id.0]
                    .user_expanded
                    .map(|ue| (self.node(id).path(), ue))
            })
            .collect()
    }

    /// First leaf reachable through default-expanded nodes only
    pub fn first_expanded_leaf(&self) -> Option<NodeId> {
        self.root().first_expanded_leaf().map(|n| n.id())
    }

    /// Paths of the leaves that need attention (aborted tasks)
    pub fn blink_paths(&self) -> BTreeSet<String> {
        self.walk()
            .into_iter()
            .map(|id| self.node(id))
            .filter(|n| n.blink())
            .map(|n| n.path())
            .collect()
    }

    // ─────────────────────────────────────────────────────────────
    // Focus
    // ─────────────────────────────────────────────────────────────

    pub fn focused(&self) -> Option<FlowNode<'_>> {
        self.focused.map(|id| self.node(id))
    }

    pub fn focused_path(&self) -> Option<String> {
        self.focused().map(|n| n.path())
    }

    pub fn set_focused(&mut self, id: NodeId) {
        assert!(id.0 < self.nodes.len(), "{:?} does not belong to this tree", id);
        self.focused = Some(id);
    }

    pub fn clear_focused(&mut self) {
        self.focused = None;
    }

    /// Where the cursor goes when nothing is focused: the first blinking
    /// leaf, else the first default-expanded leaf, else the root.
    pub fn default_focus(&self) -> NodeId {
        self.walk()
            .into_iter()
            .find(|id| self.node(*id).blink())
            .or_else(|| self.first_expanded_leaf())
            .unwrap_or(NodeId::ROOT)
    }

    // ─────────────────────────────────────────────────────────────
    // Ingest (carry user state from the previous tree)
    // ─────────────────────────────────────────────────────────────

    /// Re-flag the nodes that were flagged before the refresh. Paths that
    /// vanished are ignored.
    pub fn ingest_flagged<S: AsRef<str>>(&mut self, paths: &[S]) {
        for path in paths {
            if let Some(id) = self.resolve_path(path.as_ref()) {
                self.set_flagged(id, true);
            }
        }
    }

    /// Re-apply fold overrides.
    ///
    /// An unfold override always survives. A fold override only survives
    /// while the node keeps the status it had when the user folded it.
    pub fn ingest_user_expanded(&mut self, overrides: &[(String, UserExpanded)]) {
        for (path, ue) in overrides {
            if let Some(id) = self.resolve_path(path) {
                if ue.expanded || self.nodes[id.0].status == ue.status {
                    self.nodes[id.0].user_expanded = Some(*ue);
                }
            }
        }
    }

    /// Keep the previous focus unless something new went wrong.
    ///
    /// Returns true when the old focus was restored. When the new blink set
    /// is not a subset of `old_blink_paths` the focus is left unset so the
    /// caller falls back to [`default_focus`](Self::default_focus).
    pub fn ingest_focused(&mut self, old_focused: Option<&str>, old_blink_paths: &BTreeSet<String>) -> bool {
        if !self.blink_paths().is_subset(old_blink_paths) {
            self.focused = None;
            return false;
        }
        match old_focused.and_then(|path| self.resolve_path(path)) {
            Some(id) => {
                self.focused = Some(id);
                true
            }
            None => false,
        }
    }

    /// Carry flagged nodes, fold overrides and focus over from `old`
    pub fn ingest(&mut self, old: &RootFlowNode) {
        self.ingest_flagged(&old.flagged_paths());
        self.ingest_user_expanded(&old.user_expanded_paths());
        let focused = old.focused_path();
        self.ingest_focused(focused.as_deref(), &old.blink_paths());
    }

    // ─────────────────────────────────────────────────────────────
    // Rendering helpers
    // ─────────────────────────────────────────────────────────────

    /// `[STATUS]_name` lines, two spaces of indentation per level
    pub fn indented(&self, id: NodeId, level: usize) -> String {
        let mut lines = Vec::new();
        self.push_indented(id, level, &mut lines);
        lines.join("\n")
    }

    fn push_indented(&self, id: NodeId, level: usize, lines: &mut Vec<String>) {
        let node = &self.nodes[id.0];
        lines.push(format!("{}[{}]_{}", "  ".repeat(level), node.status, node.name));
        for child in &node.children {
            self.push_indented(*child, level + 1, lines);
        }
    }

    /// JSON dump of a subtree
    pub fn to_json(&self, id: NodeId) -> Value {
        let node = self.node(id);
        let children: Vec<Value> = node.children().map(|c| self.to_json(c.id())).collect();
        json!({
            "name": node.name(),
            "status": node.status().as_str(),
            "flagged": node.flagged(),
            "blink": node.blink(),
            "children": children,
        })
    }

    fn same_subtree(&self, id: NodeId, other: &RootFlowNode, other_id: NodeId) -> bool {
        let a = &self.nodes[id.0];
        let b = &other.nodes[other_id.0];
        a.name == b.name
            && a.status == b.status
            && a.children.len() == b.children.len()
            && a
                .children
                .iter()
                .zip(&b.children)
                .all(|(ca, cb)| self.same_subtree(*ca, other, *cb))
    }
}

/// Structural equality: same names, statuses and ordered children.
/// Selection, fold state, focus and age are ignored.
impl PartialEq for RootFlowNode {
    fn eq(&self, other: &Self) -> bool {
        self.same_subtree(NodeId::ROOT, other, NodeId::ROOT)
    }
}

impl fmt::Display for RootFlowNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.indented(NodeId::ROOT, 0))
    }
}

impl fmt::Debug for RootFlowNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RootFlowNode(\n{}\n)", self)
    }
}

impl<'a> FlowNode<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    fn data(&self) -> &'a NodeData {
        &self.tree.nodes[self.id.0]
    }

    pub fn name(&self) -> &'a str {
        &self.data().name
    }

    pub fn status(&self) -> FlowStatus {
        self.data().status
    }

    pub fn parent(&self) -> Option<FlowNode<'a>> {
        self.data().parent.map(|id| self.tree.node(id))
    }

    pub fn children(&self) -> impl Iterator<Item = FlowNode<'a>> + 'a {
        let tree = self.tree;
        self.data().children.iter().map(move |id| tree.node(*id))
    }

    pub fn child(&self, name: &str) -> Option<FlowNode<'a>> {
        self.tree.child_of(self.id, name).map(|id| self.tree.node(id))
    }

    pub fn len(&self) -> usize {
        self.data().children.len()
    }

    pub fn is_leaf(&self) -> bool {
        self.data().children.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.data().parent.is_none()
    }

    pub fn flagged(&self) -> bool {
        self.data().flagged
    }

    /// Default fold state, derived once at creation
    pub fn expanded(&self) -> bool {
        self.data().expanded
    }

    pub fn user_expanded(&self) -> Option<UserExpanded> {
        self.data().user_expanded
    }

    /// The fold state to display: the user's override if any, else the default
    pub fn is_expanded(&self) -> bool {
        self.user_expanded()
            .map(|ue| ue.expanded)
            .unwrap_or_else(|| self.expanded())
    }

    /// An aborted leaf: needs attention
    pub fn blink(&self) -> bool {
        self.status() == FlowStatus::Aborted && self.is_leaf()
    }

    /// Path relative to the root node (`""` for the root itself)
    pub fn path(&self) -> String {
        let mut names = Vec::new();
        let mut current = *self;
        while let Some(parent) = current.parent() {
            names.push(current.name());
            current = parent;
        }
        names.reverse();
        names.join("/")
    }

    /// Path including the root node's name
    pub fn full_path(&self) -> String {
        let path = self.path();
        if path.is_empty() {
            self.tree.name().to_string()
        } else {
            format!("{}/{}", self.tree.name(), path)
        }
    }

    pub fn first_expanded_leaf(&self) -> Option<FlowNode<'a>> {
        if !self.expanded() {
            return None;
        }
        if self.is_leaf() {
            return Some(*self);
        }
        self.children().find_map(|c| c.first_expanded_leaf())
    }
}

impl fmt::Debug for FlowNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowNode")
            .field("path", &self.full_path())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    const RES_STR_20200114_12: &str = "[ABORTED]_12
  [ACTIVE]_production
    [QUEUED]_obsextract
    [ACTIVE]_obsextract_surf
  [ABORTED]_assim
    [ABORTED]_obsextract
    [SUBMITTED]_obsextract_surf";

    fn demo_flow() -> RootFlowNode {
        let mut r = RootFlowNode::new("A157", FlowStatus::Aborted);
        let d14 = r.add(NodeId::ROOT, "20200114", FlowStatus::Aborted);
        let f00 = r.add(d14, "00", FlowStatus::Complete);
        for cutoff in ["production", "assim"] {
            let c = r.add(f00, cutoff, FlowStatus::Complete);
            r.add(c, "obsextract", FlowStatus::Complete);
        }
        let f12 = r.add(d14, "12", FlowStatus::Aborted);
        let prod = r.add(f12, "production", FlowStatus::Active);
        r.add(prod, "obsextract", FlowStatus::Queued);
        r.add(prod, "obsextract_surf", FlowStatus::Active);
        let assim = r.add(f12, "assim", FlowStatus::Aborted);
        r.add(assim, "obsextract", FlowStatus::Aborted);
        r.add(assim, "obsextract_surf", FlowStatus::Submitted);
        r
    }

    fn id(tree: &RootFlowNode, path: &str) -> NodeId {
        tree.resolve_path(path).unwrap()
    }

    #[test]
    fn test_structure_and_paths() {
        let r = demo_flow();
        assert_eq!(r.name(), "A157");
        assert_eq!(r.status(), FlowStatus::Aborted);
        assert!(r.root().parent().is_none());
        assert_eq!(r.len(), 1);

        let assim = r.node(id(&r, "20200114/12/assim"));
        assert_eq!(assim.path(), "20200114/12/assim");
        assert_eq!(assim.full_path(), "A157/20200114/12/assim");
        assert_eq!(assim.parent().unwrap().name(), "12");
        assert_eq!(r.resolve_path(""), Some(NodeId::ROOT));
        assert_eq!(r.resolve_path("20200114/99"), None);

        let d14 = r.node(id(&r, "20200114"));
        let names: Vec<_> = d14.children().map(|c| c.name()).collect();
        assert_eq!(names, vec!["00", "12"]);
        assert!(d14.child("00").is_some());
    }

    #[test]
    fn test_default_expansion() {
        let r = demo_flow();
        assert!(r.root().expanded());
        assert!(r.node(id(&r, "20200114")).expanded());
        assert!(!r.node(id(&r, "20200114/00")).expanded());
        assert!(r.node(id(&r, "20200114/12/production")).expanded());
        assert!(!r.node(id(&r, "20200114/12/production/obsextract")).expanded());
        assert_eq!(
            r.first_expanded_leaf(),
            r.resolve_path("20200114/12/production/obsextract_surf")
        );
    }

    #[test]
    fn test_expansion_propagates_to_ancestors() {
        let mut r = RootFlowNode::new("root", FlowStatus::Complete);
        let fam = r.add(NodeId::ROOT, "fam", FlowStatus::Complete);
        let sub = r.add(fam, "sub", FlowStatus::Complete);
        assert!(!r.node(fam).expanded());
        r.add(sub, "task", FlowStatus::Active);
        assert!(r.node(fam).expanded());
        assert!(r.node(sub).expanded());
    }

    #[test]
    fn test_indented_rendering() {
        let r = demo_flow();
        assert_eq!(r.indented(id(&r, "20200114/12"), 0), RES_STR_20200114_12);
    }

    #[test]
    fn test_structural_equality() {
        let a = demo_flow();
        let mut b = demo_flow();
        assert_eq!(a, b);

        b.flag_status(FlowStatus::Aborted, true);
        let leaf = id(&b, "20200114/00/assim/obsextract");
        b.set_user_expanded(leaf, true);
        assert_eq!(a, b, "selection and fold state are not part of equality");

        let mut c = demo_flow();
        let f12 = id(&c, "20200114/12");
        c.add(f12, "extra", FlowStatus::Queued);
        assert_ne!(a, c);
    }

    #[test]
    fn test_blink_and_default_focus() {
        let r = demo_flow();
        let blink: Vec<_> = r.blink_paths().into_iter().collect();
        assert_eq!(blink, vec!["20200114/12/assim/obsextract".to_string()]);
        assert!(!r.node(id(&r, "20200114/12/assim")).blink(), "families never blink");
        assert_eq!(r.default_focus(), id(&r, "20200114/12/assim/obsextract"));

        let mut quiet = RootFlowNode::new("q", FlowStatus::Complete);
        assert_eq!(quiet.default_focus(), NodeId::ROOT);
        let t = quiet.add(NodeId::ROOT, "t", FlowStatus::Complete);
        assert_eq!(quiet.default_focus(), NodeId::ROOT);
        let u = quiet.add(NodeId::ROOT, "u", FlowStatus::Active);
        assert_ne!(quiet.default_focus(), t);
        assert_eq!(quiet.default_focus(), u);
    }

    #[derive(Default)]
    struct FlagRecorder {
        flagged: Mutex<BTreeSet<String>>,
    }

    impl Observer<FlagChange> for FlagRecorder {
        fn notify(&self, event: &FlagChange) {
            let mut flagged = self.flagged.lock();
            if event.flagged {
                flagged.insert(event.path.clone());
            } else {
                flagged.remove(&event.path);
            }
        }
    }

    #[test]
    fn test_flagging_is_observable() {
        let mut r = demo_flow();
        let recorder = Arc::new(FlagRecorder::default());
        let listener = r.observe_flags(&recorder);

        r.flag_status(FlowStatus::Aborted, true);
        r.flag_status(FlowStatus::Active, true);
        assert_eq!(
            r.flagged_paths(),
            vec![
                "20200114/12/production/obsextract_surf".to_string(),
                "20200114/12/assim/obsextract".to_string(),
            ]
        );
        assert_eq!(recorder.flagged.lock().len(), 2);

        r.set_flagged(id(&r, "20200114/12/assim/obsextract"), false);
        assert_eq!(recorder.flagged.lock().len(), 1);

        assert!(r.unobserve_flags(listener));
        r.reset_flagged();
        assert!(r.flagged_paths().is_empty());
        assert_eq!(recorder.flagged.lock().len(), 1);
    }

    #[test]
    fn test_flag_status_including_families() {
        let mut r = demo_flow();
        r.flag_status(FlowStatus::Aborted, false);
        assert_eq!(
            r.flagged_paths(),
            vec![
                "".to_string(),
                "20200114".to_string(),
                "20200114/12".to_string(),
                "20200114/12/assim".to_string(),
                "20200114/12/assim/obsextract".to_string(),
            ]
        );
    }

    #[test]
    fn test_ingest_without_change_preserves_everything() {
        let mut old = demo_flow();
        old.set_flagged(id(&old, "20200114/00/production"), true);
        old.set_flagged(id(&old, "20200114/12/assim/obsextract"), true);
        let f00 = id(&old, "20200114/00");
        old.set_user_expanded(f00, true);
        let prod = id(&old, "20200114/12/production");
        old.set_user_expanded(prod, false);
        old.set_focused(id(&old, "20200114/12/production/obsextract"));

        let mut new = demo_flow();
        new.ingest(&old);

        assert_eq!(new.flagged_paths(), old.flagged_paths());
        assert_eq!(new.user_expanded_paths(), old.user_expanded_paths());
        assert_eq!(new.focused_path(), old.focused_path());
    }

    #[test]
    fn test_ingest_flagged_ignores_vanished_nodes() {
        let mut old = demo_flow();
        old.set_flagged(id(&old, "20200114/12/assim/obsextract"), true);
        old.set_flagged(id(&old, "20200114/12/production/obsextract"), true);

        let mut new = RootFlowNode::new("A157", FlowStatus::Aborted);
        let d14 = new.add(NodeId::ROOT, "20200114", FlowStatus::Aborted);
        let f12 = new.add(d14, "12", FlowStatus::Aborted);
        let prod = new.add(f12, "production", FlowStatus::Active);
        new.add(prod, "obsextract", FlowStatus::Queued);

        new.ingest(&old);
        assert_eq!(
            new.flagged_paths(),
            vec!["20200114/12/production/obsextract".to_string()]
        );
    }

    #[test]
    fn test_fold_overrides_are_status_pinned() {
        let mut old = demo_flow();
        // folded while complete
        let f00 = id(&old, "20200114/00");
        old.set_user_expanded(f00, false);
        // unfolded while complete
        let assim00 = id(&old, "20200114/00/assim");
        old.set_user_expanded(assim00, true);

        // everything under 00 aborts
        let mut new = RootFlowNode::new("A157", FlowStatus::Aborted);
        let d14 = new.add(NodeId::ROOT, "20200114", FlowStatus::Aborted);
        let f00 = new.add(d14, "00", FlowStatus::Aborted);
        let assim = new.add(f00, "assim", FlowStatus::Aborted);
        new.add(assim, "obsextract", FlowStatus::Aborted);

        new.ingest_user_expanded(&old.user_expanded_paths());

        assert_eq!(new.node(f00).user_expanded(), None, "fold dropped on status change");
        assert_eq!(
            new.node(assim).user_expanded(),
            Some(UserExpanded {
                expanded: true,
                status: FlowStatus::Complete
            }),
            "unfold is sticky"
        );
        assert!(new.node(assim).is_expanded());
    }

    #[test]
    fn test_fold_override_kept_when_status_unchanged() {
        let mut old = demo_flow();
        let prod = id(&old, "20200114/12/production");
        old.set_user_expanded(prod, false);

        let mut new = demo_flow();
        new.ingest_user_expanded(&old.user_expanded_paths());
        let prod = id(&new, "20200114/12/production");
        assert!(!new.node(prod).is_expanded());
        assert!(new.node(prod).expanded());
    }

    #[test]
    fn test_focus_dropped_when_something_new_breaks() {
        let mut old = demo_flow();
        old.set_focused(id(&old, "20200114/00/production"));

        let mut new = demo_flow();
        let prod = id(&new, "20200114/12/production");
        new.add(prod, "late_task", FlowStatus::Aborted);

        assert!(!new.ingest_focused(old.focused_path().as_deref(), &old.blink_paths()));
        assert!(new.focused().is_none());
        assert_eq!(new.default_focus(), id(&new, "20200114/12/production/late_task"));
    }

    #[test]
    fn test_focus_kept_when_problems_shrink() {
        let mut old = demo_flow();
        old.set_focused(id(&old, "20200114/12/production"));

        // the aborted task was fixed
        let mut new = RootFlowNode::new("A157", FlowStatus::Active);
        let d14 = new.add(NodeId::ROOT, "20200114", FlowStatus::Active);
        let f12 = new.add(d14, "12", FlowStatus::Active);
        new.add(f12, "production", FlowStatus::Active);

        assert!(new.ingest_focused(old.focused_path().as_deref(), &old.blink_paths()));
        assert_eq!(new.focused_path().as_deref(), Some("20200114/12/production"));
    }

    #[test]
    fn test_add_replaces_same_name_sibling() {
        let mut r = RootFlowNode::new("r", FlowStatus::Queued);
        r.add(NodeId::ROOT, "a", FlowStatus::Queued);
        r.add(NodeId::ROOT, "b", FlowStatus::Queued);
        r.add(NodeId::ROOT, "a", FlowStatus::Complete);
        let names: Vec<_> = r.children().map(|c| (c.name(), c.status())).collect();
        assert_eq!(
            names,
            vec![("a", FlowStatus::Complete), ("b", FlowStatus::Queued)]
        );
    }

    #[test]
    fn test_age_and_touch() {
        let mut r = demo_flow();
        std::thread::sleep(Duration::from_millis(30));
        assert!(r.age() >= Duration::from_millis(30));
        r.touch();
        assert!(r.age() < Duration::from_millis(30));
    }

    #[test]
    fn test_json_dump() {
        let r = demo_flow();
        let json = r.to_json(id(&r, "20200114/12/assim"));
        assert_eq!(json["name"], "assim");
        assert_eq!(json["status"], "ABORTED");
        assert_eq!(json["children"][0]["blink"], true);
        assert_eq!(json["children"].as_array().unwrap().len(), 2);
    }
}
