use std::collections::BTreeMap;

use crate::geometry::Size;

/// Index into the document arena. Ids are never reused; detached nodes
/// stay in the arena with their `detached` flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Terminal/pending load state for an image element. The settlement
/// record lives here, in the arena, so nothing annotates foreign objects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageState {
    Pending,
    Loaded(Size),
    Failed,
}

impl ImageState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
        styles: BTreeMap<String, String>,
        classes: Vec<String>,
        image: Option<ImageState>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub detached: bool,
}

/// Host document modelled as a grow-only node arena.
#[derive(Debug, Default)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent: None,
            children: Vec::new(),
            detached: false,
        });
        id
    }

    pub fn create_element(&mut self, tag: impl Into<String>) -> NodeId {
        let tag = tag.into();
        let image = (tag == "img").then_some(ImageState::Pending);
        self.push(NodeKind::Element {
            tag,
            attrs: BTreeMap::new(),
            styles: BTreeMap::new(),
            classes: Vec::new(),
            image,
        })
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeKind::Text(text.into()))
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    pub fn is_alive(&self, id: NodeId) -> bool {
        self.node(id).map(|node| !node.detached).unwrap_or(false)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|node| node.children.as_slice()).unwrap_or(&[])
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match self.node(id).map(|node| &node.kind) {
            Some(NodeKind::Element { tag, .. }) => Some(tag.as_str()),
            _ => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.node(id).map(|node| &node.kind) {
            Some(NodeKind::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn set_text(&mut self, id: NodeId, value: impl Into<String>) {
        if let Some(node) = self.node_mut(id) {
            if let NodeKind::Text(text) = &mut node.kind {
                *text = value.into();
            }
        }
    }

    /// Attach `child` under `parent`, detaching it from any previous parent.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if parent == child {
            return;
        }
        self.unlink(child);
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
            node.detached = false;
        }
        if let Some(node) = self.node_mut(parent) {
            node.children.push(child);
        }
    }

    fn unlink(&mut self, id: NodeId) {
        if let Some(parent) = self.parent(id) {
            if let Some(node) = self.node_mut(parent) {
                node.children.retain(|&c| c != id);
            }
        }
        if let Some(node) = self.node_mut(id) {
            node.parent = None;
        }
    }

    /// Detach `id` and its whole subtree. Idempotent.
    pub fn remove_subtree(&mut self, id: NodeId) {
        self.unlink(id);
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.node_mut(next) {
                node.detached = true;
                stack.extend(node.children.iter().copied());
            }
        }
    }

    /// Drop all children of `id` (markup replacement).
    pub fn clear_children(&mut self, id: NodeId) {
        let children: Vec<NodeId> = self.children(id).to_vec();
        for child in children {
            self.remove_subtree(child);
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match self.node(id).map(|node| &node.kind) {
            Some(NodeKind::Element { attrs, .. }) => attrs.get(name).map(String::as_str),
            _ => None,
        }
    }

    pub fn set_attr(&mut self, id: NodeId, name: impl Into<String>, value: impl Into<String>) {
        if let Some(node) = self.node_mut(id) {
            if let NodeKind::Element { attrs, .. } = &mut node.kind {
                attrs.insert(name.into(), value.into());
            }
        }
    }

    pub fn style(&self, id: NodeId, property: &str) -> Option<&str> {
        match self.node(id).map(|node| &node.kind) {
            Some(NodeKind::Element { styles, .. }) => styles.get(property).map(String::as_str),
            _ => None,
        }
    }

    pub fn set_style(&mut self, id: NodeId, property: impl Into<String>, value: impl Into<String>) {
        if let Some(node) = self.node_mut(id) {
            if let NodeKind::Element { styles, .. } = &mut node.kind {
                styles.insert(property.into(), value.into());
            }
        }
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        match self.node(id).map(|node| &node.kind) {
            Some(NodeKind::Element { classes, .. }) => classes.iter().any(|c| c == class),
            _ => false,
        }
    }

    pub fn add_class(&mut self, id: NodeId, class: &str) {
        if let Some(node) = self.node_mut(id) {
            if let NodeKind::Element { classes, .. } = &mut node.kind {
                if !classes.iter().any(|c| c == class) {
                    classes.push(class.to_string());
                }
            }
        }
    }

    pub fn remove_class(&mut self, id: NodeId, class: &str) {
        if let Some(node) = self.node_mut(id) {
            if let NodeKind::Element { classes, .. } = &mut node.kind {
                classes.retain(|c| c != class);
            }
        }
    }

    /// Depth-first descendants of `root`, excluding `root` itself.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(root).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// All image elements under `root`, in document order.
    pub fn images_under(&self, root: NodeId) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|&id| self.image_state(id).is_some())
            .collect()
    }

    pub fn image_state(&self, id: NodeId) -> Option<ImageState> {
        match self.node(id).map(|node| &node.kind) {
            Some(NodeKind::Element { image, .. }) => *image,
            _ => None,
        }
    }

    /// Transition an image to loaded. Returns false when the node is not a
    /// pending image (already settled, detached from the arena, or not an
    /// image at all) so double transitions stay no-ops.
    pub fn mark_image_loaded(&mut self, id: NodeId, natural: Size) -> bool {
        self.transition_image(id, ImageState::Loaded(natural))
    }

    /// Transition an image to failed. Same idempotency rules as
    /// [`Document::mark_image_loaded`].
    pub fn mark_image_failed(&mut self, id: NodeId) -> bool {
        self.transition_image(id, ImageState::Failed)
    }

    fn transition_image(&mut self, id: NodeId, next: ImageState) -> bool {
        let Some(node) = self.node_mut(id) else {
            return false;
        };
        if let NodeKind::Element { image: Some(state), .. } = &mut node.kind {
            if state.is_terminal() {
                return false;
            }
            *state = next;
            return true;
        }
        false
    }

    /// Walk ancestors from `id` (inclusive) to the root.
    pub fn ancestors_inclusive(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cursor = Some(id);
        while let Some(next) = cursor {
            out.push(next);
            cursor = self.parent(next);
        }
        out
    }

}
