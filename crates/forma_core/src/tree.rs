//! The construct tree.
//!
//! Nodes live in an arena owned by [`App`] and are addressed by [`NodeId`].
//! Every node is owned by exactly one parent; sibling ids are unique; paths
//! are the `/`-joined ids from (but excluding) the root.
//!
//! # Traversal order
//!
//! [`TraversalOrder::PreOrder`] visits a parent before its children and
//! children in insertion order. Validation and resolution use it.
//! [`TraversalOrder::PostOrder`] visits children (in insertion order) before
//! their parent.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aspect::Aspect;
use crate::construct::{OutputProps, ParameterProps, ResourceProps, RuleProps, StackProps};
use crate::error::{CoreError, CoreResult};
use crate::token::{Attribute, LazyResolver, Token, TokenKind, TokenRegistry};
use crate::value::Value;

/// Handle to a node in an [`App`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Traversal order for descendant walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalOrder {
    PreOrder,
    PostOrder,
}

/// What a node represents.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Root,
    Stack(StackProps),
    Resource(ResourceProps),
    Parameter(ParameterProps),
    Output(OutputProps),
    Rule(RuleProps),
    /// Pure grouping construct with no template representation.
    Group,
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Root => "root",
            NodeKind::Stack(_) => "stack",
            NodeKind::Resource(_) => "resource",
            NodeKind::Parameter(_) => "parameter",
            NodeKind::Output(_) => "output",
            NodeKind::Rule(_) => "rule",
            NodeKind::Group => "group",
        }
    }

    /// Whether this node is a separately deployable primitive for ordering.
    pub fn is_ordering_root(&self) -> bool {
        matches!(self, NodeKind::Resource(_))
    }

    /// Whether this node appears in a template under a logical id.
    pub fn has_logical_id(&self) -> bool {
        matches!(
            self,
            NodeKind::Resource(_) | NodeKind::Parameter(_) | NodeKind::Output(_) | NodeKind::Rule(_)
        )
    }
}

/// Severity of a node annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationLevel {
    Info,
    Warning,
    Error,
}

/// Message attached to a node during construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub level: AnnotationLevel,
    pub message: String,
}

/// Validation hook: returns zero or more error messages for a node.
pub type ValidationHook = Box<dyn Fn(&App, NodeId) -> Vec<String>>;

/// A node in the construct tree.
pub struct Node {
    id: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    child_index: BTreeMap<String, NodeId>,
    kind: NodeKind,
    dependencies: Vec<NodeId>,
    metadata: BTreeMap<String, Value>,
    annotations: Vec<Annotation>,
    validations: Vec<ValidationHook>,
    logical_id_override: Option<String>,
}

impl Node {
    fn new(id: String, parent: Option<NodeId>, kind: NodeKind) -> Self {
        Self {
            id,
            parent,
            children: Vec::new(),
            child_index: BTreeMap::new(),
            kind,
            dependencies: Vec::new(),
            metadata: BTreeMap::new(),
            annotations: Vec::new(),
            validations: Vec::new(),
            logical_id_override: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Explicit dependency edges, in declaration order.
    pub fn dependencies(&self) -> &[NodeId] {
        &self.dependencies
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn logical_id_override(&self) -> Option<&str> {
        self.logical_id_override.as_deref()
    }

    pub(crate) fn validations(&self) -> &[ValidationHook] {
        &self.validations
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("kind", &self.kind)
            .field("dependencies", &self.dependencies)
            .field("validations", &self.validations.len())
            .finish()
    }
}

/// Root of a construct tree and owner of its tokens.
///
/// All identifier counters and registries are scoped to the app, so
/// independent apps can be built and synthesized side by side.
pub struct App {
    nodes: Vec<Node>,
    tokens: TokenRegistry,
    aspects: Vec<(NodeId, Box<dyn Aspect>)>,
    aspects_applied: bool,
    locked: bool,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    /// Create an empty app with a root node.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(String::new(), None, NodeKind::Root)],
            tokens: TokenRegistry::new(),
            aspects: Vec::new(),
            aspects_applied: false,
            locked: false,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Add a child node under `parent`.
    ///
    /// Fails immediately on an invalid or duplicate id.
    pub fn add_child(&mut self, parent: NodeId, id: &str, kind: NodeKind) -> CoreResult<NodeId> {
        self.ensure_unlocked("add child")?;
        self.check(parent)?;
        validate_id(id)?;

        if self.nodes[parent.0].child_index.contains_key(id) {
            return Err(CoreError::DuplicateId {
                parent: self.display_path(parent),
                id: id.to_string(),
            });
        }

        let node_id = NodeId(self.nodes.len());
        debug!("Adding {} '{}' under '{}'", kind.label(), id, self.display_path(parent));
        self.nodes.push(Node::new(id.to_string(), Some(parent), kind));
        let parent_node = &mut self.nodes[parent.0];
        parent_node.children.push(node_id);
        parent_node.child_index.insert(id.to_string(), node_id);
        Ok(node_id)
    }

    /// Find a direct child by id.
    pub fn find_child(&self, parent: NodeId, id: &str) -> Option<NodeId> {
        self.get(parent)?.child_index.get(id).copied()
    }

    /// Find a node by its `/`-separated path from the root.
    pub fn find_by_path(&self, path: &str) -> Option<NodeId> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self.root(), |node, segment| self.find_child(node, segment))
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Access a node.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this app.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).children()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent()
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        self.node(id).kind()
    }

    /// Ancestors from the root down to (and including) `id`.
    pub fn scopes(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            chain.push(node);
            current = self.nodes[node.0].parent;
        }
        chain.reverse();
        chain
    }

    /// Fully-qualified path of a node; empty for the root.
    pub fn path(&self, id: NodeId) -> String {
        self.scopes(id)
            .into_iter()
            .skip(1)
            .map(|n| self.nodes[n.0].id.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Path for diagnostics; `<root>` for the root node.
    pub fn display_path(&self, id: NodeId) -> String {
        let path = self.path(id);
        if path.is_empty() {
            "<root>".to_string()
        } else {
            path
        }
    }

    /// Nearest stack at or above `id`.
    pub fn stack_of(&self, id: NodeId) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(node) = current {
            if matches!(self.nodes[node.0].kind, NodeKind::Stack(_)) {
                return Some(node);
            }
            current = self.nodes[node.0].parent;
        }
        None
    }

    /// Nearest resource at or above `id`.
    pub fn enclosing_resource(&self, id: NodeId) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(node) = current {
            if self.nodes[node.0].kind.is_ordering_root() {
                return Some(node);
            }
            current = self.nodes[node.0].parent;
        }
        None
    }

    /// Visit `root` and all of its descendants in the given order.
    pub fn for_each_descendant<F>(&self, root: NodeId, order: TraversalOrder, mut visitor: F)
    where
        F: FnMut(NodeId),
    {
        match order {
            TraversalOrder::PreOrder => {
                let mut pending = vec![root];
                while let Some(node) = pending.pop() {
                    visitor(node);
                    pending.extend(self.nodes[node.0].children.iter().rev().copied());
                }
            }
            TraversalOrder::PostOrder => {
                let mut pending = vec![(root, false)];
                while let Some((node, expanded)) = pending.pop() {
                    if expanded {
                        visitor(node);
                    } else {
                        pending.push((node, true));
                        pending.extend(
                            self.nodes[node.0].children.iter().rev().map(|c| (*c, false)),
                        );
                    }
                }
            }
        }
    }

    /// Collect `root` and its descendants in the given order.
    pub fn descendants(&self, root: NodeId, order: TraversalOrder) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.for_each_descendant(root, order, |n| out.push(n));
        out
    }

    /// All stacks in pre-order.
    pub fn stacks(&self) -> Vec<NodeId> {
        self.descendants(self.root(), TraversalOrder::PreOrder)
            .into_iter()
            .filter(|n| matches!(self.nodes[n.0].kind, NodeKind::Stack(_)))
            .collect()
    }

    /// Resources in the subtree of `id`, in pre-order.
    pub fn resources_under(&self, id: NodeId) -> Vec<NodeId> {
        self.descendants(id, TraversalOrder::PreOrder)
            .into_iter()
            .filter(|n| self.nodes[n.0].kind.is_ordering_root())
            .collect()
    }

    /// Declare that `from` depends on `on`.
    pub fn add_dependency(&mut self, from: NodeId, on: NodeId) -> CoreResult<()> {
        self.ensure_unlocked("add dependency")?;
        self.check(from)?;
        self.check(on)?;
        let deps = &mut self.nodes[from.0].dependencies;
        if !deps.contains(&on) {
            deps.push(on);
        }
        Ok(())
    }

    /// Attach a validation hook to a node.
    pub fn add_validation<F>(&mut self, node: NodeId, hook: F) -> CoreResult<()>
    where
        F: Fn(&App, NodeId) -> Vec<String> + 'static,
    {
        self.ensure_unlocked("add validation")?;
        self.check(node)?;
        self.nodes[node.0].validations.push(Box::new(hook));
        Ok(())
    }

    /// Attach an info, warning or error message to a node.
    ///
    /// Error annotations fail validation.
    pub fn annotate(
        &mut self,
        node: NodeId,
        level: AnnotationLevel,
        message: impl Into<String>,
    ) -> CoreResult<()> {
        self.check(node)?;
        self.nodes[node.0].annotations.push(Annotation {
            level,
            message: message.into(),
        });
        Ok(())
    }

    /// Add a metadata entry, rendered into the resource's template metadata.
    pub fn add_metadata(
        &mut self,
        node: NodeId,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> CoreResult<()> {
        self.ensure_unlocked("add metadata")?;
        self.check(node)?;
        self.nodes[node.0].metadata.insert(key.into(), value.into());
        Ok(())
    }

    /// Pin the logical id of a node instead of deriving it from its path.
    pub fn override_logical_id(&mut self, node: NodeId, logical_id: impl Into<String>) -> CoreResult<()> {
        self.ensure_unlocked("override logical id")?;
        self.check(node)?;
        let logical_id = logical_id.into();
        if logical_id.is_empty() || !logical_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CoreError::InvalidId {
                id: logical_id,
                reason: "logical ids must be non-empty and alphanumeric".to_string(),
            });
        }
        self.nodes[node.0].logical_id_override = Some(logical_id);
        Ok(())
    }

    /// Mutable access to a node's kind; fails once the tree is locked.
    pub fn kind_mut(&mut self, node: NodeId) -> CoreResult<&mut NodeKind> {
        self.ensure_unlocked("modify node")?;
        self.check(node)?;
        Ok(&mut self.nodes[node.0].kind)
    }

    /// Register an aspect to visit every node under `scope` before synthesis.
    pub fn add_aspect<A: Aspect + 'static>(&mut self, scope: NodeId, aspect: A) -> CoreResult<()> {
        self.ensure_unlocked("add aspect")?;
        self.check(scope)?;
        self.aspects.push((scope, Box::new(aspect)));
        Ok(())
    }

    /// Apply registered aspects once, in registration order.
    ///
    /// Each aspect visits its scope in pre-order. Nodes added by an aspect
    /// are not visited by aspects already applied.
    pub(crate) fn apply_aspects(&mut self) -> CoreResult<()> {
        if self.aspects_applied {
            return Ok(());
        }
        let aspects = std::mem::take(&mut self.aspects);
        let result = self.visit_aspects(&aspects);
        self.aspects = aspects;
        if result.is_ok() {
            self.aspects_applied = true;
        }
        result
    }

    fn visit_aspects(&mut self, aspects: &[(NodeId, Box<dyn Aspect>)]) -> CoreResult<()> {
        for (scope, aspect) in aspects {
            for node in self.descendants(*scope, TraversalOrder::PreOrder) {
                aspect.visit(self, node)?;
            }
        }
        Ok(())
    }

    /// Number of registered aspects.
    pub fn aspect_count(&self) -> usize {
        self.aspects.len()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub(crate) fn lock(&mut self) {
        self.locked = true;
    }

    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    /// Token for a node's primary identifier (`Ref`).
    pub fn reference(&mut self, target: NodeId) -> Token {
        self.reference_token(target, Attribute::Ref)
    }

    /// Token for a string attribute of a node (`Fn::GetAtt`).
    pub fn get_att(&mut self, target: NodeId, name: &str) -> Token {
        self.reference_token(target, Attribute::get_att(name))
    }

    /// Token for a list-valued attribute; such attributes cannot cross stacks.
    pub fn get_att_list(&mut self, target: NodeId, name: &str) -> Token {
        self.reference_token(target, Attribute::get_att_list(name))
    }

    fn reference_token(&mut self, target: NodeId, attribute: Attribute) -> Token {
        let hint = match self.get(target) {
            Some(node) => format!("{}:{}", node.id, attribute.name()),
            None => attribute.name().to_string(),
        };
        self.tokens
            .register(&hint, TokenKind::Reference { target, attribute })
    }

    /// Token computed by `resolver` at synthesis time.
    pub fn lazy<F>(&mut self, hint: &str, resolver: F) -> Token
    where
        F: Fn(&crate::resolve::ResolveContext<'_>) -> anyhow::Result<Value> + 'static,
    {
        let resolver: LazyResolver = Box::new(resolver);
        self.tokens.register(hint, TokenKind::Lazy(resolver))
    }

    /// Token joining `parts` with `delimiter`.
    pub fn join<V: Into<Value>>(&mut self, delimiter: &str, parts: Vec<V>) -> Token {
        self.tokens.register(
            "Join",
            TokenKind::Join {
                delimiter: delimiter.to_string(),
                parts: parts.into_iter().map(Into::into).collect(),
            },
        )
    }

    /// Token for the time of the current synthesis run.
    pub fn synthesis_time(&mut self) -> Token {
        self.tokens.register("SynthesisTime", TokenKind::SynthesisTime)
    }

    fn check(&self, id: NodeId) -> CoreResult<()> {
        if id.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(CoreError::NodeNotFound(id.to_string()))
        }
    }

    fn ensure_unlocked(&self, action: &str) -> CoreResult<()> {
        if self.locked {
            return Err(CoreError::InvalidState(format!(
                "cannot {} after synthesis has started",
                action
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("nodes", &self.nodes.len())
            .field("tokens", &self.tokens.len())
            .field("aspects", &self.aspects.len())
            .field("locked", &self.locked)
            .finish()
    }
}

fn validate_id(id: &str) -> CoreResult<()> {
    if id.is_empty() {
        return Err(CoreError::InvalidId {
            id: id.to_string(),
            reason: "ids must not be empty".to_string(),
        });
    }
    if id.contains('/') {
        return Err(CoreError::InvalidId {
            id: id.to_string(),
            reason: "ids must not contain '/'".to_string(),
        });
    }
    if crate::encoding::contains_token(id) {
        return Err(CoreError::InvalidId {
            id: id.to_string(),
            reason: "ids must not contain tokens".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn group(app: &mut App, parent: NodeId, id: &str) -> NodeId {
        app.add_child(parent, id, NodeKind::Group).unwrap()
    }

    #[test]
    fn test_duplicate_sibling_id_fails_immediately() {
        let mut app = App::new();
        let root = app.root();
        group(&mut app, root, "A");

        let err = app.add_child(root, "A", NodeKind::Group).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateId { ref id, .. } if id == "A"));
    }

    #[test]
    fn test_same_id_allowed_under_different_parents() {
        let mut app = App::new();
        let root = app.root();
        let a = group(&mut app, root, "A");
        let b = group(&mut app, root, "B");
        group(&mut app, a, "Child");
        group(&mut app, b, "Child");

        assert_eq!(app.path(app.find_by_path("B/Child").unwrap()), "B/Child");
    }

    #[test]
    fn test_invalid_ids_rejected() {
        let mut app = App::new();
        let root = app.root();
        assert!(matches!(
            app.add_child(root, "", NodeKind::Group),
            Err(CoreError::InvalidId { .. })
        ));
        assert!(matches!(
            app.add_child(root, "a/b", NodeKind::Group),
            Err(CoreError::InvalidId { .. })
        ));
    }

    #[test]
    fn test_traversal_orders() {
        let mut app = App::new();
        let root = app.root();
        let a = group(&mut app, root, "A");
        let a1 = group(&mut app, a, "A1");
        let a2 = group(&mut app, a, "A2");
        let b = group(&mut app, root, "B");

        assert_eq!(
            app.descendants(root, TraversalOrder::PreOrder),
            vec![root, a, a1, a2, b]
        );
        assert_eq!(
            app.descendants(root, TraversalOrder::PostOrder),
            vec![a1, a2, a, b, root]
        );
    }

    #[test]
    fn test_find_child_and_path() {
        let mut app = App::new();
        let root = app.root();
        let a = group(&mut app, root, "A");
        let inner = group(&mut app, a, "Inner");

        assert_eq!(app.find_child(a, "Inner"), Some(inner));
        assert_eq!(app.find_child(a, "Missing"), None);
        assert_eq!(app.path(inner), "A/Inner");
        assert_eq!(app.path(root), "");
        assert_eq!(app.display_path(root), "<root>");
    }

    #[test]
    fn test_locked_tree_rejects_mutation() {
        let mut app = App::new();
        let root = app.root();
        let a = group(&mut app, root, "A");
        app.lock();

        assert!(matches!(
            app.add_child(root, "B", NodeKind::Group),
            Err(CoreError::InvalidState(_))
        ));
        assert!(matches!(app.add_dependency(a, root), Err(CoreError::InvalidState(_))));
        assert!(matches!(app.kind_mut(a), Err(CoreError::InvalidState(_))));
    }

    #[test]
    fn test_add_dependency_dedups() {
        let mut app = App::new();
        let root = app.root();
        let a = group(&mut app, root, "A");
        let b = group(&mut app, root, "B");
        app.add_dependency(a, b).unwrap();
        app.add_dependency(a, b).unwrap();
        assert_eq!(app.node(a).dependencies(), &[b]);
    }

    #[test]
    fn test_override_logical_id_must_be_alphanumeric() {
        let mut app = App::new();
        let root = app.root();
        let a = group(&mut app, root, "A");
        assert!(app.override_logical_id(a, "Bad-Id").is_err());
        app.override_logical_id(a, "GoodId").unwrap();
        assert_eq!(app.node(a).logical_id_override(), Some("GoodId"));
    }

    struct Counting(Rc<Cell<usize>>);

    impl Aspect for Counting {
        fn visit(&self, _app: &mut App, _node: NodeId) -> CoreResult<()> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    /// Fails on its first visit only.
    struct FailsOnce(Cell<bool>);

    impl Aspect for FailsOnce {
        fn visit(&self, _app: &mut App, node: NodeId) -> CoreResult<()> {
            if self.0.replace(false) {
                return Err(CoreError::InvalidState(format!("aspect rejected node {}", node.index())));
            }
            Ok(())
        }
    }

    #[test]
    fn test_failed_aspect_application_keeps_aspects() {
        let mut app = App::new();
        let root = app.root();
        group(&mut app, root, "A");
        let visits = Rc::new(Cell::new(0));
        app.add_aspect(root, FailsOnce(Cell::new(true))).unwrap();
        app.add_aspect(root, Counting(visits.clone())).unwrap();

        assert!(app.apply_aspects().is_err());
        assert_eq!(app.aspect_count(), 2);
        assert_eq!(visits.get(), 0);

        app.apply_aspects().unwrap();
        assert_eq!(app.aspect_count(), 2);
        assert_eq!(visits.get(), 2);

        // Applied once; later calls are no-ops.
        app.apply_aspects().unwrap();
        assert_eq!(visits.get(), 2);
    }
}
