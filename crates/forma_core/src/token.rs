//! Deferred values and the per-app token registry.
//!
//! A [`Token`] is a cheap handle (`id` + display hint). The behaviour behind
//! it lives in the owning [`crate::App`]'s [`TokenRegistry`] as a
//! [`TokenKind`], so resolution can match exhaustively on what a token is.
//!
//! Every registry draws an identity from a process-wide counter and stamps it
//! into the ids it issues. Two apps built the same way therefore never accept
//! each other's tokens.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::encoding;
use crate::resolve::ResolveContext;
use crate::tree::NodeId;
use crate::value::Value;

static NEXT_REGISTRY: AtomicU32 = AtomicU32::new(1);

/// Identity of a token: the issuing registry plus its position there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId {
    registry: u32,
    index: u32,
}

impl TokenId {
    pub(crate) fn new(registry: u32, index: u32) -> Self {
        Self { registry, index }
    }

    /// Identity of the registry that issued this token.
    pub fn registry(&self) -> u32 {
        self.registry
    }

    /// Position of the token within its registry.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.registry, self.index)
    }
}

/// Handle to a registered token.
///
/// `Display` renders the string encoding, so `format!("logs-{}", token)`
/// embeds the token in a string property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    id: TokenId,
    hint: String,
}

impl Token {
    pub(crate) fn new(id: TokenId, hint: String) -> Self {
        Self { id, hint }
    }

    pub fn id(&self) -> TokenId {
        self.id
    }

    pub fn hint(&self) -> &str {
        &self.hint
    }

    /// Encode this token for embedding inside a string.
    pub fn as_string(&self) -> String {
        encoding::encode_string(self.id, &self.hint)
    }

    /// Encode this token as a single-element list standing for a list value.
    pub fn as_list(&self) -> Vec<String> {
        vec![encoding::encode_list(self.id, &self.hint)]
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

/// Shape of a referenced attribute's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeShape {
    String,
    List,
}

/// Which value of a node a reference points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attribute {
    /// The node's primary identifier (`Ref`).
    Ref,
    /// A named attribute (`Fn::GetAtt`).
    GetAtt { name: String, shape: AttributeShape },
}

impl Attribute {
    pub fn get_att(name: impl Into<String>) -> Self {
        Attribute::GetAtt {
            name: name.into(),
            shape: AttributeShape::String,
        }
    }

    pub fn get_att_list(name: impl Into<String>) -> Self {
        Attribute::GetAtt {
            name: name.into(),
            shape: AttributeShape::List,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Attribute::Ref => "Ref",
            Attribute::GetAtt { name, .. } => name,
        }
    }

    pub fn shape(&self) -> AttributeShape {
        match self {
            Attribute::Ref => AttributeShape::String,
            Attribute::GetAtt { shape, .. } => *shape,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Ref => write!(f, "Ref"),
            Attribute::GetAtt { name, .. } => write!(f, "attribute '{}'", name),
        }
    }
}

/// User resolver closure for lazy tokens.
///
/// Must be deterministic: resolving the same token twice in a run has to
/// produce the same value.
pub type LazyResolver = Box<dyn Fn(&ResolveContext<'_>) -> anyhow::Result<Value>>;

/// What a token stands for.
pub enum TokenKind {
    /// Intrinsic reference to a node or one of its attributes.
    Reference { target: NodeId, attribute: Attribute },
    /// Join of string parts with a delimiter.
    Join { delimiter: String, parts: Vec<Value> },
    /// Value computed at synthesis time by a user closure.
    Lazy(LazyResolver),
    /// Timestamp of the current synthesis run. Differs between runs.
    SynthesisTime,
}

impl fmt::Debug for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Reference { target, attribute } => f
                .debug_struct("Reference")
                .field("target", target)
                .field("attribute", attribute)
                .finish(),
            TokenKind::Join { delimiter, parts } => f
                .debug_struct("Join")
                .field("delimiter", delimiter)
                .field("parts", parts)
                .finish(),
            TokenKind::Lazy(_) => f.write_str("Lazy(..)"),
            TokenKind::SynthesisTime => f.write_str("SynthesisTime"),
        }
    }
}

#[derive(Debug)]
struct Registered {
    hint: String,
    kind: TokenKind,
}

/// Registry of every token created through one app.
#[derive(Debug)]
pub struct TokenRegistry {
    identity: u32,
    entries: Vec<Registered>,
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self {
            identity: NEXT_REGISTRY.fetch_add(1, Ordering::Relaxed),
            entries: Vec::new(),
        }
    }

    /// Identity stamped into every id this registry issues.
    pub fn identity(&self) -> u32 {
        self.identity
    }

    /// Register a token and return its handle.
    pub fn register(&mut self, hint: &str, kind: TokenKind) -> Token {
        let id = TokenId::new(self.identity, self.entries.len() as u32);
        let hint = encoding::sanitize_hint(hint);
        self.entries.push(Registered {
            hint: hint.clone(),
            kind,
        });
        Token::new(id, hint)
    }

    /// Look up a token's kind.
    ///
    /// Returns `None` for ids issued by another registry, for indexes this
    /// registry never handed out, and when the hint does not match.
    pub fn lookup(&self, id: TokenId, hint: &str) -> Option<&TokenKind> {
        if id.registry != self.identity {
            return None;
        }
        self.entries
            .get(id.index as usize)
            .filter(|entry| entry.hint == hint)
            .map(|entry| &entry.kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
