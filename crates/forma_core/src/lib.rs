//! # forma_core
//!
//! Construct tree, lazy token resolution and template synthesis for forma.
//!
//! An [`App`] owns a tree of constructs: stacks (deployable units) containing
//! resources, parameters, outputs and rules, optionally organized in groups.
//! Values that are not known while the tree is being built are represented by
//! [`Token`]s, which are resolved during synthesis.
//!
//! ## Features
//!
//! - **Tokens**: references, joins, lazy values and the synthesis timestamp,
//!   embeddable in strings and lists
//! - **Deterministic identifiers**: logical ids derived from construct paths
//! - **Ordering**: resources and stacks ordered by explicit and implicit
//!   dependencies, with cycles reported in full
//! - **Cross-stack references**: materialized as exports and imports
//! - **Aspects**: visitors applied to a subtree before synthesis
//!
//! ## Example
//!
//! ```rust
//! use forma_core::{App, CfnResource, HasAttributes, Stack, SynthConfig, Synthesizer};
//!
//! let mut app = App::new();
//! let storage = Stack::new(&mut app, "Storage").unwrap();
//! let compute = Stack::new(&mut app, "Compute").unwrap();
//!
//! let bucket = CfnResource::new(&mut app, &storage, "Bucket", "AWS::S3::Bucket").unwrap();
//! let arn = bucket.attribute(&mut app, "Arn");
//!
//! let function = CfnResource::new(&mut app, &compute, "Handler", "AWS::Lambda::Function").unwrap();
//! function.set_property(&mut app, "Description", format!("reads {}", arn)).unwrap();
//!
//! let assembly = Synthesizer::new(SynthConfig::default()).synthesize(&mut app).unwrap();
//! assert_eq!(assembly.manifest.deployment_order, vec!["Storage", "Compute"]);
//! ```

pub mod aspect;
pub mod construct;
pub mod context;
pub mod encoding;
pub mod error;
pub mod graph;
pub mod manifest;
pub mod naming;
pub mod reference;
pub mod resolve;
pub mod synth;
pub mod template;
pub mod token;
pub mod tree;
pub mod value;

pub use aspect::{Aspect, Tag};
pub use construct::{
    CfnOutput, CfnParameter, CfnResource, CfnRule, Construct, Group, HasAttributes,
    OutputProps, ParameterProps, Referenceable, RemovalPolicy, ResourceProps, RuleAssertion,
    RuleProps, Stack, StackProps,
};
pub use context::{CrossStackMode, OutputFormat, SynthConfig, ToolingRequirement};
pub use error::{CoreError, CoreResult};
pub use graph::{Cycle, DependencyGraph};
pub use manifest::{AssemblyManifest, ExportPairing, ManifestMessage, StackArtifactEntry};
pub use naming::LogicalIds;
pub use reference::{ExportRecord, ImportRecord, Reference, ReferenceTracker};
pub use resolve::{resolve, ReferenceResolver, ResolveContext};
pub use synth::{
    CloudAssembly, DeploymentPlan, StackArtifact, SynthPhase, SynthesisRun, Synthesizer,
    ValidationMessage,
};
pub use template::Template;
pub use token::{Attribute, AttributeShape, Token, TokenId, TokenKind};
pub use tree::{Annotation, AnnotationLevel, App, Node, NodeId, NodeKind, TraversalOrder};
pub use value::Value;
