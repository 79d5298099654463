//! Reference discovery and cross-stack export/import materialization.
//!
//! Synthesis resolves every value twice. The first pass runs with a
//! [`ReferenceCollector`], which records each reference token it reaches and
//! returns a placeholder. The recorded references are fed to a
//! [`ReferenceTracker`], which decides for each one whether it stays a local
//! intrinsic or becomes an export in the producing stack paired with an import
//! in the consuming stack. The second pass resolves against the tracker.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value as Json};
use tracing::{debug, info};

use crate::context::CrossStackMode;
use crate::error::{CoreError, CoreResult};
use crate::naming::{self, LogicalIds};
use crate::resolve::{ReferenceResolver, ResolveContext};
use crate::token::{Attribute, AttributeShape};
use crate::tree::{App, NodeId};

/// A value of a producer node: its primary identifier or a named attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    pub producer: NodeId,
    pub attribute: Attribute,
}

/// A reference reached while resolving the values of `consumer`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReferenceRecord {
    pub consumer: NodeId,
    pub reference: Reference,
}

/// Records references during the discovery pass.
#[derive(Debug, Default)]
pub struct ReferenceCollector {
    records: RefCell<Vec<ReferenceRecord>>,
}

impl ReferenceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded references, deduplicated, in first-seen order.
    pub fn into_records(self) -> Vec<ReferenceRecord> {
        let mut seen = BTreeSet::new();
        self.records
            .into_inner()
            .into_iter()
            .filter(|r| seen.insert(r.clone()))
            .collect()
    }
}

impl ReferenceResolver for ReferenceCollector {
    fn resolve_reference(
        &self,
        ctx: &ResolveContext<'_>,
        target: NodeId,
        attribute: &Attribute,
    ) -> CoreResult<Json> {
        self.records.borrow_mut().push(ReferenceRecord {
            consumer: ctx.node(),
            reference: Reference {
                producer: target,
                attribute: attribute.clone(),
            },
        });
        // Placeholder with the shape of an intrinsic so splicing behaves as in
        // the final pass.
        Ok(json!({ "Ref": ctx.app().path(target) }))
    }
}

/// An output published by a producer stack.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRecord {
    pub producer_stack: NodeId,
    pub reference: Reference,
    /// Logical id of the output in the producer's template.
    pub output_id: String,
    pub export_name: String,
    /// Local intrinsic exported by the output.
    pub value: Json,
}

/// A consumer stack's view of an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    pub consumer_stack: NodeId,
    pub producer_stack: NodeId,
    pub export_name: String,
    pub output_id: String,
    /// Parameter declared in the consumer under [`CrossStackMode::Parameter`].
    pub parameter_id: Option<String>,
}

/// Materializes exports and imports for references that cross stacks.
#[derive(Debug)]
pub struct ReferenceTracker {
    mode: CrossStackMode,
    ids: LogicalIds,
    exports: BTreeMap<Reference, ExportRecord>,
    imports: BTreeMap<(NodeId, Reference), ImportRecord>,
    stack_edges: BTreeSet<(NodeId, NodeId)>,
}

impl ReferenceTracker {
    pub fn new(mode: CrossStackMode, ids: LogicalIds) -> Self {
        Self {
            mode,
            ids,
            exports: BTreeMap::new(),
            imports: BTreeMap::new(),
            stack_edges: BTreeSet::new(),
        }
    }

    pub fn ids(&self) -> &LogicalIds {
        &self.ids
    }

    /// Register a discovered reference.
    ///
    /// Same-stack references need nothing. Cross-stack references produce
    /// exactly one export per (producer, attribute) and one import per
    /// consuming stack.
    pub fn record(&mut self, app: &App, record: &ReferenceRecord) -> CoreResult<()> {
        let reference = &record.reference;
        let producer = reference.producer;

        if app.get(producer).is_none() {
            return Err(CoreError::UnresolvedReference {
                reference: format!("{} of a node outside this app", reference.attribute),
                path: app.display_path(record.consumer),
            });
        }
        if !app.kind(producer).has_logical_id() {
            return Err(CoreError::UnresolvedReference {
                reference: format!(
                    "{} of '{}' ({} has no template identity)",
                    reference.attribute,
                    app.display_path(producer),
                    app.kind(producer).label()
                ),
                path: app.display_path(record.consumer),
            });
        }

        let Some(consumer_stack) = app.stack_of(record.consumer) else {
            return Err(CoreError::UnresolvedReference {
                reference: format!("{} of '{}'", reference.attribute, app.display_path(producer)),
                path: app.display_path(record.consumer),
            });
        };

        let producer_stack = match app.stack_of(producer) {
            Some(stack) if stack == consumer_stack => return Ok(()),
            Some(stack) => stack,
            None => {
                return Err(self.unexportable(
                    app,
                    reference,
                    consumer_stack,
                    "the producer does not belong to any stack",
                ))
            }
        };

        if reference.attribute.shape() == AttributeShape::List {
            return Err(self.unexportable(
                app,
                reference,
                consumer_stack,
                "list-valued attributes cannot be exported",
            ));
        }

        let export = match self.exports.get(reference) {
            Some(existing) => existing.clone(),
            None => {
                let logical_id = self.ids.require_logical_id(app, producer)?;
                let output_id = naming::export_output_id(logical_id, &reference.attribute);
                let stack_name = self.ids.require_stack_name(app, producer_stack)?;
                let export = ExportRecord {
                    producer_stack,
                    reference: reference.clone(),
                    export_name: naming::export_name(stack_name, &output_id),
                    value: local_intrinsic(logical_id, &reference.attribute),
                    output_id,
                };
                info!(
                    "Exporting {} of {} as {}",
                    reference.attribute,
                    app.path(producer),
                    export.export_name
                );
                self.exports.insert(reference.clone(), export.clone());
                export
            }
        };

        let key = (consumer_stack, reference.clone());
        if !self.imports.contains_key(&key) {
            let parameter_id = match self.mode {
                CrossStackMode::ImportValue => None,
                CrossStackMode::Parameter => Some(import_parameter_id(&export.output_id)),
            };
            debug!(
                "Stack {} imports {}",
                app.path(consumer_stack),
                export.export_name
            );
            self.imports.insert(
                key,
                ImportRecord {
                    consumer_stack,
                    producer_stack,
                    export_name: export.export_name.clone(),
                    output_id: export.output_id.clone(),
                    parameter_id,
                },
            );
        }
        self.stack_edges.insert((consumer_stack, producer_stack));
        Ok(())
    }

    /// Exports published by `stack`, ordered by producer and attribute.
    pub fn exports_of(&self, stack: NodeId) -> impl Iterator<Item = &ExportRecord> {
        self.exports
            .values()
            .filter(move |e| e.producer_stack == stack)
    }

    /// Imports consumed by `stack`.
    pub fn imports_of(&self, stack: NodeId) -> impl Iterator<Item = &ImportRecord> {
        self.imports
            .values()
            .filter(move |i| i.consumer_stack == stack)
    }

    pub fn exports(&self) -> impl Iterator<Item = &ExportRecord> {
        self.exports.values()
    }

    pub fn imports(&self) -> impl Iterator<Item = &ImportRecord> {
        self.imports.values()
    }

    /// `(consumer stack, producer stack)` pairs created by imports.
    pub fn stack_edges(&self) -> &BTreeSet<(NodeId, NodeId)> {
        &self.stack_edges
    }

    fn unexportable(
        &self,
        app: &App,
        reference: &Reference,
        consumer_stack: NodeId,
        reason: &str,
    ) -> CoreError {
        CoreError::UnexportableValue {
            attribute: reference.attribute.to_string(),
            producer: app.display_path(reference.producer),
            consumer: app.display_path(consumer_stack),
            reason: reason.to_string(),
        }
    }
}

impl ReferenceResolver for ReferenceTracker {
    fn resolve_reference(
        &self,
        ctx: &ResolveContext<'_>,
        target: NodeId,
        attribute: &Attribute,
    ) -> CoreResult<Json> {
        let app = ctx.app();
        let unresolved = || CoreError::UnresolvedReference {
            reference: format!("{} of '{}'", attribute, app.display_path(target)),
            path: ctx.node_path(),
        };

        let consumer_stack = ctx.stack().ok_or_else(unresolved)?;
        if app.stack_of(target) == Some(consumer_stack) {
            let logical_id = self.ids.logical_id(target).ok_or_else(unresolved)?;
            return Ok(local_intrinsic(logical_id, attribute));
        }

        let reference = Reference {
            producer: target,
            attribute: attribute.clone(),
        };
        let import = self
            .imports
            .get(&(consumer_stack, reference))
            .ok_or_else(unresolved)?;
        Ok(match &import.parameter_id {
            Some(parameter) => json!({ "Ref": parameter }),
            None => json!({ "Fn::ImportValue": import.export_name }),
        })
    }
}

/// `Ref` or `Fn::GetAtt` on a logical id in the same template.
pub fn local_intrinsic(logical_id: &str, attribute: &Attribute) -> Json {
    match attribute {
        Attribute::Ref => json!({ "Ref": logical_id }),
        Attribute::GetAtt { name, .. } => json!({ "Fn::GetAtt": [logical_id, name] }),
    }
}

fn import_parameter_id(output_id: &str) -> String {
    format!("Import{}", output_id.trim_start_matches("ExportsOutput"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::{CfnResource, Construct, Group, Stack};

    struct Fixture {
        app: App,
        producer: NodeId,
        consumer_a: NodeId,
        consumer_b: NodeId,
        sibling: NodeId,
    }

    fn fixture() -> Fixture {
        let mut app = App::new();
        let storage = Stack::new(&mut app, "Storage").unwrap();
        let compute = Stack::new(&mut app, "Compute").unwrap();
        let bucket = CfnResource::new(&mut app, &storage, "Bucket", "AWS::S3::Bucket").unwrap();
        let sibling = CfnResource::new(&mut app, &storage, "Policy", "AWS::S3::BucketPolicy").unwrap();
        let a = CfnResource::new(&mut app, &compute, "FnA", "AWS::Lambda::Function").unwrap();
        let b = CfnResource::new(&mut app, &compute, "FnB", "AWS::Lambda::Function").unwrap();
        Fixture {
            app,
            producer: bucket.node_id(),
            consumer_a: a.node_id(),
            consumer_b: b.node_id(),
            sibling: sibling.node_id(),
        }
    }

    fn record(consumer: NodeId, producer: NodeId, attribute: Attribute) -> ReferenceRecord {
        ReferenceRecord {
            consumer,
            reference: Reference {
                producer,
                attribute,
            },
        }
    }

    fn tracker(app: &App, mode: CrossStackMode) -> ReferenceTracker {
        let (ids, messages) = LogicalIds::compute(app);
        assert!(messages.is_empty());
        ReferenceTracker::new(mode, ids)
    }

    #[test]
    fn test_same_stack_reference_needs_no_export() {
        let f = fixture();
        let mut tracker = tracker(&f.app, CrossStackMode::ImportValue);
        tracker
            .record(&f.app, &record(f.sibling, f.producer, Attribute::Ref))
            .unwrap();
        assert_eq!(tracker.exports().count(), 0);
        assert!(tracker.stack_edges().is_empty());
    }

    #[test]
    fn test_cross_stack_reference_exported_once() {
        let f = fixture();
        let mut tracker = tracker(&f.app, CrossStackMode::ImportValue);
        let arn = Attribute::get_att("Arn");
        tracker.record(&f.app, &record(f.consumer_a, f.producer, arn.clone())).unwrap();
        tracker.record(&f.app, &record(f.consumer_b, f.producer, arn.clone())).unwrap();
        tracker.record(&f.app, &record(f.consumer_a, f.producer, Attribute::Ref)).unwrap();

        let exports: Vec<_> = tracker.exports().collect();
        assert_eq!(exports.len(), 2);
        assert!(exports
            .iter()
            .any(|e| e.output_id.starts_with("ExportsOutputFnGetAttBucketArn")
                && e.export_name.starts_with("Storage:ExportsOutputFnGetAttBucketArn")
                && e.value == json!({"Fn::GetAtt": ["Bucket", "Arn"]})));
        // One import per consuming stack and attribute.
        assert_eq!(tracker.imports().count(), 2);
        let storage = f.app.stack_of(f.producer).unwrap();
        let compute = f.app.stack_of(f.consumer_a).unwrap();
        assert_eq!(
            tracker.stack_edges().iter().copied().collect::<Vec<_>>(),
            vec![(compute, storage)]
        );
    }

    #[test]
    fn test_list_attribute_cannot_cross_stacks() {
        let f = fixture();
        let mut tracker = tracker(&f.app, CrossStackMode::ImportValue);
        let err = tracker
            .record(
                &f.app,
                &record(f.consumer_a, f.producer, Attribute::get_att_list("Endpoints")),
            )
            .unwrap_err();
        match err {
            CoreError::UnexportableValue {
                producer, consumer, ..
            } => {
                assert_eq!(producer, "Storage/Bucket");
                assert_eq!(consumer, "Compute");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_producer_outside_stack_is_unexportable() {
        let mut f = fixture();
        let root = f.app.root();
        let loose = Group::new(&mut f.app, &root, "Loose").unwrap();
        let orphan = f
            .app
            .add_child(
                loose.node_id(),
                "Orphan",
                crate::tree::NodeKind::Resource(crate::construct::ResourceProps::new("AWS::SNS::Topic")),
            )
            .unwrap();
        let mut tracker = tracker(&f.app, CrossStackMode::ImportValue);

        let err = tracker
            .record(&f.app, &record(f.consumer_a, orphan, Attribute::Ref))
            .unwrap_err();
        assert!(matches!(err, CoreError::UnexportableValue { .. }));
    }

    #[test]
    fn test_producer_from_another_app_is_unresolved() {
        let f = fixture();
        let mut bigger = App::new();
        let stack = Stack::new(&mut bigger, "Big").unwrap();
        let mut last = stack.node_id();
        for i in 0..10 {
            let topic = format!("Topic{}", i);
            last = CfnResource::new(&mut bigger, &stack, &topic, "AWS::SNS::Topic")
                .unwrap()
                .node_id();
        }
        assert!(f.app.get(last).is_none());
        let mut tracker = tracker(&f.app, CrossStackMode::ImportValue);

        let err = tracker
            .record(&f.app, &record(f.consumer_a, last, Attribute::Ref))
            .unwrap_err();
        assert!(matches!(err, CoreError::UnresolvedReference { .. }), "{err}");
    }

    #[test]
    fn test_parameter_mode_names_import_parameter() {
        let f = fixture();
        let mut tracker = tracker(&f.app, CrossStackMode::Parameter);
        tracker
            .record(&f.app, &record(f.consumer_a, f.producer, Attribute::Ref))
            .unwrap();
        let import = tracker.imports().next().unwrap();
        let parameter = import.parameter_id.as_deref().unwrap();
        assert!(parameter.starts_with("ImportRefBucket"));
    }
}
