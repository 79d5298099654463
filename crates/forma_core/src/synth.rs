//! The synthesizer: validates a construct tree, resolves every value and
//! serializes each stack into a template.
//!
//! A run moves through [`SynthPhase`]s:
//!
//! ```text
//! Building -> Validating -> Resolving -> Serializing -> Done
//!                  \              \             \
//!                   +--------------+-------------+--> Failed
//! ```
//!
//! Any error aborts the whole run; no partial templates are produced.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};
use tracing::{debug, info, warn};

use crate::context::{OutputFormat, SynthConfig, ToolingRequirement};
use crate::error::{CoreError, CoreResult};
use crate::graph::{Cycle, DependencyGraph};
use crate::manifest::{AssemblyManifest, ExportPairing, ManifestMessage, StackArtifactEntry};
use crate::naming::LogicalIds;
use crate::reference::{ReferenceCollector, ReferenceRecord, ReferenceTracker};
use crate::resolve::{self, ReferenceResolver, ResolveContext};
use crate::template::{
    AssertionEntry, ExportName, OutputEntry, ParameterEntry, ResourceEntry, RuleEntry, Template,
};
use crate::tree::{AnnotationLevel, App, NodeId, NodeKind, TraversalOrder};

/// Metadata key recording a resource's construct path.
pub const PATH_METADATA_KEY: &str = "forma:path";

/// Logical id of the tooling version rule.
pub const TOOLING_RULE_ID: &str = "CheckToolingVersion";

/// Phase of a synthesis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthPhase {
    Building,
    Validating,
    Resolving,
    Serializing,
    Done,
    Failed,
}

impl SynthPhase {
    pub fn can_transition_to(&self, next: SynthPhase) -> bool {
        use SynthPhase::*;
        matches!(
            (self, next),
            (Building, Validating)
                | (Validating, Resolving)
                | (Resolving, Serializing)
                | (Serializing, Done)
                | (Validating, Failed)
                | (Resolving, Failed)
                | (Serializing, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SynthPhase::Done | SynthPhase::Failed)
    }
}

impl fmt::Display for SynthPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SynthPhase::Building => "building",
            SynthPhase::Validating => "validating",
            SynthPhase::Resolving => "resolving",
            SynthPhase::Serializing => "serializing",
            SynthPhase::Done => "done",
            SynthPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A validation error attributed to a construct path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationMessage {
    pub path: String,
    pub message: String,
}

impl ValidationMessage {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.path, self.message)
    }
}

/// Per-run state. Nothing about a run outlives it or is shared between runs.
#[derive(Debug, Clone)]
pub struct SynthesisRun {
    phase: SynthPhase,
    timestamp: String,
}

impl SynthesisRun {
    pub fn new(timestamp: impl Into<String>) -> Self {
        Self {
            phase: SynthPhase::Building,
            timestamp: timestamp.into(),
        }
    }

    pub fn phase(&self) -> SynthPhase {
        self.phase
    }

    /// Timestamp every synthesis-time token resolves to during this run.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn transition(&mut self, next: SynthPhase) -> CoreResult<()> {
        if !self.phase.can_transition_to(next) {
            return Err(CoreError::InvalidState(format!(
                "invalid synthesis phase transition: {} -> {}",
                self.phase, next
            )));
        }
        info!("Synthesis phase: {} -> {}", self.phase, next);
        self.phase = next;
        Ok(())
    }
}

/// One synthesized stack.
#[derive(Debug, Clone, PartialEq)]
pub struct StackArtifact {
    pub name: String,
    pub construct_path: String,
    pub template_file: String,
    pub template: Template,
    /// Names of stacks this one depends on.
    pub dependencies: Vec<String>,
}

impl StackArtifact {
    pub fn render(&self, format: OutputFormat) -> CoreResult<String> {
        match format {
            OutputFormat::Json => self.template.to_json(),
            OutputFormat::Yaml => self.template.to_yaml(),
        }
    }
}

/// Result of synthesis: templates in deployment order plus the manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudAssembly {
    pub stacks: Vec<StackArtifact>,
    pub manifest: AssemblyManifest,
}

impl CloudAssembly {
    pub fn stack(&self, name: &str) -> Option<&StackArtifact> {
        self.stacks.iter().find(|s| s.name == name)
    }
}

/// Deployment ordering computed for a run.
#[derive(Debug, Clone, Default)]
pub struct DeploymentPlan {
    /// Resources of every stack, dependencies first.
    pub resource_order: Vec<NodeId>,
    /// Stacks, dependencies first.
    pub stack_order: Vec<NodeId>,
    /// Stack dependencies, in deployment order of the targets.
    pub stack_dependencies: BTreeMap<NodeId, Vec<NodeId>>,
    /// Same-stack explicit dependencies, rendered as `DependsOn`.
    pub depends_on: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

/// Turns construct trees into cloud assemblies.
#[derive(Debug, Clone, Default)]
pub struct Synthesizer {
    config: SynthConfig,
    timestamp: Option<String>,
}

impl Synthesizer {
    pub fn new(config: SynthConfig) -> Self {
        Self {
            config,
            timestamp: None,
        }
    }

    /// Pin the synthesis timestamp instead of using the current time.
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    pub fn config(&self) -> &SynthConfig {
        &self.config
    }

    /// Synthesize every stack of `app`.
    ///
    /// Applies aspects and locks the tree first; the app cannot be modified
    /// afterwards. Synthesizing the same app again yields the same assembly.
    pub fn synthesize(&self, app: &mut App) -> CoreResult<CloudAssembly> {
        self.config.validate()?;
        let timestamp = self
            .timestamp
            .clone()
            .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        let mut run = SynthesisRun::new(timestamp);
        info!("Synthesizing app with {} nodes", app.len());

        app.apply_aspects()?;
        app.lock();

        let app: &App = app;
        run.transition(SynthPhase::Validating)?;
        let (ids, notices) = match validate(app, &self.config) {
            Ok(validated) => validated,
            Err(e) => return fail(&mut run, e),
        };

        run.transition(SynthPhase::Resolving)?;
        let resolved = match self.resolve_phase(app, &run, ids) {
            Ok(resolved) => resolved,
            Err(e) => return fail(&mut run, e),
        };

        run.transition(SynthPhase::Serializing)?;
        let assembly = match self.serialize_phase(app, &run, &resolved, notices) {
            Ok(assembly) => assembly,
            Err(e) => return fail(&mut run, e),
        };

        run.transition(SynthPhase::Done)?;
        info!("Synthesized {} stack(s)", assembly.stacks.len());
        Ok(assembly)
    }

    /// Validate without synthesizing. Returns every error found.
    pub fn validate(&self, app: &mut App) -> CoreResult<Vec<ValidationMessage>> {
        app.apply_aspects()?;
        app.lock();
        match validate(app, &self.config) {
            Ok(_) => Ok(Vec::new()),
            Err(CoreError::ValidationFailed(messages)) => Ok(messages),
            Err(e) => Err(e),
        }
    }

    /// Compute the deployment plan without producing templates.
    pub fn plan(&self, app: &mut App) -> CoreResult<DeploymentPlan> {
        app.apply_aspects()?;
        app.lock();
        let app: &App = app;
        let (ids, _) = validate(app, &self.config)?;
        let run = SynthesisRun::new(String::new());
        Ok(self.resolve_phase(app, &run, ids)?.plan)
    }

    fn resolve_phase(&self, app: &App, run: &SynthesisRun, ids: LogicalIds) -> CoreResult<Resolved> {
        let collector = ReferenceCollector::new();
        {
            let resolver = NodeResolver::new(app, &collector, run.timestamp(), &self.config);
            for node in app.descendants(app.root(), TraversalOrder::PreOrder) {
                resolver.node(node)?;
            }
        }
        let records = collector.into_records();
        debug!("Discovered {} reference(s)", records.len());

        let mut tracker = ReferenceTracker::new(self.config.cross_stack, ids);
        for record in &records {
            tracker.record(app, record)?;
        }

        let plan = plan(app, &tracker, &records)?;

        let resolver = NodeResolver::new(app, &tracker, run.timestamp(), &self.config);
        let mut nodes = BTreeMap::new();
        for node in app.descendants(app.root(), TraversalOrder::PreOrder) {
            if let Some(resolved) = resolver.node(node)? {
                nodes.insert(node, resolved);
            }
        }

        Ok(Resolved {
            tracker,
            plan,
            nodes,
        })
    }

    fn serialize_phase(
        &self,
        app: &App,
        run: &SynthesisRun,
        resolved: &Resolved,
        notices: Vec<ManifestMessage>,
    ) -> CoreResult<CloudAssembly> {
        let ids = resolved.tracker.ids();
        let extension = self.config.output_format.extension();
        let mut stacks = Vec::new();
        let mut manifest = AssemblyManifest {
            messages: notices,
            ..AssemblyManifest::default()
        };

        for &stack in &resolved.plan.stack_order {
            let name = ids.require_stack_name(app, stack)?.to_string();
            let template = self.template(app, run, stack, resolved)?;
            let dependencies = resolved
                .plan
                .stack_dependencies
                .get(&stack)
                .map(|deps| {
                    deps.iter()
                        .map(|d| ids.require_stack_name(app, *d).map(str::to_string))
                        .collect::<CoreResult<Vec<_>>>()
                })
                .transpose()?
                .unwrap_or_default();
            let template_file = format!("{}.template.{}", name, extension);

            debug!(
                "Stack {} has {} resource(s)",
                name,
                template.resources.len()
            );
            manifest.artifacts.insert(
                name.clone(),
                StackArtifactEntry {
                    template_file: template_file.clone(),
                    construct_path: app.path(stack),
                    dependencies: dependencies.clone(),
                },
            );
            manifest.deployment_order.push(name.clone());
            stacks.push(StackArtifact {
                name,
                construct_path: app.path(stack),
                template_file,
                template,
                dependencies,
            });
        }

        for import in resolved.tracker.imports() {
            manifest.exports.push(ExportPairing {
                export_name: import.export_name.clone(),
                producer_stack: ids.require_stack_name(app, import.producer_stack)?.to_string(),
                output_id: import.output_id.clone(),
                consumer_stack: ids.require_stack_name(app, import.consumer_stack)?.to_string(),
                parameter: import.parameter_id.clone(),
            });
        }

        Ok(CloudAssembly { stacks, manifest })
    }

    fn template(
        &self,
        app: &App,
        run: &SynthesisRun,
        stack: NodeId,
        resolved: &Resolved,
    ) -> CoreResult<Template> {
        let ids = resolved.tracker.ids();
        let mut template = Template::default();
        if let NodeKind::Stack(props) = app.kind(stack) {
            template.description = props.description.clone();
        }

        let in_stack: Vec<NodeId> = app
            .descendants(stack, TraversalOrder::PreOrder)
            .into_iter()
            .filter(|n| app.stack_of(*n) == Some(stack))
            .collect();

        for &node in &in_stack {
            let Some(ResolvedNode::Parameter {
                default,
                allowed_values,
            }) = resolved.nodes.get(&node)
            else {
                continue;
            };
            let NodeKind::Parameter(props) = app.kind(node) else {
                continue;
            };
            let mut entry = ParameterEntry::new(props.parameter_type.clone());
            entry.default = default.clone();
            entry.description = props.description.clone();
            entry.allowed_values = allowed_values.clone();
            entry.no_echo = props.no_echo;
            insert_unique(
                app,
                &mut template.parameters,
                ids.require_logical_id(app, node)?,
                entry,
            )?;
        }
        for import in resolved.tracker.imports_of(stack) {
            if let Some(parameter) = &import.parameter_id {
                let mut entry = ParameterEntry::new("String");
                entry.description = Some(format!("Value of export {}", import.export_name));
                insert_unique(app, &mut template.parameters, parameter, entry)?;
            }
        }

        for &node in resolved
            .plan
            .resource_order
            .iter()
            .filter(|n| app.stack_of(**n) == Some(stack))
        {
            let (Some(ResolvedNode::Resource {
                properties,
                metadata,
            }), NodeKind::Resource(props)) = (resolved.nodes.get(&node), app.kind(node))
            else {
                continue;
            };
            let mut entry = ResourceEntry::new(props.resource_type.clone());
            entry.properties = properties.clone();
            entry.condition = props.condition.clone();
            entry.deletion_policy = props.deletion_policy;
            entry.update_replace_policy = props.update_replace_policy;
            entry.metadata = metadata.clone();
            if let Some(deps) = resolved.plan.depends_on.get(&node) {
                let mut depends_on = deps
                    .iter()
                    .map(|d| ids.require_logical_id(app, *d).map(str::to_string))
                    .collect::<CoreResult<Vec<_>>>()?;
                depends_on.sort();
                entry.depends_on = depends_on;
            }
            insert_unique(
                app,
                &mut template.resources,
                ids.require_logical_id(app, node)?,
                entry,
            )?;
        }

        for &node in &in_stack {
            let (Some(ResolvedNode::Output { value }), NodeKind::Output(props)) =
                (resolved.nodes.get(&node), app.kind(node))
            else {
                continue;
            };
            let entry = OutputEntry {
                value: value.clone(),
                description: props.description.clone(),
                export: props.export_name.clone().map(|name| ExportName { name }),
                condition: props.condition.clone(),
            };
            insert_unique(
                app,
                &mut template.outputs,
                ids.require_logical_id(app, node)?,
                entry,
            )?;
        }
        for export in resolved.tracker.exports_of(stack) {
            let entry = OutputEntry {
                value: export.value.clone(),
                description: None,
                export: Some(ExportName {
                    name: export.export_name.clone(),
                }),
                condition: None,
            };
            insert_unique(app, &mut template.outputs, &export.output_id, entry)?;
        }

        for &node in &in_stack {
            let Some(ResolvedNode::Rule {
                rule_condition,
                assertions,
            }) = resolved.nodes.get(&node)
            else {
                continue;
            };
            let entry = RuleEntry {
                rule_condition: rule_condition.clone(),
                assertions: assertions
                    .iter()
                    .map(|(assert, description)| AssertionEntry {
                        assert: assert.clone(),
                        assert_description: description.clone(),
                    })
                    .collect(),
            };
            insert_unique(
                app,
                &mut template.rules,
                ids.require_logical_id(app, node)?,
                entry,
            )?;
        }

        if let Some(tooling) = &self.config.tooling {
            add_tooling_check(app, &mut template, tooling)?;
        }

        debug!(
            "Rendered template for {} at {}",
            app.path(stack),
            run.timestamp()
        );
        Ok(template)
    }
}

fn fail<T>(run: &mut SynthesisRun, error: CoreError) -> CoreResult<T> {
    warn!("Synthesis failed during {}: {}", run.phase(), error);
    run.transition(SynthPhase::Failed)?;
    Err(error)
}

fn insert_unique<V>(
    app: &App,
    section: &mut indexmap::IndexMap<String, V>,
    id: &str,
    entry: V,
) -> CoreResult<()> {
    if section.contains_key(id) {
        return Err(CoreError::ValidationFailed(vec![ValidationMessage::new(
            app.display_path(app.root()),
            format!("template element '{}' is defined more than once", id),
        )]));
    }
    section.insert(id.to_string(), entry);
    Ok(())
}

/// Parameter and rule checking the deployed tooling version.
fn add_tooling_check(app: &App, template: &mut Template, tooling: &ToolingRequirement) -> CoreResult<()> {
    let mut parameter = ParameterEntry::new("AWS::SSM::Parameter::Value<String>");
    parameter.default = Some(Json::String(tooling.ssm_parameter.clone()));
    parameter.description = Some(format!(
        "Version of the deployment tooling, retrieved from {}.",
        tooling.ssm_parameter
    ));
    insert_unique(app, &mut template.parameters, &tooling.parameter_name, parameter)?;

    if tooling.unsupported_versions.is_empty() {
        return Ok(());
    }
    let rule = RuleEntry {
        rule_condition: None,
        assertions: vec![AssertionEntry {
            assert: json!({
                "Fn::Not": [{
                    "Fn::Contains": [tooling.unsupported_versions, { "Ref": tooling.parameter_name }]
                }]
            }),
            assert_description: format!(
                "Deployment tooling versions {} are not supported.",
                tooling.unsupported_versions.join(", ")
            ),
        }],
    };
    insert_unique(app, &mut template.rules, TOOLING_RULE_ID, rule)
}

/// Output of the resolving phase.
struct Resolved {
    tracker: ReferenceTracker,
    plan: DeploymentPlan,
    nodes: BTreeMap<NodeId, ResolvedNode>,
}

/// Resolved values of a template element.
#[derive(Debug, Clone)]
enum ResolvedNode {
    Resource {
        properties: Map<String, Json>,
        metadata: Map<String, Json>,
    },
    Parameter {
        default: Option<Json>,
        allowed_values: Vec<Json>,
    },
    Output {
        value: Json,
    },
    Rule {
        rule_condition: Option<Json>,
        assertions: Vec<(Json, String)>,
    },
}

/// Resolves the values of one node at a time against a reference resolver.
struct NodeResolver<'a> {
    app: &'a App,
    references: &'a dyn ReferenceResolver,
    timestamp: &'a str,
    config: &'a SynthConfig,
}

impl<'a> NodeResolver<'a> {
    fn new(
        app: &'a App,
        references: &'a dyn ReferenceResolver,
        timestamp: &'a str,
        config: &'a SynthConfig,
    ) -> Self {
        Self {
            app,
            references,
            timestamp,
            config,
        }
    }

    fn node(&self, node: NodeId) -> CoreResult<Option<ResolvedNode>> {
        let ctx = ResolveContext::new(
            self.app,
            node,
            self.references,
            self.timestamp,
            self.config.max_resolve_depth,
        );
        let resolved = match self.app.kind(node) {
            NodeKind::Resource(props) => {
                let mut properties = resolve::resolve_map(&props.properties, &ctx)?;
                for (path, value) in &props.overrides {
                    let value = resolve::resolve(value, &ctx)?;
                    let segments: Vec<&str> = path.split('.').collect();
                    set_json_path(&mut properties, &segments, value);
                }

                let mut metadata = Map::new();
                if self.config.path_metadata {
                    metadata.insert(
                        PATH_METADATA_KEY.to_string(),
                        Json::String(self.app.path(node)),
                    );
                }
                metadata.extend(resolve::resolve_map(self.app.node(node).metadata(), &ctx)?);
                ResolvedNode::Resource {
                    properties,
                    metadata,
                }
            }
            NodeKind::Parameter(props) => ResolvedNode::Parameter {
                default: props
                    .default
                    .as_ref()
                    .map(|v| resolve::resolve(v, &ctx))
                    .transpose()?,
                allowed_values: props
                    .allowed_values
                    .iter()
                    .map(|v| resolve::resolve(v, &ctx))
                    .collect::<CoreResult<_>>()?,
            },
            NodeKind::Output(props) => ResolvedNode::Output {
                value: resolve::resolve(&props.value, &ctx)?,
            },
            NodeKind::Rule(props) => ResolvedNode::Rule {
                rule_condition: props
                    .rule_condition
                    .as_ref()
                    .map(|v| resolve::resolve(v, &ctx))
                    .transpose()?,
                assertions: props
                    .assertions
                    .iter()
                    .map(|a| -> CoreResult<(Json, String)> {
                        Ok((resolve::resolve(&a.assert, &ctx)?, a.description.clone()))
                    })
                    .collect::<CoreResult<_>>()?,
            },
            NodeKind::Root | NodeKind::Stack(_) | NodeKind::Group => return Ok(None),
        };
        Ok(Some(resolved))
    }
}

/// Set `value` at `segments` inside `map`, creating intermediate objects.
/// A null value removes the key.
fn set_json_path(map: &mut Map<String, Json>, segments: &[&str], value: Json) {
    match segments {
        [] => {}
        [last] => {
            if value.is_null() {
                map.remove(*last);
            } else {
                map.insert(last.to_string(), value);
            }
        }
        [first, rest @ ..] => {
            let entry = map
                .entry(first.to_string())
                .or_insert_with(|| Json::Object(Map::new()));
            if !entry.is_object() {
                *entry = Json::Object(Map::new());
            }
            if let Json::Object(inner) = entry {
                set_json_path(inner, rest, value);
            }
        }
    }
}

/// Run every built-in check plus the user's validation hooks.
///
/// Returns the computed identifiers and the non-error annotations, or every
/// error found.
fn validate(app: &App, config: &SynthConfig) -> CoreResult<(LogicalIds, Vec<ManifestMessage>)> {
    let mut errors = Vec::new();
    let mut notices = Vec::new();

    for node in app.descendants(app.root(), TraversalOrder::PreOrder) {
        let path = app.display_path(node);
        for hook in app.node(node).validations() {
            errors.extend(
                hook(app, node)
                    .into_iter()
                    .map(|message| ValidationMessage::new(path.clone(), message)),
            );
        }

        for annotation in app.node(node).annotations() {
            match annotation.level {
                AnnotationLevel::Error => {
                    errors.push(ValidationMessage::new(path.clone(), annotation.message.clone()))
                }
                level => notices.push(ManifestMessage {
                    level,
                    path: path.clone(),
                    message: annotation.message.clone(),
                }),
            }
        }

        match app.kind(node) {
            NodeKind::Stack(_) => {
                let parent_stack = app.parent(node).and_then(|p| app.stack_of(p));
                if let Some(parent_stack) = parent_stack {
                    errors.push(ValidationMessage::new(
                        path.clone(),
                        format!(
                            "stacks cannot be nested (inside stack '{}')",
                            app.path(parent_stack)
                        ),
                    ));
                }
                if app.resources_under(node).is_empty() {
                    notices.push(ManifestMessage {
                        level: AnnotationLevel::Warning,
                        path: path.clone(),
                        message: "stack has no resources".to_string(),
                    });
                }
            }
            kind if kind.has_logical_id() && app.stack_of(node).is_none() => {
                errors.push(ValidationMessage::new(
                    path.clone(),
                    format!("{} must be defined inside a stack", kind.label()),
                ));
            }
            NodeKind::Output(props) if props.value.is_null() => {
                errors.push(ValidationMessage::new(path.clone(), "output has no value"));
            }
            _ => {}
        }
    }

    let (ids, collisions) = LogicalIds::compute(app);
    errors.extend(collisions);

    if let Some(tooling) = &config.tooling {
        for stack in app.stacks() {
            for node in app.descendants(stack, TraversalOrder::PreOrder) {
                let Some(id) = ids.logical_id(node) else {
                    continue;
                };
                if id == tooling.parameter_name || id == TOOLING_RULE_ID {
                    errors.push(ValidationMessage::new(
                        app.display_path(node),
                        format!("logical id '{}' is reserved", id),
                    ));
                }
            }
        }
    }

    if !errors.is_empty() {
        warn!("Validation found {} error(s)", errors.len());
        return Err(CoreError::ValidationFailed(errors));
    }
    Ok((ids, notices))
}

/// Resources an edge endpoint stands for: the enclosing resource, or every
/// resource of a grouping subtree.
fn lift(app: &App, node: NodeId) -> Vec<NodeId> {
    match app.enclosing_resource(node) {
        Some(resource) => vec![resource],
        None => app.resources_under(node),
    }
}

/// Order resources and stacks from explicit dependencies and references.
fn plan(
    app: &App,
    tracker: &ReferenceTracker,
    records: &[ReferenceRecord],
) -> CoreResult<DeploymentPlan> {
    let mut resources: DependencyGraph<NodeId> = DependencyGraph::new();
    let mut stacks: DependencyGraph<NodeId> = DependencyGraph::new();
    let mut depends_on: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();

    for resource in app.resources_under(app.root()) {
        resources.add_node(resource);
    }
    for stack in app.stacks() {
        stacks.add_node(stack);
    }

    for node in app.descendants(app.root(), TraversalOrder::PreOrder) {
        for &dependency in app.node(node).dependencies() {
            // Holds even when the target stack has no resources to lift to.
            if let (Some(a), Some(b)) = (app.stack_of(node), app.stack_of(dependency)) {
                if a != b {
                    stacks.add_dependency(a, b);
                }
            }
            let targets = lift(app, dependency);
            for source in lift(app, node) {
                for &target in &targets {
                    if source == target {
                        continue;
                    }
                    match (app.stack_of(source), app.stack_of(target)) {
                        (Some(a), Some(b)) if a != b => stacks.add_dependency(a, b),
                        _ => {
                            resources.add_dependency(source, target);
                            depends_on.entry(source).or_default().insert(target);
                        }
                    }
                }
            }
        }
    }

    for record in records {
        let consumer = app.enclosing_resource(record.consumer);
        let producer = app.enclosing_resource(record.reference.producer);
        if let (Some(consumer), Some(producer)) = (consumer, producer) {
            if app.stack_of(consumer) == app.stack_of(producer) {
                resources.add_dependency(consumer, producer);
            }
        }
    }
    for &(consumer, producer) in tracker.stack_edges() {
        stacks.add_dependency(consumer, producer);
    }

    let resource_order = resources.topological_order().map_err(|Cycle(cycle)| {
        CoreError::DependencyCycle {
            cycle: cycle.iter().map(|n| app.path(*n)).collect(),
        }
    })?;

    let ids = tracker.ids();
    let stack_order = stacks.topological_order().map_err(|Cycle(cycle)| {
        CoreError::ExportCycle(
            cycle
                .iter()
                .map(|n| {
                    ids.stack_name(*n)
                        .map(str::to_string)
                        .unwrap_or_else(|| app.path(*n))
                })
                .collect(),
        )
    })?;

    let position: BTreeMap<NodeId, usize> = stack_order
        .iter()
        .enumerate()
        .map(|(i, s)| (*s, i))
        .collect();
    let stack_dependencies = stack_order
        .iter()
        .map(|&stack| {
            let mut deps = stacks.dependencies_of(&stack);
            deps.sort_by_key(|d| position.get(d).copied().unwrap_or(usize::MAX));
            (stack, deps)
        })
        .filter(|(_, deps)| !deps.is_empty())
        .collect();

    Ok(DeploymentPlan {
        resource_order,
        stack_order,
        stack_dependencies,
        depends_on,
    })
}
