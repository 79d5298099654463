//! Lazy resolution engine.
//!
//! Turns a [`Value`] that may carry tokens at any depth into plain JSON.
//! Tokens are resolved recursively until only concrete values remain;
//! the number of nested token resolutions is bounded by the context's
//! `max_depth`.

use serde_json::{json, Map, Value as Json};

use crate::encoding::{self, Fragment};
use crate::error::{CoreError, CoreResult};
use crate::token::{Attribute, TokenId, TokenKind};
use crate::tree::{App, NodeId};
use crate::value::Value;

/// How references are turned into template expressions.
pub trait ReferenceResolver {
    fn resolve_reference(
        &self,
        ctx: &ResolveContext<'_>,
        target: NodeId,
        attribute: &Attribute,
    ) -> CoreResult<Json>;
}

/// Everything a token resolver may look at.
pub struct ResolveContext<'a> {
    app: &'a App,
    node: NodeId,
    stack: Option<NodeId>,
    references: &'a dyn ReferenceResolver,
    timestamp: &'a str,
    max_depth: usize,
}

impl<'a> ResolveContext<'a> {
    pub fn new(
        app: &'a App,
        node: NodeId,
        references: &'a dyn ReferenceResolver,
        timestamp: &'a str,
        max_depth: usize,
    ) -> Self {
        Self {
            app,
            node,
            stack: app.stack_of(node),
            references,
            timestamp,
            max_depth,
        }
    }

    pub fn app(&self) -> &'a App {
        self.app
    }

    /// The node whose values are being resolved.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The stack that owns the node, if any.
    pub fn stack(&self) -> Option<NodeId> {
        self.stack
    }

    pub fn node_path(&self) -> String {
        self.app.display_path(self.node)
    }

    /// RFC 3339 timestamp of the current synthesis run.
    pub fn timestamp(&self) -> &str {
        self.timestamp
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
}

/// Resolve a value to plain JSON.
pub fn resolve(value: &Value, ctx: &ResolveContext<'_>) -> CoreResult<Json> {
    Resolution::new(ctx).value(value)
}

/// Resolve a map of values to a JSON object.
pub fn resolve_map<'v, I>(entries: I, ctx: &ResolveContext<'_>) -> CoreResult<Map<String, Json>>
where
    I: IntoIterator<Item = (&'v String, &'v Value)>,
{
    let mut resolution = Resolution::new(ctx);
    let mut out = Map::new();
    for (key, value) in entries {
        resolution.check_key(key)?;
        out.insert(key.clone(), resolution.value(value)?);
    }
    Ok(out)
}

struct Resolution<'c, 'a> {
    ctx: &'c ResolveContext<'a>,
    chain: Vec<String>,
}

impl<'c, 'a> Resolution<'c, 'a> {
    fn new(ctx: &'c ResolveContext<'a>) -> Self {
        Self {
            ctx,
            chain: Vec::new(),
        }
    }

    fn value(&mut self, value: &Value) -> CoreResult<Json> {
        match value {
            Value::Null => Ok(Json::Null),
            Value::Bool(b) => Ok(Json::Bool(*b)),
            Value::Number(n) => Ok(Json::Number(n.clone())),
            Value::String(s) => self.string(s),
            Value::List(items) => self.list(items),
            Value::Map(map) => {
                let mut out = Map::new();
                for (key, item) in map {
                    self.check_key(key)?;
                    out.insert(key.clone(), self.value(item)?);
                }
                Ok(Json::Object(out))
            }
            Value::Token(token) => self.token(token.id(), token.hint()),
        }
    }

    fn check_key(&self, key: &str) -> CoreResult<()> {
        if encoding::contains_token(key) || encoding::contains_list_token(key) {
            return Err(CoreError::TokenInMapKey {
                key: key.to_string(),
                path: self.ctx.node_path(),
            });
        }
        Ok(())
    }

    fn string(&mut self, s: &str) -> CoreResult<Json> {
        if !encoding::contains_token(s) {
            return Ok(Json::String(s.to_string()));
        }

        let fragments = encoding::split(s);
        if let [Fragment::Token { id, hint }] = fragments.as_slice() {
            // A string that is exactly one token takes the token's value.
            return self.token(*id, hint);
        }

        let mut parts = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            match fragment {
                Fragment::Literal(text) => parts.push(Json::String(text.to_string())),
                Fragment::Token { id, hint } => parts.push(self.token(id, hint)?),
            }
        }
        self.splice(parts)
    }

    /// Concatenate resolved string fragments, falling back to `Fn::Join`
    /// when any fragment is not a scalar.
    fn splice(&self, parts: Vec<Json>) -> CoreResult<Json> {
        let mut merged: Vec<Json> = Vec::with_capacity(parts.len());
        for part in parts {
            let part = match part {
                Json::String(_) | Json::Object(_) => part,
                Json::Number(n) => Json::String(n.to_string()),
                Json::Bool(b) => Json::String(b.to_string()),
                Json::Array(items) => json!({ "Fn::Join": [",", items] }),
                Json::Null => {
                    return Err(CoreError::MalformedProperty {
                        path: self.ctx.node_path(),
                        message: "a token embedded in a string resolved to null".to_string(),
                    })
                }
            };
            push_merged(&mut merged, part, "");
        }

        match merged.as_slice() {
            [] => Ok(Json::String(String::new())),
            [Json::String(only)] => Ok(Json::String(only.clone())),
            _ => Ok(json!({ "Fn::Join": ["", merged] })),
        }
    }

    fn list(&mut self, items: &[Value]) -> CoreResult<Json> {
        if let [Value::String(single)] = items {
            if let Some((id, hint)) = encoding::parse_list_token(single) {
                return match self.token(id, hint)? {
                    Json::Array(resolved) => Ok(Json::Array(resolved)),
                    // Intrinsic producing a list at deploy time.
                    Json::Object(intrinsic) => Ok(Json::Object(intrinsic)),
                    scalar => Ok(Json::Array(vec![scalar])),
                };
            }
        }

        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if let Value::String(s) = item {
                if encoding::contains_list_token(s) {
                    return Err(CoreError::MalformedProperty {
                        path: self.ctx.node_path(),
                        message: "a list token must be the only element of its list".to_string(),
                    });
                }
            }
            out.push(self.value(item)?);
        }
        Ok(Json::Array(out))
    }

    fn token(&mut self, id: TokenId, hint: &str) -> CoreResult<Json> {
        let label = format!("{}.{}", hint, id);
        if self.chain.len() >= self.ctx.max_depth {
            self.chain.push(label);
            return Err(CoreError::RunawayResolution {
                path: self.ctx.node_path(),
                depth: self.ctx.max_depth,
                chain: summarize_chain(&self.chain),
            });
        }

        let ctx = self.ctx;
        let kind = ctx
            .app
            .tokens()
            .lookup(id, hint)
            .ok_or_else(|| CoreError::UnresolvableToken {
                token: label.clone(),
                path: ctx.node_path(),
            })?;

        self.chain.push(label.clone());
        let resolved = match kind {
            TokenKind::Reference { target, .. } if ctx.app.get(*target).is_none() => {
                Err(CoreError::UnresolvedReference {
                    reference: format!("token '{}' to a node outside this app", label),
                    path: ctx.node_path(),
                })
            }
            TokenKind::Reference { target, attribute } => {
                ctx.references.resolve_reference(ctx, *target, attribute)
            }
            TokenKind::Join { delimiter, parts } => self.join(delimiter, parts),
            TokenKind::Lazy(resolver) => match resolver(ctx) {
                Ok(produced) => self.value(&produced),
                Err(e) => Err(CoreError::ResolverFailed {
                    token: label,
                    path: ctx.node_path(),
                    message: format!("{:#}", e),
                }),
            },
            TokenKind::SynthesisTime => Ok(Json::String(ctx.timestamp.to_string())),
        };
        self.chain.pop();
        resolved
    }

    fn join(&mut self, delimiter: &str, parts: &[Value]) -> CoreResult<Json> {
        let mut elements: Vec<Json> = Vec::with_capacity(parts.len());
        for part in parts {
            match self.value(part)? {
                Json::Array(items) => elements.extend(items),
                Json::Object(obj) => match same_delimiter_join(&obj, delimiter) {
                    Some(inner) => elements.extend(inner.iter().cloned()),
                    None => elements.push(Json::Object(obj)),
                },
                Json::Number(n) => elements.push(Json::String(n.to_string())),
                Json::Bool(b) => elements.push(Json::String(b.to_string())),
                Json::String(s) => elements.push(Json::String(s)),
                Json::Null => {
                    return Err(CoreError::MalformedProperty {
                        path: self.ctx.node_path(),
                        message: "a join part resolved to null".to_string(),
                    })
                }
            }
        }

        if elements.iter().all(Json::is_string) {
            let joined = elements
                .iter()
                .filter_map(Json::as_str)
                .collect::<Vec<_>>()
                .join(delimiter);
            return Ok(Json::String(joined));
        }

        let mut merged: Vec<Json> = Vec::with_capacity(elements.len());
        for element in elements {
            push_merged(&mut merged, element, delimiter);
        }
        Ok(json!({ "Fn::Join": [delimiter, merged] }))
    }
}

/// Append `part`, merging it into a trailing string when both are strings.
fn push_merged(merged: &mut Vec<Json>, part: Json, delimiter: &str) {
    if let Json::String(next) = &part {
        if delimiter.is_empty() && next.is_empty() {
            return;
        }
        if let Some(Json::String(prev)) = merged.last_mut() {
            prev.push_str(delimiter);
            prev.push_str(next);
            return;
        }
    }
    merged.push(part);
}

/// Elements of `{"Fn::Join": [delimiter, [...]]}` when the delimiter matches.
fn same_delimiter_join<'j>(obj: &'j Map<String, Json>, delimiter: &str) -> Option<&'j Vec<Json>> {
    if obj.len() != 1 {
        return None;
    }
    let args = obj.get("Fn::Join")?.as_array()?;
    match args.as_slice() {
        [Json::String(d), Json::Array(items)] if d == delimiter => Some(items),
        _ => None,
    }
}

fn summarize_chain(chain: &[String]) -> String {
    const SHOWN: usize = 4;
    if chain.len() <= SHOWN * 2 {
        return chain.join(" -> ");
    }
    format!(
        "{} -> ... -> {}",
        chain[..SHOWN].join(" -> "),
        chain[chain.len() - SHOWN..].join(" -> ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::{CfnResource, Stack};
    use std::cell::Cell;
    use std::rc::Rc;

    /// Renders references as `Ref`/`Fn::GetAtt` on the target's local id.
    struct LocalReferences;

    impl ReferenceResolver for LocalReferences {
        fn resolve_reference(
            &self,
            ctx: &ResolveContext<'_>,
            target: NodeId,
            attribute: &Attribute,
        ) -> CoreResult<Json> {
            let id = ctx.app().node(target).id().to_string();
            Ok(match attribute {
                Attribute::Ref => json!({ "Ref": id }),
                Attribute::GetAtt { name, .. } => json!({ "Fn::GetAtt": [id, name] }),
            })
        }
    }

    struct Fixture {
        app: App,
        node: NodeId,
    }

    fn fixture() -> Fixture {
        let mut app = App::new();
        let stack = Stack::new(&mut app, "S").unwrap();
        let bucket = CfnResource::new(&mut app, &stack, "Bucket", "AWS::S3::Bucket").unwrap();
        Fixture {
            app,
            node: crate::construct::Construct::node_id(&bucket),
        }
    }

    fn run(app: &App, node: NodeId, value: &Value) -> CoreResult<Json> {
        let refs = LocalReferences;
        let ctx = ResolveContext::new(app, node, &refs, "2026-01-01T00:00:00Z", 16);
        resolve(value, &ctx)
    }

    #[test]
    fn test_token_free_values_unchanged() {
        let f = fixture();
        let value = Value::map([
            ("Name", Value::from("plain")),
            ("Count", Value::from(3i64)),
            ("Flags", Value::list([true, false])),
            ("Nothing", Value::Null),
        ]);
        let resolved = run(&f.app, f.node, &value).unwrap();
        assert_eq!(
            resolved,
            json!({"Name": "plain", "Count": 3, "Flags": [true, false], "Nothing": null})
        );
        // Resolving the plain output again is a no-op.
        assert_eq!(run(&f.app, f.node, &Value::from(resolved.clone())).unwrap(), resolved);
    }

    #[test]
    fn test_scalar_splice_produces_literal_string() {
        let mut f = fixture();
        let token = f.app.lazy("Name", |_| Ok(Value::from("X")));
        let value = Value::from(format!("prefix-{}-suffix", token));

        assert_eq!(run(&f.app, f.node, &value).unwrap(), json!("prefix-X-suffix"));
    }

    #[test]
    fn test_non_scalar_splice_produces_join() {
        let mut f = fixture();
        let arn = f.app.get_att(f.node, "Arn");
        let value = Value::from(format!("prefix-{}-suffix", arn));

        assert_eq!(
            run(&f.app, f.node, &value).unwrap(),
            json!({"Fn::Join": ["", ["prefix-", {"Fn::GetAtt": ["Bucket", "Arn"]}, "-suffix"]]})
        );
    }

    #[test]
    fn test_whole_string_token_keeps_its_type() {
        let mut f = fixture();
        let count = f.app.lazy("Count", |_| Ok(Value::from(7i64)));
        let reference = f.app.reference(f.node);

        assert_eq!(run(&f.app, f.node, &Value::from(count.as_string())).unwrap(), json!(7));
        assert_eq!(
            run(&f.app, f.node, &Value::from(reference)).unwrap(),
            json!({"Ref": "Bucket"})
        );
    }

    #[test]
    fn test_nested_lazy_tokens_resolve_to_fixed_point() {
        let mut f = fixture();
        let inner = f.app.lazy("Inner", |_| Ok(Value::from("deep")));
        let inner_str = inner.as_string();
        let outer = f.app.lazy("Outer", move |_| {
            Ok(Value::map([("Nested", Value::from(format!("very-{}", inner_str)))]))
        });

        assert_eq!(
            run(&f.app, f.node, &Value::from(outer)).unwrap(),
            json!({"Nested": "very-deep"})
        );
    }

    #[test]
    fn test_self_referencing_token_is_runaway() {
        let mut f = fixture();
        // The lazy token returns its own encoding, which never settles.
        let slot: Rc<Cell<Option<TokenId>>> = Rc::new(Cell::new(None));
        let captured = slot.clone();
        let token = f.app.lazy("Loop", move |_| {
            let id = captured.get().expect("id set before resolution");
            Ok(Value::from(format!("x{}", crate::encoding::encode_string(id, "Loop"))))
        });
        slot.set(Some(token.id()));

        let err = run(&f.app, f.node, &Value::from(token)).unwrap_err();
        assert!(matches!(err, CoreError::RunawayResolution { depth: 16, .. }), "{err}");
    }

    #[test]
    fn test_foreign_token_is_unresolvable() {
        let f = fixture();
        let mut other = App::new();
        let foreign = other.lazy("Elsewhere", |_| Ok(Value::from("x")));

        let err = run(&f.app, f.node, &Value::from(foreign)).unwrap_err();
        assert!(matches!(err, CoreError::UnresolvableToken { .. }));
    }

    #[test]
    fn test_resolver_failure_tagged_with_path() {
        let mut f = fixture();
        let failing = f.app.lazy("Broken", |_| Err(anyhow::anyhow!("backend unavailable")));

        let err = run(&f.app, f.node, &Value::from(failing)).unwrap_err();
        match err {
            CoreError::ResolverFailed { path, message, .. } => {
                assert_eq!(path, "S/Bucket");
                assert!(message.contains("backend unavailable"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_token_in_map_key_rejected() {
        let mut f = fixture();
        let token = f.app.synthesis_time();
        let mut map = std::collections::BTreeMap::new();
        map.insert(format!("key-{}", token), Value::from("v"));

        let err = run(&f.app, f.node, &Value::Map(map)).unwrap_err();
        assert!(matches!(err, CoreError::TokenInMapKey { .. }));
    }

    #[test]
    fn test_join_collapses_scalars_and_flattens_nested_joins() {
        let mut f = fixture();
        let literal = f.app.join("-", vec!["a", "b", "c"]);
        assert_eq!(run(&f.app, f.node, &Value::from(literal)).unwrap(), json!("a-b-c"));

        let arn = f.app.get_att(f.node, "Arn");
        let inner = f.app.join("-", vec![Value::from("x"), Value::from(arn)]);
        let outer = f.app.join("-", vec![Value::from("pre"), Value::from(inner)]);
        assert_eq!(
            run(&f.app, f.node, &Value::from(outer)).unwrap(),
            json!({"Fn::Join": ["-", ["pre-x", {"Fn::GetAtt": ["Bucket", "Arn"]}]]})
        );
    }

    #[test]
    fn test_list_token_replaces_whole_list() {
        let mut f = fixture();
        let zones = f.app.lazy("Zones", |_| Ok(Value::list(["a", "b"])));
        let subnets = f.app.get_att_list(f.node, "SubnetIds");

        let as_list = Value::list(zones.as_list());
        assert_eq!(run(&f.app, f.node, &as_list).unwrap(), json!(["a", "b"]));

        let intrinsic = Value::list(subnets.as_list());
        assert_eq!(
            run(&f.app, f.node, &intrinsic).unwrap(),
            json!({"Fn::GetAtt": ["Bucket", "SubnetIds"]})
        );

        let mixed = Value::list([Value::from("extra"), Value::from(zones.as_list()[0].clone())]);
        assert!(matches!(
            run(&f.app, f.node, &mixed),
            Err(CoreError::MalformedProperty { .. })
        ));
    }

    #[test]
    fn test_list_embedded_in_string_becomes_join() {
        let mut f = fixture();
        let zones = f.app.lazy("Zones", |_| Ok(Value::list(["a", "b"])));
        let value = Value::from(format!("zones={}", zones));

        assert_eq!(
            run(&f.app, f.node, &value).unwrap(),
            json!({"Fn::Join": ["", ["zones=", {"Fn::Join": [",", ["a", "b"]]}]]})
        );
    }

    #[test]
    fn test_synthesis_time_uses_run_timestamp() {
        let mut f = fixture();
        let now = f.app.synthesis_time();
        assert_eq!(
            run(&f.app, f.node, &Value::from(format!("at {}", now))).unwrap(),
            json!("at 2026-01-01T00:00:00Z")
        );
    }
}
