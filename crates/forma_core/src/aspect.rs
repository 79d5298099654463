//! Aspects: visitors applied to every node of a scope before synthesis.

use tracing::debug;

use crate::error::CoreResult;
use crate::tree::{App, NodeId, NodeKind};
use crate::value::Value;

/// A visitor invoked on every node of its scope during the building phase.
pub trait Aspect {
    fn visit(&self, app: &mut App, node: NodeId) -> CoreResult<()>;
}

/// Adds a `Tags` entry to every resource in scope.
///
/// Tags already present on a resource with the same key are left alone.
#[derive(Debug, Clone)]
pub struct Tag {
    key: String,
    value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Aspect for Tag {
    fn visit(&self, app: &mut App, node: NodeId) -> CoreResult<()> {
        let NodeKind::Resource(props) = app.kind_mut(node)? else {
            return Ok(());
        };

        let tags = props
            .properties
            .entry("Tags".to_string())
            .or_insert_with(|| Value::List(Vec::new()));
        let Value::List(entries) = tags else {
            // Tags supplied as a token or non-list value are left untouched.
            return Ok(());
        };

        let already_tagged = entries.iter().any(|entry| {
            entry
                .as_map()
                .and_then(|m| m.get("Key"))
                .and_then(Value::as_str)
                == Some(self.key.as_str())
        });
        if !already_tagged {
            debug!("Tagging resource {} with {}", node, self.key);
            entries.push(Value::map([
                ("Key", self.key.as_str()),
                ("Value", self.value.as_str()),
            ]));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::{CfnResource, Construct, Stack};

    #[test]
    fn test_tag_applies_to_resources_only() {
        let mut app = App::new();
        let stack = Stack::new(&mut app, "Tagged").unwrap();
        let bucket = CfnResource::new(&mut app, &stack, "Bucket", "AWS::S3::Bucket").unwrap();
        app.add_aspect(app.root(), Tag::new("team", "platform")).unwrap();

        app.apply_aspects().unwrap();

        let NodeKind::Resource(props) = app.kind(bucket.node_id()) else {
            panic!("expected resource");
        };
        assert_eq!(
            props.properties["Tags"],
            Value::List(vec![Value::map([("Key", "team"), ("Value", "platform")])])
        );
    }

    #[test]
    fn test_tag_keeps_existing_key_and_applies_once() {
        let mut app = App::new();
        let stack = Stack::new(&mut app, "Tagged").unwrap();
        let bucket = CfnResource::new(&mut app, &stack, "Bucket", "AWS::S3::Bucket").unwrap();
        bucket
            .set_property(
                &mut app,
                "Tags",
                Value::list([Value::map([("Key", "team"), ("Value", "data")])]),
            )
            .unwrap();
        app.add_aspect(app.root(), Tag::new("team", "platform")).unwrap();

        app.apply_aspects().unwrap();
        app.apply_aspects().unwrap();

        let NodeKind::Resource(props) = app.kind(bucket.node_id()) else {
            panic!("expected resource");
        };
        assert_eq!(
            props.properties["Tags"],
            Value::List(vec![Value::map([("Key", "team"), ("Value", "data")])])
        );
    }
}
