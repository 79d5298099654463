//! Graph command - Print the deployment order.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde_json::json;

use forma_core::{App, DeploymentPlan, NodeId, Synthesizer};

use super::{load_app, load_config};

#[derive(Args)]
pub struct GraphArgs {
    /// Blueprint files or directories
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Synthesis configuration file (YAML)
    #[arg(short, long, env = "FORMA_CONFIG")]
    config: Option<PathBuf>,

    /// Print the plan as JSON
    #[arg(long)]
    json: bool,
}

pub fn execute(args: GraphArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let mut app = load_app(&args.paths)?;
    let plan = Synthesizer::new(config).plan(&mut app)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan_to_json(&app, &plan))?);
        return Ok(());
    }

    println!("📦 Deployment order:");
    for (position, stack) in plan.stack_order.iter().enumerate() {
        let after = plan
            .stack_dependencies
            .get(stack)
            .filter(|deps| !deps.is_empty())
            .map(|deps| {
                let names: Vec<String> = deps.iter().map(|d| app.path(*d)).collect();
                format!(" (after {})", names.join(", "))
            })
            .unwrap_or_default();
        println!("   {}. {}{}", position + 1, app.path(*stack), after);

        for resource in stack_resources(&app, &plan, *stack) {
            println!("      - {}", app.path(resource));
        }
    }
    Ok(())
}

fn stack_resources(app: &App, plan: &DeploymentPlan, stack: NodeId) -> Vec<NodeId> {
    plan.resource_order
        .iter()
        .copied()
        .filter(|r| app.stack_of(*r) == Some(stack))
        .collect()
}

fn plan_to_json(app: &App, plan: &DeploymentPlan) -> serde_json::Value {
    let stacks: Vec<serde_json::Value> = plan
        .stack_order
        .iter()
        .map(|stack| {
            let depends_on: Vec<String> = plan
                .stack_dependencies
                .get(stack)
                .map(|deps| deps.iter().map(|d| app.path(*d)).collect())
                .unwrap_or_default();
            let resources: Vec<serde_json::Value> = stack_resources(app, plan, *stack)
                .into_iter()
                .map(|resource| {
                    let after: Vec<String> = plan
                        .depends_on
                        .get(&resource)
                        .map(|deps| deps.iter().map(|d| app.path(*d)).collect())
                        .unwrap_or_default();
                    json!({ "path": app.path(resource), "depends_on": after })
                })
                .collect();
            json!({
                "stack": app.path(*stack),
                "depends_on": depends_on,
                "resources": resources,
            })
        })
        .collect();
    json!({ "stacks": stacks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_plan_json_orders_stacks_and_resources() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.yaml");
        fs::write(
            &path,
            r#"
name: shop
stacks:
  - id: Compute
    resources:
      - id: Handler
        type: AWS::Lambda::Function
        depends_on: [Role]
        properties:
          Bucket: ${Ref:Storage/Bucket}
          Role: ${GetAtt:Role.Arn}
      - id: Role
        type: AWS::IAM::Role
  - id: Storage
    resources:
      - id: Bucket
        type: AWS::S3::Bucket
"#,
        )
        .unwrap();

        let mut app = load_app(&[path]).unwrap();
        let plan = Synthesizer::new(Default::default()).plan(&mut app).unwrap();
        let value = plan_to_json(&app, &plan);

        assert_eq!(value["stacks"][0]["stack"], "Storage");
        assert_eq!(value["stacks"][1]["stack"], "Compute");
        assert_eq!(value["stacks"][1]["depends_on"], json!(["Storage"]));

        let compute = value["stacks"][1]["resources"].as_array().unwrap();
        assert_eq!(compute[0]["path"], "Compute/Role");
        assert_eq!(compute[1]["path"], "Compute/Handler");
        assert_eq!(compute[1]["depends_on"], json!(["Compute/Role"]));
    }
}
