//! # forma_blueprint
//!
//! Declarative YAML blueprints for forma apps.
//!
//! A blueprint describes stacks, their parameters, resources, groups and
//! outputs. Strings may reference other constructs with `${Ref:<path>}` and
//! `${GetAtt:<path>.<Attribute>}`; these become tokens when the blueprint is
//! built into an [`forma_core::App`].
//!
//! ## Features
//!
//! - **Reading**: single files, or whole directories merged in file name order
//! - **Validation**: ids, resource types, references and dependencies checked
//!   before anything is built
//! - **Building**: a construct tree ready for [`forma_core::Synthesizer`]
//!
//! ## Example
//!
//! ```rust
//! use forma_blueprint::{BlueprintBuilder, BlueprintReader};
//! use forma_core::{SynthConfig, Synthesizer};
//!
//! let blueprint = BlueprintReader::read_str(r#"
//! name: shop
//! stacks:
//!   - id: Storage
//!     resources:
//!       - id: Bucket
//!         type: AWS::S3::Bucket
//!   - id: Compute
//!     resources:
//!       - id: Handler
//!         type: AWS::Lambda::Function
//!         properties:
//!           Bucket: ${Ref:Storage/Bucket}
//! "#).unwrap();
//!
//! let mut app = BlueprintBuilder::new(&blueprint).build().unwrap();
//! let assembly = Synthesizer::new(SynthConfig::default()).synthesize(&mut app).unwrap();
//! assert_eq!(assembly.manifest.deployment_order, vec!["Storage", "Compute"]);
//! ```

pub mod builder;
pub mod error;
pub mod expression;
pub mod models;
pub mod reader;
pub mod validator;

pub use builder::BlueprintBuilder;
pub use error::{BlueprintError, BlueprintResult};
pub use models::{Blueprint, GroupSpec, OutputSpec, ParameterSpec, ResourceSpec, StackSpec};
pub use reader::BlueprintReader;
pub use validator::{BlueprintValidator, ValidationResult};
