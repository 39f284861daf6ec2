//! Workflow Template Engine - versioned CI/CD artifact generation
//!
//! # Guarantees
//! 1. Rendering is deterministic
//! 2. An execution yields every artifact or none
//! 3. Import and instance upsert commit together or not at all
//! 4. One instance per generated workflow
//! 5. Stale means `instance.template_version < template.version`

pub mod archive;
pub mod audit;
pub mod binder;
pub mod config;
pub mod documents;
pub mod error;
pub mod execute;
pub mod hashing;
pub mod reconcile;
pub mod render;
pub mod store;
pub mod templates;
pub mod validation;

pub use archive::{package, ArchiveEntry};
pub use audit::{aggregate_audits, aggregate_instance_audits, AuditEntry, AuditLog, AuditSpan, InstanceAuditEntry};
pub use config::EngineConfig;
pub use error::{ArtifactRef, EngineError, ErrorClass};
pub use execute::{ExecutionResult, TemplateExecutor};
pub use hashing::{canonical_json, execution_fingerprint, result_digest};
pub use reconcile::{generate, import_result, is_stale, regenerate, ImportReport, InstanceChange, TemplateInstance};
pub use render::{Delimiters, RenderError, Renderer};
pub use store::{MemoryStore, Store, StoreError, StoreTransaction};
pub use templates::{ExecutionRequest, ParameterSpec, ParameterType, Template, TemplateId, TemplateRegistry};
pub use validation::{check_params, ValidationResult, Validator};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
