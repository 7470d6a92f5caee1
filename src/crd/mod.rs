//! # Custom Resource Definitions
//!
//! CRD types for the Secret Share Controller.
//!
//! ## Module Structure
//!
//! - `export.rs` - SecretExport: which namespaces may receive a Secret
//! - `import.rs` - SecretImport: a consumer namespace's request for a Secret
//! - `status.rs` - Status and conditions shared by both kinds

mod export;
mod import;
mod status;

// Re-export all public types
pub use export::{SecretExport, SecretExportSpec, SelectorClause};
pub use import::{SecretImport, SecretImportSpec};
pub use status::{Condition, ShareStatus};
