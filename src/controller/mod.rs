//! # Controller
//!
//! Core controller modules for the Secret Share Controller.
//!
//! - `backoff`: Exponential backoff with jitter for retries
//! - `binder`: Resolves an import to the export and source Secret it may copy
//! - `matcher`: Authorization of namespaces against an export's policy
//! - `namespaces`: In-memory index of namespace metadata
//! - `reconciler`: Core reconciliation logic
//! - `selector`: Label/annotation selector compilation and evaluation
//! - `server`: HTTP server for metrics and health checks
//! - `syncer`: Converges the Secret copy in the importing namespace

pub mod backoff;
pub mod binder;
pub mod matcher;
pub mod namespaces;
pub mod reconciler;
pub mod selector;
pub mod server;
pub mod syncer;
