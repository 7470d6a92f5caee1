//! # Secret Share Controller
//!
//! A Kubernetes controller that shares Secrets across namespaces.
//!
//! ## Overview
//!
//! A namespace that owns a Secret publishes it with a `SecretExport`, naming the
//! namespaces allowed to receive it explicitly, with `*`, or through label/annotation
//! selectors. A namespace that wants the Secret asks for it with a `SecretImport`.
//! When an import is authorized by its export, the controller keeps a copy of the
//! source Secret in the importing namespace and removes the copy as soon as the
//! authorization or the import goes away.
//!
//! ## Features
//!
//! - **Explicit consent on both sides**: nothing is copied without an export and an import
//! - **Selector-based authorization**: `In`, `NotIn`, `Exists`, `DoesNotExist` on namespace metadata
//! - **Safe ownership**: Secrets the controller did not create are never overwritten or deleted
//! - **Prometheus metrics**: Exposes metrics for monitoring and observability
//! - **Health probes**: HTTP endpoints for liveness and readiness checks

use anyhow::Result;
use secret_share_controller::runtime::{self, initialization::initialize};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    runtime::run(init).await
}
