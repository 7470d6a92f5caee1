//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group of the SecretExport/SecretImport custom resources
pub const API_GROUP: &str = "secret-sharing.octopilot.io";

/// Field manager / managed-by value written on every object this controller owns
pub const CONTROLLER_NAME: &str = "secret-share-controller";

/// Label marking a Secret as a copy managed by this controller
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Annotation recording the `<namespace>/<name>` of the Secret a copy mirrors
pub const ANNOTATION_IMPORTED_FROM: &str = "secret-sharing.octopilot.io/imported-from";

/// Annotation recording the resourceVersion of the source at the last write
pub const ANNOTATION_SOURCE_REVISION: &str = "secret-sharing.octopilot.io/source-revision";

/// Wildcard entry in `toNamespaces` authorizing every namespace
pub const ALL_NAMESPACES: &str = "*";

/// Secret type used when the source does not declare one
pub const DEFAULT_SECRET_TYPE: &str = "Opaque";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default number of reconcile workers
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: usize = 10;

/// Default upper bound on a single reconcile attempt (seconds)
pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 30;

/// Default exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Consecutive failures after which a key is dropped until the next event or resync
pub const DEFAULT_MAX_RECONCILE_RETRIES: u32 = 15;

/// Default interval of the periodic full resync (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 300;

/// Requeue interval while a bound import waits for its source Secret (seconds)
pub const DEFAULT_SOURCE_MISSING_REQUEUE_SECS: u64 = 30;

/// Default delay before restarting a watch stream after it fails or ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;
