use nonzero_ext::nonzero;
use std::num::{NonZeroU32, NonZeroUsize};
use tokio::time::Duration;

// Annotation keys the kubelet stamps on pods it did not receive from the API server.
pub const CONFIG_SOURCE_ANNOTATION: &str = "kubernetes.io/config.source";
pub const CONFIG_MIRROR_ANNOTATION: &str = "kubernetes.io/config.mirror";
// Value of the config source annotation for pods created through the API server.
pub const CONFIG_SOURCE_API: &str = "api";

pub const DAEMON_SET_KIND: &str = "DaemonSet";

// Maximum number of Pods to evict concurrently. Waiting for Pods to be deleted is included in this limitation.
// We don't want to generate too many TPS to Kubernetes, so this is kept relatively low.
pub const DEFAULT_MAX_CONCURRENT_EVICTIONS: NonZeroUsize = nonzero!(5usize);

// Number of consecutive accepted eviction requests required before we start checking for deletion.
pub const DEFAULT_ACCEPTANCE_THRESHOLD: u32 = 3;

// A 429 (TOO_MANY_REQUESTS) response means a PodDisruptionBudget is not yet satisfied.
// `kubectl drain` waits 5 seconds between eviction attempts, so we start there and back off.
pub const DEFAULT_RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RATE_LIMIT_MAX_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_RATE_LIMIT_RETRIES: u32 = 30;

// Poll interval while waiting for an evicted Pod to be deleted.
pub const DEFAULT_CONFIRM_INTERVAL: Duration = Duration::from_secs(1);

// Client-side ceiling on Kubernetes API calls made during a drain.
pub const DEFAULT_API_REQUESTS_PER_SECOND: NonZeroU32 = nonzero!(10u32);
