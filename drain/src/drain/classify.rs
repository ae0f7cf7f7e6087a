//! Decides which Pods on a node are evicted during a drain.
//!
//! Like `kubectl drain`, we do not evict:
//! * Static Pods - The kubelet runs these from local manifests; the API server cannot remove them.
//! * Mirror Pods - The API server's read-only reflection of a static Pod.
//! * DaemonSet Pods - The DaemonSet controller ignores node cordons and would immediately replace them.
//!
//! DaemonSet ownership is resolved by the controlling owner reference's UID against the DaemonSets that currently
//! exist. Pods whose DaemonSet has been deleted are orphans and are evicted like any other Pod.
use super::error::{self, Result};
use super::pod::{daemon_set_owner_uid, is_mirror, is_static, PodIdentity};
use crate::client::ClusterClient;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use snafu::ResultExt;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use tracing::{event, instrument, Level};

/// Why a Pod bound to the node is left in place.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SkipReason {
    Static,
    Mirror,
    DaemonSet,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => write!(f, "Pod is a static Pod"),
            Self::Mirror => write!(f, "Pod is a static Mirror Pod"),
            Self::DaemonSet => write!(f, "Pod is member of a DaemonSet"),
        }
    }
}

/// The split of a node's Pods into those to evict and those to leave alone.
#[derive(Clone, Debug, Default)]
pub struct Classification {
    pub evict: BTreeSet<PodIdentity>,
    pub skipped: BTreeMap<PodIdentity, SkipReason>,
}

/// Lists the Pods bound to `node_name` and the cluster's DaemonSets, then classifies the Pods.
///
/// Either listing failing aborts the drain; we never act on a partial view of the node.
#[instrument(skip(client), err)]
pub(crate) async fn find_target_pods<C: ClusterClient + ?Sized>(
    client: &C,
    node_name: &str,
) -> Result<Classification> {
    let pods = client
        .list_pods_on_node(node_name)
        .await
        .context(error::ClassificationFailedSnafu {
            node_name,
            listing: "pods",
        })?;

    let daemon_sets = client
        .list_daemon_sets()
        .await
        .context(error::ClassificationFailedSnafu {
            node_name,
            listing: "daemonsets",
        })?;

    let daemon_set_uids: HashSet<String> = daemon_sets.iter().filter_map(|ds| ds.uid()).collect();

    Ok(classify_pods(pods, &daemon_set_uids))
}

/// Given a list of all pods for a given node, this filters out pods which we do not want to attempt to drain.
pub(crate) fn classify_pods<I>(pods: I, daemon_set_uids: &HashSet<String>) -> Classification
where
    I: IntoIterator<Item = Pod>,
{
    let mut classification = Classification::default();

    for pod in pods {
        let identity = PodIdentity::of(&pod);
        match skip_reason(&pod, daemon_set_uids) {
            Some(reason) => {
                event!(
                    Level::INFO,
                    "Not draining Pod '{}': {}",
                    identity,
                    reason
                );
                classification.skipped.insert(identity, reason);
            }
            None => {
                classification.evict.insert(identity);
            }
        }
    }

    classification
}

fn skip_reason(pod: &Pod, daemon_set_uids: &HashSet<String>) -> Option<SkipReason> {
    if is_mirror(pod) {
        return Some(SkipReason::Mirror);
    }
    if is_static(pod) {
        return Some(SkipReason::Static);
    }
    match daemon_set_owner_uid(pod) {
        Some(owner_uid) if daemon_set_uids.contains(owner_uid) => Some(SkipReason::DaemonSet),
        Some(owner_uid) => {
            event!(
                Level::WARN,
                "Pod '{}' is owned by DaemonSet '{}' which no longer exists; evicting it.",
                pod.name_any(),
                owner_uid
            );
            None
        }
        None => None,
    }
}
