use crate::constants::{
    CONFIG_MIRROR_ANNOTATION, CONFIG_SOURCE_ANNOTATION, CONFIG_SOURCE_API, DAEMON_SET_KIND,
};

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::fmt;

/// Uniquely identifies one Pod instance. Two Pods with the same namespace and name but different UIDs are
/// different instances: the original was deleted and something recreated it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PodIdentity {
    pub namespace: String,
    pub name: String,
    pub uid: Option<String>,
}

impl PodIdentity {
    pub fn of(pod: &Pod) -> Self {
        PodIdentity {
            namespace: pod.namespace().unwrap_or_else(|| "default".to_string()),
            name: pod.name_any(),
            uid: pod.uid(),
        }
    }

    /// Whether `other` is the same instance this identity was taken from.
    pub fn is_same_instance(&self, other: &Pod) -> bool {
        self.uid == other.uid()
    }
}

impl fmt::Display for PodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Static Pods are read by the kubelet from a file or URL rather than the API server.
pub(crate) fn is_static(pod: &Pod) -> bool {
    pod.annotations()
        .get(CONFIG_SOURCE_ANNOTATION)
        .map_or(false, |source| source != CONFIG_SOURCE_API)
}

/// Mirror Pods are the API server's read-only view of a static Pod.
pub(crate) fn is_mirror(pod: &Pod) -> bool {
    pod.annotations().contains_key(CONFIG_MIRROR_ANNOTATION)
}

/// The UID of the DaemonSet controlling this Pod, if it has one.
pub(crate) fn daemon_set_owner_uid(pod: &Pod) -> Option<&str> {
    pod.owner_references()
        .iter()
        .find(|reference| reference.controller == Some(true) && reference.kind == DAEMON_SET_KIND)
        .map(|reference| reference.uid.as_str())
}
