//! Cordoning marks a Node as unschedulable so that no new Pods land on it while it is being drained.
use super::error::{self, Result};
use crate::client::ClusterClient;

use snafu::{OptionExt, ResultExt};
use tracing::{event, instrument, Level};

/// Marks the given node as unschedulable, preventing Pods from being deployed onto it.
///
/// A node that is already unschedulable is treated as already drained (or being drained by someone else), and is
/// left untouched.
#[instrument(skip(client), err)]
pub(crate) async fn cordon_node<C: ClusterClient + ?Sized>(
    client: &C,
    node_name: &str,
) -> Result<()> {
    let node = client
        .get_node(node_name)
        .await
        .context(error::GetNodeSnafu { node_name })?
        .context(error::NodeNotFoundSnafu { node_name })?;

    let unschedulable = node
        .spec
        .as_ref()
        .and_then(|spec| spec.unschedulable)
        .unwrap_or(false);
    if unschedulable {
        return error::AlreadyDrainedSnafu { node_name }.fail();
    }

    client
        .patch_node_schedulability(node_name, false)
        .await
        .context(error::CordonSnafu { node_name })?;

    event!(Level::INFO, "Cordoned Node '{}'.", node_name);
    Ok(())
}

/// Marks the given node as schedulable, allowing Pods to be deployed onto it.
#[instrument(skip(client), err)]
pub(crate) async fn uncordon_node<C: ClusterClient + ?Sized>(
    client: &C,
    node_name: &str,
) -> Result<()> {
    client
        .patch_node_schedulability(node_name, true)
        .await
        .context(error::UncordonSnafu { node_name })?;

    event!(Level::INFO, "Uncordoned Node '{}'.", node_name);
    Ok(())
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::client::{ClientError, MockClusterClient};
    use crate::drain::error::DrainError;

    use k8s_openapi::api::core::v1::{Node, NodeSpec};
    use kube::api::ObjectMeta;
    use kube::error::ErrorResponse;

    pub(crate) fn fake_node(name: &str, unschedulable: Option<bool>) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                unschedulable,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn schedulable_node_is_cordoned() {
        let mut client = MockClusterClient::new();
        client
            .expect_get_node()
            .withf(|node_name| node_name == "n1")
            .times(1)
            .returning(|_| Ok(Some(fake_node("n1", None))));
        client
            .expect_patch_node_schedulability()
            .withf(|node_name, schedulable| node_name == "n1" && !*schedulable)
            .times(1)
            .returning(|_, _| Ok(()));

        cordon_node(&client, "n1").await.unwrap();
    }

    #[tokio::test]
    async fn unschedulable_node_is_already_drained() {
        let mut client = MockClusterClient::new();
        client
            .expect_get_node()
            .returning(|_| Ok(Some(fake_node("n1", Some(true)))));
        client.expect_patch_node_schedulability().never();

        let result = cordon_node(&client, "n1").await;
        assert!(matches!(result, Err(DrainError::AlreadyDrained { .. })));
    }

    #[tokio::test]
    async fn missing_node_is_reported() {
        let mut client = MockClusterClient::new();
        client.expect_get_node().returning(|_| Ok(None));
        client.expect_patch_node_schedulability().never();

        let result = cordon_node(&client, "n1").await;
        assert!(matches!(result, Err(DrainError::NodeNotFound { .. })));
    }

    #[tokio::test]
    async fn uncordon_marks_node_schedulable() {
        let mut client = MockClusterClient::new();
        client
            .expect_patch_node_schedulability()
            .withf(|node_name, schedulable| node_name == "n1" && *schedulable)
            .times(1)
            .returning(|_, _| Ok(()));

        uncordon_node(&client, "n1").await.unwrap();
    }

    #[tokio::test]
    async fn failed_patch_is_a_cordon_error() {
        let mut client = MockClusterClient::new();
        client
            .expect_get_node()
            .returning(|_| Ok(Some(fake_node("n1", Some(false)))));
        client.expect_patch_node_schedulability().times(1).returning(|node_name, schedulable| {
            Err(ClientError::PatchNodeSchedulability {
                source: kube::Error::Api(ErrorResponse {
                    status: "Failure".to_string(),
                    message: "nodes \"n1\" is forbidden".to_string(),
                    reason: "Forbidden".to_string(),
                    code: 403,
                }),
                node_name: node_name.to_string(),
                schedulable,
            })
        });

        let result = cordon_node(&client, "n1").await;
        match result {
            Err(DrainError::Cordon { source, node_name }) => {
                assert_eq!(node_name, "n1");
                assert_eq!(source.status_code(), Some(403));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
