//! Convergence Integration Tests
//!
//! End-to-end passes over the in-memory cluster: topic partitions and
//! configuration, ACL grants and revocation, and user resources.
//!
//! Run with: cargo test -p kafka-operator --test convergence -- --nocapture

use anyhow::Result;
use kafka_operator::acl::{expand_read_intent, AccessIntent, AclGrantExpander};
use kafka_operator::admin::{AclOperation, AclResourceType, BrokerError};
use kafka_operator::error::OperatorError;
use kafka_operator::testing::{AdminCall, MockClusterAdmin};
use kafka_operator::topics::{TopicConvergence, TopicSpec};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn cluster() -> (Arc<MockClusterAdmin>, TopicConvergence, AclGrantExpander) {
    let admin = Arc::new(MockClusterAdmin::new());
    (
        admin.clone(),
        TopicConvergence::new(admin.clone()),
        AclGrantExpander::new(admin),
    )
}

// =============================================================================
// TOPIC TESTS
// =============================================================================

/// Equal partition counts are a no-op
#[tokio::test]
async fn test_partition_count_idempotent() -> Result<()> {
    init_tracing();
    let (admin, topics, _) = cluster();
    admin.add_topic("orders", 3, 1);

    for _ in 0..3 {
        assert!(!topics.ensure_partition_count("orders", 3).await?);
    }
    assert_eq!(admin.mutating_calls(), 0);
    Ok(())
}

/// Growing from 3 to 6 issues exactly one alteration
#[tokio::test]
async fn test_partition_increase_scenario() -> Result<()> {
    init_tracing();
    let (admin, topics, _) = cluster();
    admin.add_topic("orders", 3, 1);

    assert!(topics.ensure_partition_count("orders", 6).await?);

    let alterations = admin.calls_matching(|c| matches!(c, AdminCall::AlterPartitions { .. }));
    assert_eq!(
        alterations,
        vec![AdminCall::AlterPartitions {
            name: "orders".to_string(),
            count: 6
        }]
    );
    info!("Partition increase scenario passed");
    Ok(())
}

/// Decreases are rejected locally and never reach the cluster
#[tokio::test]
async fn test_partition_count_never_decreases() -> Result<()> {
    init_tracing();
    let (admin, topics, _) = cluster();
    admin.add_topic("orders", 6, 1);

    let err = topics.ensure_partition_count("orders", 2).await.unwrap_err();
    assert!(matches!(
        err,
        OperatorError::UnsupportedPartitionDecrease { .. }
    ));
    assert!(!err.is_retryable());
    assert_eq!(admin.mutating_calls(), 0);
    assert_eq!(admin.partition_count("orders"), Some(6));
    Ok(())
}

/// Repeating the same config produces no further state change
#[tokio::test]
async fn test_topic_config_idempotent() -> Result<()> {
    init_tracing();
    let (admin, topics, _) = cluster();
    admin.add_topic("orders", 3, 1);

    let desired = BTreeMap::from([
        ("cleanup.policy".to_string(), Some("compact".to_string())),
        ("retention.ms".to_string(), Some("60000".to_string())),
    ]);

    topics.ensure_topic_config("orders", &desired).await?;
    let after_first = admin.topic_config("orders");
    topics.ensure_topic_config("orders", &desired).await?;

    assert_eq!(admin.topic_config("orders"), after_first);
    assert_eq!(after_first, Some(desired));
    Ok(())
}

/// A full pass creates, then grows, then settles
#[tokio::test]
async fn test_converge_lifecycle() -> Result<()> {
    init_tracing();
    let (admin, topics, _) = cluster();

    let spec = TopicSpec::new("orders", 3, 1).with_config("retention.ms", "60000");
    let outcome = topics.converge(&spec).await?;
    assert!(outcome.created);

    let grown = TopicSpec {
        partitions: 6,
        ..spec.clone()
    };
    let outcome = topics.converge(&grown).await?;
    assert!(!outcome.created);
    assert!(outcome.partitions_changed);
    assert_eq!(outcome.partition_info.len(), 6);

    let outcome = topics.converge(&grown).await?;
    assert!(!outcome.partitions_changed);
    assert_eq!(admin.partition_count("orders"), Some(6));
    Ok(())
}

/// An unknown-topic code in the describe response is reported as TopicNotFound
#[tokio::test]
async fn test_missing_topic_reported_by_cluster() -> Result<()> {
    init_tracing();
    let (admin, topics, _) = cluster();

    let err = topics.ensure_partition_count("orders", 6).await.unwrap_err();
    assert!(err.is_topic_not_found());
    assert_eq!(err.reason(), "TopicNotFound");
    assert!(matches!(err, OperatorError::Broker { .. }));
    assert_eq!(admin.mutating_calls(), 0);
    Ok(())
}

// =============================================================================
// ACL TESTS
// =============================================================================

/// Read intents expand to Describe, Read and group Read
#[tokio::test]
async fn test_read_intent_scenario() -> Result<()> {
    init_tracing();
    let grants = expand_read_intent("User:cn=app", "orders");

    let summary: Vec<_> = grants
        .iter()
        .map(|g| (g.operation, g.resource_type, g.resource_name.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (AclOperation::Describe, AclResourceType::Topic, "orders"),
            (AclOperation::Read, AclResourceType::Topic, "orders"),
            (AclOperation::Read, AclResourceType::Group, "*"),
        ]
    );
    Ok(())
}

/// A failing match makes revocation fail; the follow-up call converges
#[tokio::test]
async fn test_partial_revocation_then_retry() -> Result<()> {
    init_tracing();
    let (admin, _, expander) = cluster();

    expander
        .apply_intent(&AccessIntent::new("User:cn=app", "orders", "write"))
        .await?;
    admin.fail_next_acl_deletion("orders", BrokerError::new(7, "Request timed out"));

    let err = expander
        .revoke_all_for_principal("User:cn=app")
        .await
        .unwrap_err();
    assert!(matches!(err, OperatorError::PartialRevocationFailure { .. }));
    assert!(err.is_retryable());

    let remaining = expander.revoke_all_for_principal("User:cn=app").await?;
    info!(remaining, "Second revocation pass finished");
    assert_eq!(expander.revoke_all_for_principal("User:cn=app").await?, 0);
    assert!(admin.acls().is_empty());
    Ok(())
}

/// Transport failures surface as AdminUnavailable and are retryable
#[tokio::test]
async fn test_admin_unavailable() -> Result<()> {
    init_tracing();
    let (admin, topics, expander) = cluster();
    admin.set_unavailable(true);

    let err = topics.get_topic("orders").await.unwrap_err();
    assert!(matches!(err, OperatorError::AdminUnavailable(_)));
    assert!(err.requeue_delay().is_some());

    let err = expander
        .apply_intent(&AccessIntent::new("User:cn=app", "orders", "read"))
        .await
        .unwrap_err();
    assert!(matches!(err, OperatorError::AdminUnavailable(_)));
    Ok(())
}
