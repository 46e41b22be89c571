//! KafkaTopic reconciliation
//!
//! One pass converges the topic declared by a `KafkaTopic` and turns the
//! outcome, or the typed failure, into the resource status. Requeueing and
//! status persistence belong to the caller.

use crate::admin::PartitionMetadata;
use crate::crd::{Condition, KafkaTopic, KafkaTopicStatus, PartitionInfo};
use crate::error::{format_validation_errors, OperatorError, Result};
use crate::topics::{TopicConvergence, TopicConvergenceOutcome};
use chrono::Utc;
use kube::ResourceExt;
use tracing::{info, instrument, warn};
use validator::Validate;

/// Metrics for topic reconciliation
#[derive(Clone)]
pub struct TopicReconcilerMetrics {
    /// Counter for reconciliation attempts
    pub reconciliations: metrics::Counter,
    /// Counter for reconciliation errors
    pub errors: metrics::Counter,
    /// Histogram for reconciliation duration
    pub duration: metrics::Histogram,
}

impl TopicReconcilerMetrics {
    pub fn new() -> Self {
        Self {
            reconciliations: metrics::counter!("kafka_operator_topic_reconciliations_total"),
            errors: metrics::counter!("kafka_operator_topic_reconciliation_errors_total"),
            duration: metrics::histogram!("kafka_operator_topic_reconciliation_duration_seconds"),
        }
    }
}

impl Default for TopicReconcilerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one convergence pass and build the resulting status
pub async fn reconcile_topic(topics: &TopicConvergence, topic: &KafkaTopic) -> KafkaTopicStatus {
    reconcile_topic_with_metrics(topics, topic, None).await
}

#[instrument(skip(topics, topic, metrics), fields(name = %topic.name_any(), namespace = topic.namespace()))]
pub async fn reconcile_topic_with_metrics(
    topics: &TopicConvergence,
    topic: &KafkaTopic,
    metrics: Option<&TopicReconcilerMetrics>,
) -> KafkaTopicStatus {
    let start = std::time::Instant::now();
    if let Some(metrics) = metrics {
        metrics.reconciliations.increment(1);
    }

    let status = match apply_topic(topics, topic).await {
        Ok(outcome) => build_ready_status(topic, outcome),
        Err(OperatorError::ValidationError(msg)) => build_failed_status(topic, &msg),
        Err(e) => {
            warn!(
                topic = %topic.spec.name,
                reason = e.reason(),
                retryable = e.is_retryable(),
                error = %e,
                "Topic reconciliation failed"
            );
            build_error_status(topic, &e)
        }
    };

    if let Some(metrics) = metrics {
        metrics.duration.record(start.elapsed().as_secs_f64());
        if status.phase != "Ready" {
            metrics.errors.increment(1);
        }
    }

    status
}

/// Validate the resource and converge its topic
///
/// Validation failures are reported before any cluster call.
pub async fn apply_topic(
    topics: &TopicConvergence,
    topic: &KafkaTopic,
) -> Result<TopicConvergenceOutcome> {
    topic
        .spec
        .validate()
        .map_err(|e| OperatorError::ValidationError(format_validation_errors(&e)))?;

    info!(
        topic = %topic.spec.name,
        cluster = %topic.spec.cluster_ref.name,
        "Reconciling KafkaTopic"
    );

    topics.converge(&topic.spec.topic_spec()).await
}

/// Remove the topic from the cluster when the resource opts in
///
/// Returns whether a deletion was issued. A topic that is already gone
/// counts as cleaned up.
#[instrument(skip(topics, topic), fields(name = %topic.name_any()))]
pub async fn cleanup_topic(topics: &TopicConvergence, topic: &KafkaTopic) -> Result<bool> {
    if !topic.spec.delete_on_remove {
        info!(
            topic = %topic.spec.name,
            "deleteOnRemove is false, topic will remain in cluster"
        );
        return Ok(false);
    }

    match topics.delete_topic(&topic.spec.name).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_topic_not_found() => {
            info!(topic = %topic.spec.name, "Topic already absent");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

fn partition_info(partitions: &[PartitionMetadata]) -> Vec<PartitionInfo> {
    partitions
        .iter()
        .map(|p| PartitionInfo {
            partition: p.id,
            leader: p.leader,
            replicas: p.replicas.clone(),
            isr: p.isr.clone(),
        })
        .collect()
}

/// Build a ready status
fn build_ready_status(topic: &KafkaTopic, outcome: TopicConvergenceOutcome) -> KafkaTopicStatus {
    let now = Utc::now().to_rfc3339();

    let synced = if outcome.created {
        "Topic created successfully".to_string()
    } else if outcome.partitions_changed {
        format!("Partitions increased to {}", outcome.partitions)
    } else {
        "Topic configuration synchronized".to_string()
    };

    let conditions = vec![
        Condition::new("Ready", "True", "TopicReady", "Topic is ready", &now),
        Condition::new("Synced", "True", "SyncSucceeded", &synced, &now),
        Condition::new(
            "ConfigApplied",
            "True",
            "ConfigApplied",
            &format!("{} configuration overrides applied", topic.spec.config.len()),
            &now,
        ),
    ];

    KafkaTopicStatus {
        phase: "Ready".to_string(),
        message: "Topic is ready".to_string(),
        current_partitions: outcome.partitions,
        topic_exists: true,
        observed_generation: topic.metadata.generation.unwrap_or(0),
        conditions,
        last_sync_time: Some(now),
        partition_info: partition_info(&outcome.partition_info),
    }
}

/// Build a failed status (spec rejected, cluster untouched)
fn build_failed_status(topic: &KafkaTopic, error_msg: &str) -> KafkaTopicStatus {
    let now = Utc::now().to_rfc3339();
    let existing = topic.status.clone().unwrap_or_default();

    KafkaTopicStatus {
        phase: "Failed".to_string(),
        message: error_msg.to_string(),
        current_partitions: existing.current_partitions,
        topic_exists: existing.topic_exists,
        observed_generation: topic.metadata.generation.unwrap_or(0),
        conditions: vec![Condition::new("Ready", "False", "ValidationFailed", error_msg, &now)],
        last_sync_time: Some(now),
        partition_info: existing.partition_info,
    }
}

/// Build an error status (reconciliation failed)
fn build_error_status(topic: &KafkaTopic, error: &OperatorError) -> KafkaTopicStatus {
    let now = Utc::now().to_rfc3339();
    let message = error.to_string();

    // Preserve what was last observed; the pass did not get far enough to refresh it
    let existing = topic.status.clone().unwrap_or_default();
    let topic_exists = existing.topic_exists && !error.is_topic_not_found();

    KafkaTopicStatus {
        phase: "Error".to_string(),
        message: message.clone(),
        current_partitions: existing.current_partitions,
        topic_exists,
        observed_generation: topic.metadata.generation.unwrap_or(0),
        conditions: vec![
            Condition::new(
                "Ready",
                if topic_exists { "True" } else { "False" },
                error.reason(),
                &message,
                &now,
            ),
            Condition::new("Synced", "False", error.reason(), &message, &now),
        ],
        last_sync_time: Some(now),
        partition_info: existing.partition_info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::BrokerError;
    use crate::crd::{ClusterReference, KafkaTopicSpec};
    use crate::testing::MockClusterAdmin;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn create_test_topic() -> KafkaTopic {
        KafkaTopic {
            metadata: ObjectMeta {
                name: Some("orders".to_string()),
                namespace: Some("kafka".to_string()),
                generation: Some(2),
                ..Default::default()
            },
            spec: KafkaTopicSpec {
                cluster_ref: ClusterReference {
                    name: "mycluster".to_string(),
                    namespace: None,
                },
                name: "orders".to_string(),
                partitions: 3,
                replication_factor: 1,
                config: BTreeMap::from([("retention.ms".to_string(), "60000".to_string())]),
                delete_on_remove: false,
            },
            status: None,
        }
    }

    fn setup() -> (Arc<MockClusterAdmin>, TopicConvergence) {
        let admin = Arc::new(MockClusterAdmin::new());
        let topics = TopicConvergence::new(admin.clone());
        (admin, topics)
    }

    #[tokio::test]
    async fn test_reconcile_creates_topic() {
        let (admin, topics) = setup();
        let topic = create_test_topic();

        let status = reconcile_topic(&topics, &topic).await;

        assert_eq!(status.phase, "Ready");
        assert!(status.topic_exists);
        assert_eq!(status.current_partitions, 3);
        assert_eq!(status.partition_info.len(), 3);
        assert_eq!(status.observed_generation, 2);
        let types: Vec<_> = status.conditions.iter().map(|c| c.r#type.as_str()).collect();
        assert_eq!(types, vec!["Ready", "Synced", "ConfigApplied"]);
        assert_eq!(admin.partition_count("orders"), Some(3));
    }

    #[tokio::test]
    async fn test_reconcile_rejects_partition_decrease() {
        let (admin, topics) = setup();
        admin.add_topic("orders", 6, 1);

        let mut topic = create_test_topic();
        topic.status = Some(KafkaTopicStatus {
            current_partitions: 6,
            topic_exists: true,
            partition_info: vec![PartitionInfo {
                partition: 0,
                leader: 0,
                replicas: vec![0],
                isr: vec![0],
            }],
            ..Default::default()
        });

        let status = reconcile_topic(&topics, &topic).await;

        assert_eq!(status.phase, "Error");
        assert_eq!(status.conditions[0].reason, "UnsupportedPartitionDecrease");
        assert_eq!(status.current_partitions, 6);
        assert_eq!(status.partition_info.len(), 1);
        assert_eq!(admin.partition_count("orders"), Some(6));
    }

    #[tokio::test]
    async fn test_reconcile_validation_failure() {
        let (admin, topics) = setup();
        let mut topic = create_test_topic();
        topic.spec.partitions = 0;

        let status = reconcile_topic(&topics, &topic).await;

        assert_eq!(status.phase, "Failed");
        assert_eq!(status.conditions[0].reason, "ValidationFailed");
        assert!(status.message.contains("partitions"));
        assert!(admin.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_admin_unavailable() {
        let (admin, topics) = setup();
        admin.set_unavailable(true);

        let status = reconcile_topic(&topics, &create_test_topic()).await;

        assert_eq!(status.phase, "Error");
        assert_eq!(status.conditions[0].reason, "AdminUnavailable");
        assert_eq!(status.conditions[1].status, "False");
    }

    #[tokio::test]
    async fn test_reconcile_topic_vanished_during_pass() {
        let (admin, topics) = setup();
        admin.add_topic("orders", 3, 1);
        admin.fail_describe(
            "orders",
            BrokerError::new(3, "This server does not host this topic-partition."),
        );

        let mut topic = create_test_topic();
        topic.status = Some(KafkaTopicStatus {
            topic_exists: true,
            ..Default::default()
        });
        let status = reconcile_topic(&topics, &topic).await;

        assert_eq!(status.phase, "Error");
        assert_eq!(status.conditions[0].reason, "TopicNotFound");
        assert_eq!(status.conditions[0].status, "False");
        assert!(!status.topic_exists);
    }

    #[tokio::test]
    async fn test_reconcile_with_metrics() {
        let (_, topics) = setup();
        let metrics = TopicReconcilerMetrics::new();
        let status = reconcile_topic_with_metrics(&topics, &create_test_topic(), Some(&metrics)).await;
        assert_eq!(status.phase, "Ready");
    }

    #[tokio::test]
    async fn test_cleanup_keeps_topic_by_default() {
        let (admin, topics) = setup();
        admin.add_topic("orders", 3, 1);

        let deleted = cleanup_topic(&topics, &create_test_topic()).await.unwrap();
        assert!(!deleted);
        assert_eq!(admin.mutating_calls(), 0);
        assert_eq!(admin.partition_count("orders"), Some(3));
    }

    #[tokio::test]
    async fn test_cleanup_deletes_when_requested() {
        let (admin, topics) = setup();
        admin.add_topic("orders", 3, 1);
        let mut topic = create_test_topic();
        topic.spec.delete_on_remove = true;

        assert!(cleanup_topic(&topics, &topic).await.unwrap());
        assert_eq!(admin.partition_count("orders"), None);

        // Already gone
        assert!(!cleanup_topic(&topics, &topic).await.unwrap());
    }
}
