//! Topic convergence
//!
//! Computes and applies the delta between a desired [`TopicSpec`] and the
//! live topic: existence, partition count and configuration overrides. The
//! cluster is the only source of truth; nothing is cached between calls.

use crate::admin::{ClusterAdmin, PartitionMetadata, TopicDetail, TopicMetadata};
use crate::error::{OperatorError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Desired state of one topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    /// Cluster-unique topic name
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i16,
    /// Complete override set; applying it replaces the live overrides
    pub config: BTreeMap<String, Option<String>>,
}

impl TopicSpec {
    pub fn new(name: impl Into<String>, partitions: i32, replication_factor: i16) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor,
            config: BTreeMap::new(),
        }
    }

    /// Add a single configuration override
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), Some(value.into()));
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(OperatorError::ValidationError(
                "topic name must not be empty".to_string(),
            ));
        }
        if self.partitions < 1 {
            return Err(OperatorError::ValidationError(format!(
                "topic {} must have at least 1 partition, got {}",
                self.name, self.partitions
            )));
        }
        if self.replication_factor < 1 {
            return Err(OperatorError::ValidationError(format!(
                "topic {} must have a replication factor of at least 1, got {}",
                self.name, self.replication_factor
            )));
        }
        Ok(())
    }

    fn detail(&self) -> TopicDetail {
        TopicDetail {
            num_partitions: self.partitions,
            replication_factor: self.replication_factor,
            config_entries: self.config.clone(),
        }
    }
}

/// What a full convergence pass did and observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicConvergenceOutcome {
    /// The topic did not exist and was created
    pub created: bool,
    /// A partition increase was requested
    pub partitions_changed: bool,
    /// Live partition count after the pass
    pub partitions: i32,
    /// Live partition layout after the pass
    pub partition_info: Vec<PartitionMetadata>,
}

/// Idempotent topic operations over a [`ClusterAdmin`]
#[derive(Clone)]
pub struct TopicConvergence {
    admin: Arc<dyn ClusterAdmin>,
}

impl TopicConvergence {
    pub fn new(admin: Arc<dyn ClusterAdmin>) -> Self {
        Self { admin }
    }

    /// List all topics; used primarily for existence checks
    pub async fn list_topics(&self) -> Result<BTreeMap<String, TopicDetail>> {
        self.admin.list_topics().await
    }

    /// Look up a topic in the listing. A missing entry always means absent.
    pub async fn get_topic(&self, name: &str) -> Result<Option<TopicDetail>> {
        let mut topics = self.list_topics().await?;
        Ok(topics.remove(name))
    }

    /// Fetch the live partition layout of a topic
    ///
    /// A topic-level error reported by the cluster is returned verbatim as
    /// [`OperatorError::Broker`]; an unknown-topic code classifies as
    /// topic-not-found.
    pub async fn describe_topic(&self, name: &str) -> Result<TopicMetadata> {
        let response = self.admin.describe_topics(&[name.to_string()]).await?;

        let meta = response
            .into_iter()
            .find(|m| m.name == name)
            .ok_or_else(|| OperatorError::TopicNotFound(name.to_string()))?;

        if let Some(error) = meta.error {
            return Err(OperatorError::Broker {
                context: format!("describe topic {}", name),
                error,
            });
        }

        Ok(meta)
    }

    /// Create a topic. Not idempotent: fails with `TopicAlreadyExists` if present.
    pub async fn create_topic(&self, spec: &TopicSpec) -> Result<()> {
        spec.validate()?;

        info!(
            topic = %spec.name,
            partitions = spec.partitions,
            replication = spec.replication_factor,
            "Creating topic"
        );

        self.admin.create_topic(&spec.name, &spec.detail()).await
    }

    pub async fn delete_topic(&self, name: &str) -> Result<()> {
        info!(topic = %name, "Deleting topic");
        self.admin.delete_topic(name).await
    }

    /// Grow the partition count to `desired`
    ///
    /// Returns `false` without any mutating call when the count already
    /// matches. A decrease is rejected locally with
    /// [`OperatorError::UnsupportedPartitionDecrease`].
    pub async fn ensure_partition_count(&self, name: &str, desired: i32) -> Result<bool> {
        if desired < 1 {
            return Err(OperatorError::ValidationError(format!(
                "topic {} must have at least 1 partition, got {}",
                name, desired
            )));
        }

        let current = self.describe_topic(name).await?.partition_count();

        if desired == current {
            debug!(topic = %name, partitions = current, "Partition count already converged");
            return Ok(false);
        }

        if desired < current {
            return Err(OperatorError::UnsupportedPartitionDecrease {
                topic: name.to_string(),
                current,
                desired,
            });
        }

        info!(topic = %name, from = current, to = desired, "Increasing partition count");

        // No explicit assignment: the cluster chooses replica placement
        self.admin.alter_partitions(name, desired, &[]).await?;
        Ok(true)
    }

    /// Overwrite the topic's configuration overrides with `desired`
    ///
    /// Always issues the alteration, even when the live config matches.
    pub async fn ensure_topic_config(
        &self,
        name: &str,
        desired: &BTreeMap<String, Option<String>>,
    ) -> Result<()> {
        debug!(topic = %name, entries = desired.len(), "Applying topic configuration");
        self.admin.alter_topic_config(name, desired).await
    }

    /// Full convergence pass for one topic
    ///
    /// Creates the topic when absent, otherwise grows partitions and applies
    /// the override set, then reports the live layout.
    pub async fn converge(&self, spec: &TopicSpec) -> Result<TopicConvergenceOutcome> {
        spec.validate()?;

        let (created, partitions_changed) = match self.get_topic(&spec.name).await? {
            None => {
                self.create_topic(spec).await?;
                (true, false)
            }
            Some(existing) => {
                if existing.replication_factor != spec.replication_factor {
                    warn!(
                        topic = %spec.name,
                        current = existing.replication_factor,
                        desired = spec.replication_factor,
                        "Replication factor differs from spec; changing it is not supported"
                    );
                }
                let changed = self
                    .ensure_partition_count(&spec.name, spec.partitions)
                    .await?;
                self.ensure_topic_config(&spec.name, &spec.config).await?;
                (false, changed)
            }
        };

        let meta = self.describe_topic(&spec.name).await?;

        Ok(TopicConvergenceOutcome {
            created,
            partitions_changed,
            partitions: meta.partition_count(),
            partition_info: meta.partitions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::BrokerError;
    use crate::testing::{AdminCall, MockClusterAdmin};

    fn setup() -> (Arc<MockClusterAdmin>, TopicConvergence) {
        let admin = Arc::new(MockClusterAdmin::new());
        let topics = TopicConvergence::new(admin.clone());
        (admin, topics)
    }

    #[tokio::test]
    async fn test_get_topic_absent() {
        let (_, topics) = setup();
        assert!(topics.get_topic("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_topic_present() {
        let (admin, topics) = setup();
        admin.add_topic("orders", 3, 2);

        let detail = topics.get_topic("orders").await.unwrap().unwrap();
        assert_eq!(detail.num_partitions, 3);
        assert_eq!(detail.replication_factor, 2);
    }

    #[tokio::test]
    async fn test_list_topics_unavailable() {
        let (admin, topics) = setup();
        admin.set_unavailable(true);

        let err = topics.list_topics().await.unwrap_err();
        assert!(matches!(err, OperatorError::AdminUnavailable(_)));
    }

    #[tokio::test]
    async fn test_describe_topic_not_found() {
        let (_, topics) = setup();
        let err = topics.describe_topic("missing").await.unwrap_err();
        assert!(err.is_topic_not_found());
        assert_eq!(err.reason(), "TopicNotFound");
        match err {
            OperatorError::Broker { error, .. } => {
                assert_eq!(error.code, crate::admin::UNKNOWN_TOPIC_OR_PARTITION);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_ensure_partition_count_unknown_topic_code() {
        let (admin, topics) = setup();
        admin.add_topic("orders", 3, 1);
        admin.fail_describe(
            "orders",
            BrokerError::new(3, "This server does not host this topic-partition."),
        );

        let err = topics.ensure_partition_count("orders", 6).await.unwrap_err();
        assert_eq!(err.reason(), "TopicNotFound");
        assert_eq!(admin.mutating_calls(), 0);
    }

    #[tokio::test]
    async fn test_describe_topic_surfaces_broker_error() {
        let (admin, topics) = setup();
        admin.add_topic("orders", 3, 1);
        admin.fail_describe("orders", BrokerError::new(29, "Topic authorization failed."));

        match topics.describe_topic("orders").await.unwrap_err() {
            OperatorError::Broker { error, .. } => {
                assert_eq!(error.code, 29);
                assert_eq!(error.message, "Topic authorization failed.");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_create_topic_twice() {
        let (_, topics) = setup();
        let spec = TopicSpec::new("orders", 3, 1);

        topics.create_topic(&spec).await.unwrap();
        let err = topics.create_topic(&spec).await.unwrap_err();
        assert!(matches!(err, OperatorError::TopicAlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_create_topic_rejects_zero_partitions() {
        let (admin, topics) = setup();
        let err = topics
            .create_topic(&TopicSpec::new("orders", 0, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, OperatorError::ValidationError(_)));
        assert_eq!(admin.mutating_calls(), 0);
    }

    #[tokio::test]
    async fn test_delete_missing_topic() {
        let (_, topics) = setup();
        let err = topics.delete_topic("missing").await.unwrap_err();
        assert!(matches!(err, OperatorError::TopicNotFound(_)));
    }

    #[tokio::test]
    async fn test_ensure_partition_count_unchanged() {
        let (admin, topics) = setup();
        admin.add_topic("orders", 3, 1);

        let changed = topics.ensure_partition_count("orders", 3).await.unwrap();
        assert!(!changed);
        assert_eq!(admin.mutating_calls(), 0);
    }

    #[tokio::test]
    async fn test_ensure_partition_count_increase() {
        let (admin, topics) = setup();
        admin.add_topic("orders", 3, 1);

        let changed = topics.ensure_partition_count("orders", 6).await.unwrap();
        assert!(changed);
        assert_eq!(
            admin.calls_matching(|c| matches!(c, AdminCall::AlterPartitions { .. })),
            vec![AdminCall::AlterPartitions {
                name: "orders".to_string(),
                count: 6,
            }]
        );
        assert_eq!(admin.partition_count("orders"), Some(6));
    }

    #[tokio::test]
    async fn test_ensure_partition_count_rejects_decrease() {
        let (admin, topics) = setup();
        admin.add_topic("orders", 6, 1);

        let err = topics.ensure_partition_count("orders", 3).await.unwrap_err();
        assert!(matches!(
            err,
            OperatorError::UnsupportedPartitionDecrease {
                current: 6,
                desired: 3,
                ..
            }
        ));
        assert_eq!(admin.mutating_calls(), 0);
        assert_eq!(admin.partition_count("orders"), Some(6));
    }

    #[tokio::test]
    async fn test_ensure_partition_count_missing_topic() {
        let (_, topics) = setup();
        let err = topics
            .ensure_partition_count("missing", 3)
            .await
            .unwrap_err();
        assert!(err.is_topic_not_found());
    }

    #[tokio::test]
    async fn test_ensure_topic_config_always_overwrites() {
        let (admin, topics) = setup();
        admin.add_topic("orders", 3, 1);

        let mut desired = BTreeMap::new();
        desired.insert("retention.ms".to_string(), Some("60000".to_string()));

        topics.ensure_topic_config("orders", &desired).await.unwrap();
        topics.ensure_topic_config("orders", &desired).await.unwrap();

        assert_eq!(
            admin.calls_matching(|c| matches!(c, AdminCall::AlterTopicConfig { .. }))
                .len(),
            2
        );
        assert_eq!(admin.topic_config("orders"), Some(desired));
    }

    #[tokio::test]
    async fn test_ensure_topic_config_replaces_overrides() {
        let (admin, topics) = setup();
        admin.add_topic("orders", 3, 1);

        let mut first = BTreeMap::new();
        first.insert("retention.ms".to_string(), Some("60000".to_string()));
        first.insert("cleanup.policy".to_string(), Some("compact".to_string()));
        topics.ensure_topic_config("orders", &first).await.unwrap();

        let mut second = BTreeMap::new();
        second.insert("retention.ms".to_string(), Some("120000".to_string()));
        topics.ensure_topic_config("orders", &second).await.unwrap();

        assert_eq!(admin.topic_config("orders"), Some(second));
    }

    #[tokio::test]
    async fn test_converge_creates_absent_topic() {
        let (admin, topics) = setup();
        let spec = TopicSpec::new("orders", 3, 2).with_config("retention.ms", "60000");

        let outcome = topics.converge(&spec).await.unwrap();
        assert!(outcome.created);
        assert!(!outcome.partitions_changed);
        assert_eq!(outcome.partitions, 3);
        assert_eq!(outcome.partition_info.len(), 3);
        assert_eq!(admin.topic_config("orders"), Some(spec.config.clone()));
    }

    #[tokio::test]
    async fn test_converge_existing_topic() {
        let (admin, topics) = setup();
        admin.add_topic("orders", 3, 1);

        let spec = TopicSpec::new("orders", 6, 1);
        let outcome = topics.converge(&spec).await.unwrap();
        assert!(!outcome.created);
        assert!(outcome.partitions_changed);
        assert_eq!(outcome.partitions, 6);

        // Second pass is a no-op for partitions
        let outcome = topics.converge(&spec).await.unwrap();
        assert!(!outcome.partitions_changed);
    }
}
