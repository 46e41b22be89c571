//! Testing utilities
//!
//! [`MockClusterAdmin`] is an in-memory [`ClusterAdmin`] that behaves like a
//! small broker cluster, records every call it receives and lets tests inject
//! transport failures and per-item broker errors.
//!
//! # Example
//!
//! ```rust,ignore
//! use kafka_operator::testing::MockClusterAdmin;
//! use kafka_operator::topics::TopicConvergence;
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn grows_partitions() {
//!     let admin = Arc::new(MockClusterAdmin::new());
//!     admin.add_topic("orders", 3, 1);
//!
//!     let topics = TopicConvergence::new(admin.clone());
//!     assert!(topics.ensure_partition_count("orders", 6).await.unwrap());
//!     assert_eq!(admin.partition_count("orders"), Some(6));
//! }
//! ```

use crate::admin::{
    AclBinding, AclEntry, AclFilter, AclMatch, AclOperation, AclResource, BrokerError,
    ClusterAdmin, PartitionMetadata, TopicDetail, TopicMetadata, UNKNOWN_TOPIC_OR_PARTITION,
};
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// A call received by [`MockClusterAdmin`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCall {
    ListTopics,
    DescribeTopics { names: Vec<String> },
    CreateTopic { name: String, partitions: i32 },
    DeleteTopic { name: String },
    AlterPartitions { name: String, count: i32 },
    AlterTopicConfig { name: String },
    CreateAcl { binding: AclBinding },
    ListAcls,
    DeleteAcls { filter: AclFilter },
}

impl AdminCall {
    /// Whether the call changes cluster state
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            AdminCall::ListTopics | AdminCall::DescribeTopics { .. } | AdminCall::ListAcls
        )
    }
}

#[derive(Debug, Default)]
struct MockState {
    topics: BTreeMap<String, TopicDetail>,
    acls: Vec<AclBinding>,
    calls: Vec<AdminCall>,
    unavailable: bool,
    describe_errors: BTreeMap<String, BrokerError>,
    failing_acl_operations: Vec<AclOperation>,
    acl_deletion_failures: Vec<(String, BrokerError)>,
}

/// In-memory cluster for tests
#[derive(Debug, Default)]
pub struct MockClusterAdmin {
    state: Mutex<MockState>,
}

impl MockClusterAdmin {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a topic without recording a call
    pub fn add_topic(&self, name: &str, partitions: i32, replication_factor: i16) {
        self.state.lock().topics.insert(
            name.to_string(),
            TopicDetail {
                num_partitions: partitions,
                replication_factor,
                config_entries: BTreeMap::new(),
            },
        );
    }

    /// Make every call fail with `AdminUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Report `error` for the topic in describe responses
    pub fn fail_describe(&self, topic: &str, error: BrokerError) {
        self.state
            .lock()
            .describe_errors
            .insert(topic.to_string(), error);
    }

    /// Fail ACL creation for grants of this operation
    pub fn fail_create_acl(&self, operation: AclOperation) {
        self.state.lock().failing_acl_operations.push(operation);
    }

    /// On the next deletion, matches on `resource_name` report `error` and stay
    pub fn fail_next_acl_deletion(&self, resource_name: &str, error: BrokerError) {
        self.state
            .lock()
            .acl_deletion_failures
            .push((resource_name.to_string(), error));
    }

    /// All calls received so far
    pub fn calls(&self) -> Vec<AdminCall> {
        self.state.lock().calls.clone()
    }

    pub fn calls_matching(&self, predicate: impl Fn(&AdminCall) -> bool) -> Vec<AdminCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| predicate(c))
            .cloned()
            .collect()
    }

    /// Number of state-changing calls received so far
    pub fn mutating_calls(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.is_mutating())
            .count()
    }

    pub fn partition_count(&self, topic: &str) -> Option<i32> {
        self.state.lock().topics.get(topic).map(|t| t.num_partitions)
    }

    pub fn topic_config(&self, topic: &str) -> Option<BTreeMap<String, Option<String>>> {
        self.state
            .lock()
            .topics
            .get(topic)
            .map(|t| t.config_entries.clone())
    }

    /// All ACL bindings currently stored
    pub fn acls(&self) -> Vec<AclBinding> {
        self.state.lock().acls.clone()
    }

    /// Record the call, then fail if the cluster is unreachable
    fn record(&self, call: AdminCall) -> Result<parking_lot::MutexGuard<'_, MockState>> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if state.unavailable {
            return Err(OperatorError::AdminUnavailable(
                "connection refused".to_string(),
            ));
        }
        Ok(state)
    }
}

fn layout(detail: &TopicDetail) -> Vec<PartitionMetadata> {
    let replicas: Vec<i32> = (0..detail.replication_factor as i32).collect();
    (0..detail.num_partitions)
        .map(|id| PartitionMetadata {
            id,
            leader: id % replicas.len().max(1) as i32,
            replicas: replicas.clone(),
            isr: replicas.clone(),
            error: None,
        })
        .collect()
}

#[async_trait]
impl ClusterAdmin for MockClusterAdmin {
    async fn list_topics(&self) -> Result<BTreeMap<String, TopicDetail>> {
        let state = self.record(AdminCall::ListTopics)?;
        Ok(state.topics.clone())
    }

    async fn describe_topics(&self, names: &[String]) -> Result<Vec<TopicMetadata>> {
        let state = self.record(AdminCall::DescribeTopics {
            names: names.to_vec(),
        })?;

        Ok(names
            .iter()
            .map(|name| {
                let error = state.describe_errors.get(name).cloned();
                match (error, state.topics.get(name)) {
                    (None, Some(detail)) => TopicMetadata {
                        name: name.clone(),
                        partitions: layout(detail),
                        error: None,
                    },
                    (error, _) => TopicMetadata {
                        name: name.clone(),
                        partitions: vec![],
                        error: Some(error.unwrap_or_else(|| {
                            BrokerError::new(
                                UNKNOWN_TOPIC_OR_PARTITION,
                                "This server does not host this topic-partition.",
                            )
                        })),
                    },
                }
            })
            .collect())
    }

    async fn create_topic(&self, name: &str, detail: &TopicDetail) -> Result<()> {
        let mut state = self.record(AdminCall::CreateTopic {
            name: name.to_string(),
            partitions: detail.num_partitions,
        })?;
        if state.topics.contains_key(name) {
            return Err(OperatorError::TopicAlreadyExists(name.to_string()));
        }
        state.topics.insert(name.to_string(), detail.clone());
        Ok(())
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        let mut state = self.record(AdminCall::DeleteTopic {
            name: name.to_string(),
        })?;
        state
            .topics
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| OperatorError::TopicNotFound(name.to_string()))
    }

    async fn alter_partitions(
        &self,
        name: &str,
        count: i32,
        _assignment: &[Vec<i32>],
    ) -> Result<()> {
        let mut state = self.record(AdminCall::AlterPartitions {
            name: name.to_string(),
            count,
        })?;
        let topic = state
            .topics
            .get_mut(name)
            .ok_or_else(|| OperatorError::TopicNotFound(name.to_string()))?;
        if count <= topic.num_partitions {
            return Err(OperatorError::Broker {
                context: format!("alter partitions of {}", name),
                error: BrokerError::new(
                    37,
                    format!(
                        "Topic currently has {} partitions, which is higher than the requested {}.",
                        topic.num_partitions, count
                    ),
                ),
            });
        }
        topic.num_partitions = count;
        Ok(())
    }

    async fn alter_topic_config(
        &self,
        name: &str,
        entries: &BTreeMap<String, Option<String>>,
    ) -> Result<()> {
        let mut state = self.record(AdminCall::AlterTopicConfig {
            name: name.to_string(),
        })?;
        let topic = state
            .topics
            .get_mut(name)
            .ok_or_else(|| OperatorError::TopicNotFound(name.to_string()))?;
        topic.config_entries = entries.clone();
        Ok(())
    }

    async fn create_acl(&self, resource: &AclResource, entry: &AclEntry) -> Result<()> {
        let binding = AclBinding {
            resource: resource.clone(),
            entry: entry.clone(),
        };
        let mut state = self.record(AdminCall::CreateAcl {
            binding: binding.clone(),
        })?;
        if state.failing_acl_operations.contains(&entry.operation) {
            return Err(OperatorError::AdminUnavailable(
                "connection reset while creating ACL".to_string(),
            ));
        }
        // Bindings are identified by the full tuple; re-creating one is a no-op
        if !state.acls.contains(&binding) {
            state.acls.push(binding);
        }
        Ok(())
    }

    async fn list_acls(&self, filter: &AclFilter) -> Result<Vec<AclBinding>> {
        let state = self.record(AdminCall::ListAcls)?;
        Ok(state
            .acls
            .iter()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect())
    }

    async fn delete_acls(&self, filter: &AclFilter) -> Result<Vec<AclMatch>> {
        let mut state = self.record(AdminCall::DeleteAcls {
            filter: filter.clone(),
        })?;
        let failures = std::mem::take(&mut state.acl_deletion_failures);

        let mut kept = Vec::new();
        let mut matches = Vec::new();
        for binding in std::mem::take(&mut state.acls) {
            if !filter.matches(&binding) {
                kept.push(binding);
                continue;
            }
            let error = failures
                .iter()
                .find(|(name, _)| *name == binding.resource.name)
                .map(|(_, e)| e.clone());
            if error.is_some() {
                kept.push(binding.clone());
            }
            matches.push(AclMatch { binding, error });
        }
        state.acls = kept;

        Ok(matches)
    }
}
