//! Cluster administration capability
//!
//! The convergence core talks to brokers only through [`ClusterAdmin`]. The
//! trait mirrors the request/response shape of the broker administration
//! protocol; connection pooling, deadlines and transport-level retries belong
//! to the implementation, not to this crate.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Broker error code for an unknown topic or partition
pub const UNKNOWN_TOPIC_OR_PARTITION: i16 = 3;

/// Broker error codes the protocol marks as transient
const RETRIABLE_CODES: &[i16] = &[
    5,  // LEADER_NOT_AVAILABLE
    6,  // NOT_LEADER_OR_FOLLOWER
    7,  // REQUEST_TIMED_OUT
    13, // NETWORK_EXCEPTION
    14, // COORDINATOR_LOAD_IN_PROGRESS
    15, // COORDINATOR_NOT_AVAILABLE
    41, // NOT_CONTROLLER
];

/// Error reported by the cluster for a single item of a batched request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerError {
    /// Protocol error code
    pub code: i16,
    /// Message as reported by the broker
    pub message: String,
}

impl BrokerError {
    pub fn new(code: i16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_unknown_topic(&self) -> bool {
        self.code == UNKNOWN_TOPIC_OR_PARTITION
    }

    pub fn is_retriable(&self) -> bool {
        RETRIABLE_CODES.contains(&self.code)
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for BrokerError {}

/// Topic summary as returned by a topic listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicDetail {
    pub num_partitions: i32,
    pub replication_factor: i16,
    /// Override set; `None` values reset a key to the broker default
    pub config_entries: BTreeMap<String, Option<String>>,
}

/// Live layout of one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMetadata {
    pub id: i32,
    pub leader: i32,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>,
    pub error: Option<BrokerError>,
}

/// Result of describing one topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetadata {
    pub name: String,
    pub partitions: Vec<PartitionMetadata>,
    /// Per-request error reported by the cluster for this topic
    pub error: Option<BrokerError>,
}

impl TopicMetadata {
    pub fn partition_count(&self) -> i32 {
        self.partitions.len() as i32
    }
}

/// Resource kinds an ACL can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AclResourceType {
    Topic,
    Group,
    Cluster,
    TransactionalId,
}

/// How an ACL resource name is matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AclPatternType {
    Literal,
    Prefixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AclOperation {
    All,
    Read,
    Write,
    Create,
    Delete,
    Alter,
    Describe,
    ClusterAction,
    DescribeConfigs,
    AlterConfigs,
    IdempotentWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AclPermission {
    Allow,
    Deny,
}

/// The resource half of an ACL binding
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AclResource {
    pub resource_type: AclResourceType,
    pub name: String,
    pub pattern_type: AclPatternType,
}

/// The access half of an ACL binding
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AclEntry {
    pub principal: String,
    pub host: String,
    pub operation: AclOperation,
    pub permission: AclPermission,
}

/// A resource together with one access entry, as stored by the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AclBinding {
    pub resource: AclResource,
    pub entry: AclEntry,
}

/// Selects ACL bindings; `None` fields match anything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AclFilter {
    pub resource_type: Option<AclResourceType>,
    pub resource_name: Option<String>,
    pub pattern_type: Option<AclPatternType>,
    pub principal: Option<String>,
    pub host: Option<String>,
    pub operation: Option<AclOperation>,
    pub permission: Option<AclPermission>,
}

impl AclFilter {
    /// Filter matching every binding of one principal across all resources
    pub fn for_principal(principal: impl Into<String>) -> Self {
        Self {
            principal: Some(principal.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, binding: &AclBinding) -> bool {
        fn field<T: PartialEq>(filter: &Option<T>, value: &T) -> bool {
            filter.as_ref().map_or(true, |f| f == value)
        }

        field(&self.resource_type, &binding.resource.resource_type)
            && field(&self.resource_name, &binding.resource.name)
            && field(&self.pattern_type, &binding.resource.pattern_type)
            && field(&self.principal, &binding.entry.principal)
            && field(&self.host, &binding.entry.host)
            && field(&self.operation, &binding.entry.operation)
            && field(&self.permission, &binding.entry.permission)
    }
}

/// Outcome for one binding matched by a filtered deletion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclMatch {
    pub binding: AclBinding,
    pub error: Option<BrokerError>,
}

/// Narrow broker administration capability used by the convergence core
///
/// Implementations map transport failures to
/// [`OperatorError::AdminUnavailable`](crate::error::OperatorError::AdminUnavailable),
/// a create of an existing topic to `TopicAlreadyExists`, and an operation
/// on a missing topic to `TopicNotFound`. Per-item errors of batched
/// responses are returned in the response values, not as `Err`.
#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    /// All topics visible to the client, keyed by name
    async fn list_topics(&self) -> Result<BTreeMap<String, TopicDetail>>;

    /// Metadata for the named topics, one entry per name
    async fn describe_topics(&self, names: &[String]) -> Result<Vec<TopicMetadata>>;

    async fn create_topic(&self, name: &str, detail: &TopicDetail) -> Result<()>;

    async fn delete_topic(&self, name: &str) -> Result<()>;

    /// Set the partition count; an empty assignment lets the cluster place replicas
    async fn alter_partitions(
        &self,
        name: &str,
        count: i32,
        assignment: &[Vec<i32>],
    ) -> Result<()>;

    /// Replace the complete override set of a topic
    async fn alter_topic_config(
        &self,
        name: &str,
        entries: &BTreeMap<String, Option<String>>,
    ) -> Result<()>;

    async fn create_acl(&self, resource: &AclResource, entry: &AclEntry) -> Result<()>;

    async fn list_acls(&self, filter: &AclFilter) -> Result<Vec<AclBinding>>;

    /// Delete every binding matching the filter, reporting each match
    async fn delete_acls(&self, filter: &AclFilter) -> Result<Vec<AclMatch>>;
}
