//! Custom Resource Definitions for the Kafka operator
//!
//! `KafkaCluster` describes brokers, listeners and storage; `KafkaTopic` and
//! `KafkaUser` declare topics and per-principal topic access for a cluster.

use crate::acl::AccessKind;
use crate::topics::TopicSpec;
use kube::CustomResource;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use validator::{Validate, ValidationError};

/// API group shared by all resources of the operator
pub const API_GROUP: &str = "kafka.operator.dev";

/// Regex for validating Kubernetes names (RFC 1123 subdomain)
static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

/// Legal Kafka topic names
static TOPIC_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._-]+$").unwrap());

/// Validate a Kubernetes name (RFC 1123 subdomain)
fn validate_k8s_name(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Ok(()); // Empty is allowed for optional fields
    }
    if value.len() > 63 {
        return Err(
            ValidationError::new("name_too_long").with_message("name exceeds 63 characters".into())
        );
    }
    if !NAME_REGEX.is_match(value) {
        return Err(ValidationError::new("invalid_name").with_message(
            format!("'{}' is not a valid Kubernetes name (RFC 1123)", value).into(),
        ));
    }
    Ok(())
}

fn validate_topic_name(value: &str) -> Result<(), ValidationError> {
    if value == "." || value == ".." {
        return Err(ValidationError::new("invalid_topic_name")
            .with_message("topic name cannot be '.' or '..'".into()));
    }
    if !TOPIC_NAME_REGEX.is_match(value) {
        return Err(ValidationError::new("invalid_topic_name").with_message(
            format!(
                "'{}' may only contain ASCII alphanumerics, '.', '_' and '-'",
                value
            )
            .into(),
        ));
    }
    Ok(())
}

// ============================================================================
// KafkaCluster CRD
// ============================================================================

/// KafkaCluster custom resource definition
///
/// Declares the brokers of a cluster, their listeners and storage. The
/// operator renders one broker configuration per entry of `brokers`.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[kube(
    group = "kafka.operator.dev",
    version = "v1alpha1",
    kind = "KafkaCluster",
    plural = "kafkaclusters",
    shortname = "kc",
    namespaced,
    printcolumn = r#"{"name":"Headless","type":"boolean","jsonPath":".spec.headlessServiceEnabled"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KafkaClusterSpec {
    /// Address brokers through the headless service instead of the cluster service
    #[serde(default = "default_true")]
    pub headless_service_enabled: bool,

    /// ZooKeeper connection addresses (host:port)
    #[validate(length(min = 1, message = "at least one ZooKeeper address is required"))]
    pub zk_addresses: Vec<String>,

    /// Listener configuration shared by all brokers
    #[validate(nested)]
    pub listeners_config: ListenersConfig,

    /// Brokers of the cluster
    #[validate(length(min = 1, max = 1000, message = "brokers must have 1-1000 entries"))]
    #[validate(nested)]
    #[validate(custom(function = "validate_unique_broker_ids"))]
    pub brokers: Vec<BrokerSpec>,
}

fn validate_unique_broker_ids(brokers: &[BrokerSpec]) -> Result<(), ValidationError> {
    let mut seen = std::collections::HashSet::new();
    for broker in brokers {
        if !seen.insert(broker.id) {
            return Err(ValidationError::new("duplicate_broker_id")
                .with_message(format!("broker id {} is declared twice", broker.id).into()));
        }
    }
    Ok(())
}

/// DNS pattern used to reach a broker from inside the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterAddressingMode {
    /// `<cluster>-<id>.<cluster>-headless.<namespace>.svc.<domain>`
    HeadlessDns,
    /// `<cluster>-<id>.<namespace>.svc.<domain>`
    ClusterServiceDns,
}

impl KafkaClusterSpec {
    pub fn addressing_mode(&self) -> ClusterAddressingMode {
        if self.headless_service_enabled {
            ClusterAddressingMode::HeadlessDns
        } else {
            ClusterAddressingMode::ClusterServiceDns
        }
    }

    pub fn broker(&self, id: i32) -> Option<&BrokerSpec> {
        self.brokers.iter().find(|b| b.id == id)
    }

    pub fn broker_ids(&self) -> Vec<i32> {
        self.brokers.iter().map(|b| b.id).collect()
    }
}

/// One broker of the cluster
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BrokerSpec {
    /// Broker id, also the offset into external port ranges
    #[validate(range(min = 0, max = 65535, message = "broker id must be between 0 and 65535"))]
    pub id: i32,

    /// Storage mounts in preference order
    #[serde(default)]
    #[validate(nested)]
    pub storage_configs: Vec<StorageConfig>,

    /// Per-broker property overrides appended to the rendered config
    #[serde(default)]
    #[validate(custom(function = "validate_broker_overrides"))]
    pub config: BTreeMap<String, String>,
}

fn validate_broker_overrides(config: &BTreeMap<String, String>) -> Result<(), ValidationError> {
    for (key, value) in config {
        if key.is_empty() || key.contains(['=', '\n']) || value.contains('\n') {
            return Err(ValidationError::new("invalid_override").with_message(
                format!("override '{}' must be a single key=value line", key).into(),
            ));
        }
    }
    Ok(())
}

/// A storage mount of a broker
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Absolute mount path inside the broker container
    #[validate(custom(function = "validate_mount_path"))]
    pub mount_path: String,
}

fn validate_mount_path(path: &str) -> Result<(), ValidationError> {
    if !path.starts_with('/') || path.contains(',') {
        return Err(ValidationError::new("invalid_mount_path").with_message(
            format!("'{}' must be an absolute path without commas", path).into(),
        ));
    }
    Ok(())
}

/// Listener configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ListenersConfig {
    /// Listeners reachable inside the Kubernetes cluster
    #[serde(default)]
    #[validate(nested)]
    pub internal_listeners: Vec<InternalListenerConfig>,

    /// Listeners exposed through the load balancer
    #[serde(default)]
    #[validate(nested)]
    pub external_listeners: Vec<ExternalListenerConfig>,

    /// TLS material; enables the keystore/truststore settings when present
    #[serde(default)]
    #[validate(nested)]
    pub ssl_secrets: Option<SslSecrets>,
}

impl ListenersConfig {
    /// TLS secrets exist and at least one internal listener speaks SSL
    pub fn ssl_enabled_for_internal_communication(&self) -> bool {
        self.ssl_secrets.is_some()
            && self
                .internal_listeners
                .iter()
                .any(|l| l.listener_type == ListenerType::Ssl)
    }
}

/// Security protocol of a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ListenerType {
    #[serde(alias = "PLAINTEXT")]
    Plaintext,
    #[serde(alias = "SSL")]
    Ssl,
    #[serde(alias = "SASL_PLAINTEXT")]
    SaslPlaintext,
    #[serde(alias = "SASL_SSL")]
    SaslSsl,
}

impl ListenerType {
    /// Protocol name as the broker expects it
    pub fn protocol_name(&self) -> &'static str {
        match self {
            ListenerType::Plaintext => "PLAINTEXT",
            ListenerType::Ssl => "SSL",
            ListenerType::SaslPlaintext => "SASL_PLAINTEXT",
            ListenerType::SaslSsl => "SASL_SSL",
        }
    }
}

/// Listener reachable inside the Kubernetes cluster
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InternalListenerConfig {
    #[validate(length(min = 1, max = 64, message = "listener name must be 1-64 characters"))]
    pub name: String,

    #[serde(rename = "type")]
    pub listener_type: ListenerType,

    #[validate(range(min = 1, max = 65535, message = "container port must be 1-65535"))]
    pub container_port: i32,

    /// Exactly one internal listener carries inter-broker traffic
    #[serde(default)]
    pub used_for_inner_broker_communication: bool,
}

/// Listener exposed through the load balancer
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExternalListenerConfig {
    #[validate(length(min = 1, max = 64, message = "listener name must be 1-64 characters"))]
    pub name: String,

    #[serde(rename = "type")]
    pub listener_type: ListenerType,

    #[validate(range(min = 1, max = 65535, message = "container port must be 1-65535"))]
    pub container_port: i32,

    /// First external port; broker `n` is reachable on `externalStartingPort + n`
    #[serde(default)]
    #[validate(range(min = 1, max = 65535, message = "external starting port must be 1-65535"))]
    pub external_starting_port: Option<i32>,
}

/// TLS secret references
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SslSecrets {
    /// Secret holding the broker keystore and truststore
    #[validate(length(min = 1, message = "tlsSecretName is required"))]
    #[validate(custom(function = "validate_k8s_name"))]
    pub tls_secret_name: String,

    /// Secret holding the keystore password
    #[serde(default)]
    #[validate(custom(function = "validate_k8s_name"))]
    pub jks_password_name: Option<String>,
}

// ============================================================================
// Shared types
// ============================================================================

/// Reference to a KafkaCluster
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ClusterReference {
    /// Name of the KafkaCluster
    #[validate(length(min = 1, max = 63, message = "cluster name must be 1-63 characters"))]
    #[validate(custom(function = "validate_k8s_name"))]
    pub name: String,

    /// Namespace of the KafkaCluster (defaults to same namespace)
    #[serde(default)]
    #[validate(custom(function = "validate_k8s_name"))]
    pub namespace: Option<String>,
}

/// Condition for tracking resource status
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition: Ready, Synced, ConfigApplied, ACLsApplied
    pub r#type: String,

    /// Status: True, False, Unknown
    pub status: String,

    /// Machine-readable reason; the error kind on failure
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last transition time
    pub last_transition_time: String,
}

impl Condition {
    pub fn new(r#type: &str, status: &str, reason: &str, message: &str, now: &str) -> Self {
        Self {
            r#type: r#type.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: now.to_string(),
        }
    }
}

// ============================================================================
// KafkaTopic CRD
// ============================================================================

/// KafkaTopic custom resource for declarative topic management
///
/// # Example
///
/// ```yaml
/// apiVersion: kafka.operator.dev/v1alpha1
/// kind: KafkaTopic
/// metadata:
///   name: orders
/// spec:
///   clusterRef:
///     name: mycluster
///   name: orders
///   partitions: 6
///   replicationFactor: 3
///   config:
///     retention.ms: "604800000"
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[kube(
    group = "kafka.operator.dev",
    version = "v1alpha1",
    kind = "KafkaTopic",
    plural = "kafkatopics",
    shortname = "kt",
    namespaced,
    status = "KafkaTopicStatus",
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterRef.name"}"#,
    printcolumn = r#"{"name":"Partitions","type":"integer","jsonPath":".spec.partitions"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KafkaTopicSpec {
    /// Cluster the topic belongs to
    #[validate(nested)]
    pub cluster_ref: ClusterReference,

    /// Topic name in the cluster
    #[validate(length(min = 1, max = 249, message = "topic name must be 1-249 characters"))]
    #[validate(custom(function = "validate_topic_name"))]
    pub name: String,

    /// Partition count; can only be increased
    #[validate(range(min = 1, max = 10000, message = "partitions must be between 1 and 10000"))]
    pub partitions: i32,

    #[validate(range(
        min = 1,
        max = 32767,
        message = "replication factor must be between 1 and 32767"
    ))]
    pub replication_factor: i32,

    /// Complete topic override set
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    /// Delete the topic from the cluster when this resource is removed
    #[serde(default)]
    pub delete_on_remove: bool,
}

impl KafkaTopicSpec {
    /// Desired state for convergence; call after validation
    pub fn topic_spec(&self) -> TopicSpec {
        TopicSpec {
            name: self.name.clone(),
            partitions: self.partitions,
            replication_factor: i16::try_from(self.replication_factor).unwrap_or(i16::MAX),
            config: self
                .config
                .iter()
                .map(|(k, v)| (k.clone(), Some(v.clone())))
                .collect(),
        }
    }
}

/// Status of the KafkaTopic resource
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KafkaTopicStatus {
    /// Current phase: Ready, Error, Failed
    #[serde(default)]
    pub phase: String,

    #[serde(default)]
    pub message: String,

    /// Live partition count
    #[serde(default)]
    pub current_partitions: i32,

    #[serde(default)]
    pub topic_exists: bool,

    #[serde(default)]
    pub observed_generation: i64,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub last_sync_time: Option<String>,

    #[serde(default)]
    pub partition_info: Vec<PartitionInfo>,
}

/// Information about a topic partition
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartitionInfo {
    pub partition: i32,
    pub leader: i32,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>,
}

// ============================================================================
// KafkaUser CRD
// ============================================================================

/// KafkaUser custom resource granting a certificate identity topic access
///
/// # Example
///
/// ```yaml
/// apiVersion: kafka.operator.dev/v1alpha1
/// kind: KafkaUser
/// metadata:
///   name: orders-app
/// spec:
///   clusterRef:
///     name: mycluster
///   dn: "CN=orders-app"
///   topicGrants:
///     - topicName: orders
///       accessType: write
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[kube(
    group = "kafka.operator.dev",
    version = "v1alpha1",
    kind = "KafkaUser",
    plural = "kafkausers",
    shortname = "ku",
    namespaced,
    status = "KafkaUserStatus",
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterRef.name"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KafkaUserSpec {
    #[validate(nested)]
    pub cluster_ref: ClusterReference,

    /// Distinguished name of the client certificate
    #[validate(length(min = 1, max = 1024, message = "dn must be 1-1024 characters"))]
    pub dn: String,

    /// Topic access, applied in declaration order
    #[serde(default)]
    #[validate(length(max = 100, message = "maximum 100 topic grants allowed"))]
    #[validate(nested)]
    #[validate(custom(function = "validate_unique_grants"))]
    pub topic_grants: Vec<UserTopicGrant>,
}

/// Access of a user to one topic
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UserTopicGrant {
    #[validate(length(min = 1, max = 249, message = "topic name must be 1-249 characters"))]
    #[validate(custom(function = "validate_topic_name"))]
    pub topic_name: String,

    /// `read` or `write`
    #[schemars(with = "String")]
    pub access_type: AccessKind,
}

fn validate_unique_grants(grants: &[UserTopicGrant]) -> Result<(), ValidationError> {
    let mut seen = std::collections::HashSet::new();
    for grant in grants {
        if !seen.insert((&grant.topic_name, &grant.access_type)) {
            return Err(ValidationError::new("duplicate_grant").with_message(
                format!(
                    "duplicate {} grant for topic {}",
                    grant.access_type, grant.topic_name
                )
                .into(),
            ));
        }
    }
    Ok(())
}

/// Status of the KafkaUser resource
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KafkaUserStatus {
    /// Current phase: Ready, Error, Failed
    #[serde(default)]
    pub phase: String,

    #[serde(default)]
    pub message: String,

    /// Principal the grants are bound to
    #[serde(default)]
    pub principal: String,

    /// Topic grants applied in the last pass
    #[serde(default)]
    pub applied_grants: i32,

    /// Grants skipped because their access type is not supported, as `topic:type`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_grants: Vec<String>,

    #[serde(default)]
    pub observed_generation: i64,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub last_sync_time: Option<String>,
}

fn default_true() -> bool {
    true
}
