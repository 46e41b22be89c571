//! # Kafka Operator Core
//!
//! Convergence and configuration logic for operating Kafka clusters on
//! Kubernetes: idempotent topic management, principal-scoped ACL grants, and
//! deterministic per-broker configuration rendering.
//!
//! ## Features
//!
//! - **Topic convergence**: create topics, grow partition counts and replace
//!   configuration overrides through a narrow [`admin::ClusterAdmin`] capability
//! - **ACL grants**: expand read and write intents into elementary bindings and
//!   revoke everything a principal holds
//! - **Broker configuration**: render the property file of each broker from the
//!   typed `KafkaCluster` spec and wrap it in a ConfigMap
//! - **Custom Resource Definitions**: `KafkaCluster`, `KafkaTopic` and
//!   `KafkaUser` with validation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kafka_operator::prelude::*;
//! use std::sync::Arc;
//!
//! async fn sync(admin: Arc<dyn ClusterAdmin>, topic: &KafkaTopic) -> KafkaTopicStatus {
//!     let topics = TopicConvergence::new(admin);
//!     reconcile_topic(&topics, topic).await
//! }
//! ```
//!
//! ## Architecture
//!
//! The core is stateless. Every pass reads the live cluster state through
//! [`admin::ClusterAdmin`], applies the delta with sequential calls and
//! reports the outcome or a typed [`error::OperatorError`]. Nothing is
//! retried internally; [`error::OperatorError::is_retryable`] and
//! [`error::OperatorError::requeue_delay`] tell the caller's loop what to do.
//!
//! ## Modules
//!
//! - [`admin`] - Cluster administration capability and its value types
//! - [`topics`] - Topic convergence
//! - [`acl`] - ACL grant expansion and revocation
//! - [`broker_config`] - Broker property file rendering
//! - [`crd`] - Custom Resource Definition types with validation
//! - [`resources`] - Broker ConfigMap builder
//! - [`topic_reconciler`] / [`user_reconciler`] - One pass per resource, producing status
//! - [`testing`] - In-memory cluster for tests
//! - [`error`] - Error types for operator operations

pub mod acl;
pub mod admin;
pub mod broker_config;
pub mod crd;
pub mod error;
pub mod resources;
pub mod testing;
pub mod topic_reconciler;
pub mod topics;
pub mod user_reconciler;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::acl::{user_principal, AccessIntent, AccessKind, AclGrant, AclGrantExpander};
    pub use crate::admin::{BrokerError, ClusterAdmin};
    pub use crate::broker_config::{BrokerConfigGenerator, RenderSettings, RenderedBrokerConfig};
    pub use crate::crd::{
        ClusterAddressingMode, KafkaCluster, KafkaClusterSpec, KafkaTopic, KafkaTopicSpec,
        KafkaTopicStatus, KafkaUser, KafkaUserSpec, KafkaUserStatus,
    };
    pub use crate::error::{OperatorError, Result};
    pub use crate::resources::ResourceBuilder;
    pub use crate::topic_reconciler::{cleanup_topic, reconcile_topic};
    pub use crate::topics::{TopicConvergence, TopicConvergenceOutcome, TopicSpec};
    pub use crate::user_reconciler::{cleanup_user, reconcile_user};
}
