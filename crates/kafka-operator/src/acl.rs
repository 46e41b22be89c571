//! Access-control grants
//!
//! Expands a coarse access intent (read or write on a topic) into the
//! elementary ACL bindings the broker authorizer needs, applies them one by
//! one, and revokes everything a principal holds.
//!
//! Within one expansion `Describe` is always issued first. A failure after it
//! leaves the principal with visibility but no access; that partial state is
//! accepted and nothing is rolled back. Re-applying the intent converges it.

use crate::admin::{
    AclBinding, AclEntry, AclFilter, AclOperation, AclPatternType, AclPermission, AclResource,
    AclResourceType, ClusterAdmin,
};
use crate::error::{OperatorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Prefix the broker authorizer expects on user principals
pub const USER_PRINCIPAL_PREFIX: &str = "User:";

/// Wildcard host and group name
pub const WILDCARD: &str = "*";

/// Wrap a bare identity (typically a certificate DN) into a user principal
///
/// Already-wrapped principals are returned unchanged so that issuing and
/// revoking grants always agree on the identity string.
pub fn user_principal(identity: &str) -> String {
    if identity.starts_with(USER_PRINCIPAL_PREFIX) {
        identity.to_string()
    } else {
        format!("{}{}", USER_PRINCIPAL_PREFIX, identity)
    }
}

/// One elementary permission entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AclGrant {
    pub principal: String,
    pub resource_type: AclResourceType,
    pub resource_name: String,
    pub pattern_type: AclPatternType,
    pub operation: AclOperation,
    pub permission: AclPermission,
    pub host: String,
}

impl AclGrant {
    /// Literal allow grant from any host
    pub fn allow(
        principal: &str,
        operation: AclOperation,
        resource_type: AclResourceType,
        resource_name: &str,
    ) -> Self {
        Self {
            principal: principal.to_string(),
            resource_type,
            resource_name: resource_name.to_string(),
            pattern_type: AclPatternType::Literal,
            operation,
            permission: AclPermission::Allow,
            host: WILDCARD.to_string(),
        }
    }

    pub fn resource(&self) -> AclResource {
        AclResource {
            resource_type: self.resource_type,
            name: self.resource_name.clone(),
            pattern_type: self.pattern_type,
        }
    }

    pub fn entry(&self) -> AclEntry {
        AclEntry {
            principal: self.principal.clone(),
            host: self.host.clone(),
            operation: self.operation,
            permission: self.permission,
        }
    }
}

impl From<AclBinding> for AclGrant {
    fn from(binding: AclBinding) -> Self {
        Self {
            principal: binding.entry.principal,
            resource_type: binding.resource.resource_type,
            resource_name: binding.resource.name,
            pattern_type: binding.resource.pattern_type,
            operation: binding.entry.operation,
            permission: binding.entry.permission,
            host: binding.entry.host,
        }
    }
}

/// Declared access type
///
/// Values other than read and write are kept as `Unsupported` so they can
/// be reported instead of silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AccessKind {
    Read,
    Write,
    Unsupported(String),
}

impl From<&str> for AccessKind {
    fn from(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "read" => AccessKind::Read,
            "write" => AccessKind::Write,
            _ => AccessKind::Unsupported(value.to_string()),
        }
    }
}

impl From<String> for AccessKind {
    fn from(value: String) -> Self {
        AccessKind::from(value.as_str())
    }
}

impl From<AccessKind> for String {
    fn from(kind: AccessKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::Read => f.write_str("read"),
            AccessKind::Write => f.write_str("write"),
            AccessKind::Unsupported(other) => f.write_str(other),
        }
    }
}

/// A principal's declared access to one topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessIntent {
    pub principal: String,
    pub topic: String,
    pub kind: AccessKind,
}

impl AccessIntent {
    pub fn new(
        principal: impl Into<String>,
        topic: impl Into<String>,
        kind: impl Into<AccessKind>,
    ) -> Self {
        Self {
            principal: principal.into(),
            topic: topic.into(),
            kind: kind.into(),
        }
    }

    /// Elementary grants this intent stands for, in issue order
    pub fn expand(&self) -> Result<Vec<AclGrant>> {
        match &self.kind {
            AccessKind::Read => Ok(expand_read_intent(&self.principal, &self.topic)),
            AccessKind::Write => Ok(expand_write_intent(&self.principal, &self.topic)),
            AccessKind::Unsupported(kind) => {
                Err(OperatorError::UnsupportedIntentKind(kind.clone()))
            }
        }
    }
}

/// `[Describe:Topic, Read:Topic, Read:Group("*")]`
///
/// Consumers need read on every group since group ids are chosen by the
/// consuming application.
pub fn expand_read_intent(principal: &str, topic: &str) -> Vec<AclGrant> {
    vec![
        AclGrant::allow(principal, AclOperation::Describe, AclResourceType::Topic, topic),
        AclGrant::allow(principal, AclOperation::Read, AclResourceType::Topic, topic),
        AclGrant::allow(principal, AclOperation::Read, AclResourceType::Group, WILDCARD),
    ]
}

/// `[Describe:Topic, Write:Topic, Create:Topic]`
pub fn expand_write_intent(principal: &str, topic: &str) -> Vec<AclGrant> {
    vec![
        AclGrant::allow(principal, AclOperation::Describe, AclResourceType::Topic, topic),
        AclGrant::allow(principal, AclOperation::Write, AclResourceType::Topic, topic),
        AclGrant::allow(principal, AclOperation::Create, AclResourceType::Topic, topic),
    ]
}

/// Applies and revokes grants through a [`ClusterAdmin`]
#[derive(Clone)]
pub struct AclGrantExpander {
    admin: Arc<dyn ClusterAdmin>,
}

impl AclGrantExpander {
    pub fn new(admin: Arc<dyn ClusterAdmin>) -> Self {
        Self { admin }
    }

    /// Issue one create per grant of the expansion, stopping at the first failure
    ///
    /// An unrecognised access kind fails with `UnsupportedIntentKind` before
    /// any cluster call.
    pub async fn apply_intent(&self, intent: &AccessIntent) -> Result<()> {
        let grants = intent.expand()?;

        info!(
            principal = %intent.principal,
            topic = %intent.topic,
            kind = %intent.kind,
            "Creating ACLs"
        );

        for grant in &grants {
            debug!(
                principal = %grant.principal,
                operation = ?grant.operation,
                resource = ?grant.resource_type,
                name = %grant.resource_name,
                "Creating ACL"
            );
            self.admin.create_acl(&grant.resource(), &grant.entry()).await?;
        }

        Ok(())
    }

    /// Current grants held by a principal
    pub async fn grants_for_principal(&self, principal: &str) -> Result<Vec<AclGrant>> {
        let bindings = self
            .admin
            .list_acls(&AclFilter::for_principal(principal))
            .await?;
        Ok(bindings.into_iter().map(AclGrant::from).collect())
    }

    /// Delete every binding of `principal` across all resources
    ///
    /// Returns the number of removed bindings. If any match reports an error
    /// the call fails with `PartialRevocationFailure` carrying the first
    /// error, even though other matches are already gone; re-invoke to
    /// confirm convergence.
    pub async fn revoke_all_for_principal(&self, principal: &str) -> Result<usize> {
        info!(principal = %principal, "Revoking all ACLs");

        let matches = self
            .admin
            .delete_acls(&AclFilter::for_principal(principal))
            .await?;

        let total = matches.len();
        let mut failures = matches.into_iter().filter_map(|m| m.error);

        match failures.next() {
            None => {
                debug!(principal = %principal, removed = total, "ACLs revoked");
                Ok(total)
            }
            Some(first_error) => {
                let failed = 1 + failures.count();
                warn!(
                    principal = %principal,
                    removed = total - failed,
                    failed,
                    error = %first_error,
                    "ACL revocation partially failed"
                );
                Err(OperatorError::PartialRevocationFailure {
                    principal: principal.to_string(),
                    removed: total - failed,
                    failed,
                    first_error,
                })
            }
        }
    }
}
