//! KafkaUser reconciliation
//!
//! Applies the topic grants of a `KafkaUser` for its certificate identity and
//! revokes everything it holds when the resource goes away. Both directions
//! wrap the DN with [`user_principal`] so they address the same principal.

use crate::acl::{user_principal, AccessIntent, AclGrantExpander};
use crate::crd::{Condition, KafkaUser, KafkaUserStatus};
use crate::error::{format_validation_errors, OperatorError, Result};
use chrono::Utc;
use kube::ResourceExt;
use tracing::{info, instrument, warn};
use validator::Validate;

/// Metrics for user reconciliation
#[derive(Clone)]
pub struct UserReconcilerMetrics {
    pub reconciliations: metrics::Counter,
    pub errors: metrics::Counter,
    pub duration: metrics::Histogram,
}

impl UserReconcilerMetrics {
    pub fn new() -> Self {
        Self {
            reconciliations: metrics::counter!("kafka_operator_user_reconciliations_total"),
            errors: metrics::counter!("kafka_operator_user_reconciliation_errors_total"),
            duration: metrics::histogram!("kafka_operator_user_reconciliation_duration_seconds"),
        }
    }
}

impl Default for UserReconcilerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Grants handled by one pass
#[derive(Debug, Default)]
struct GrantPass {
    applied: usize,
    /// `topic:type` of grants with an unsupported access type
    skipped: Vec<String>,
}

/// A grant pass stopped early
struct GrantFailure {
    pass: GrantPass,
    error: OperatorError,
}

pub async fn reconcile_user(expander: &AclGrantExpander, user: &KafkaUser) -> KafkaUserStatus {
    reconcile_user_with_metrics(expander, user, None).await
}

#[instrument(skip(expander, user, metrics), fields(name = %user.name_any(), namespace = user.namespace()))]
pub async fn reconcile_user_with_metrics(
    expander: &AclGrantExpander,
    user: &KafkaUser,
    metrics: Option<&UserReconcilerMetrics>,
) -> KafkaUserStatus {
    let start = std::time::Instant::now();
    if let Some(metrics) = metrics {
        metrics.reconciliations.increment(1);
    }

    let status = match user.spec.validate() {
        Err(e) => build_failed_status(user, &format_validation_errors(&e)),
        Ok(()) => match apply_grants(expander, user).await {
            Ok(pass) => build_ready_status(user, pass),
            Err(failure) => {
                warn!(
                    principal = %user_principal(&user.spec.dn),
                    applied = failure.pass.applied,
                    reason = failure.error.reason(),
                    error = %failure.error,
                    "User reconciliation failed"
                );
                build_error_status(user, failure.pass, &failure.error)
            }
        },
    };

    if let Some(metrics) = metrics {
        metrics.duration.record(start.elapsed().as_secs_f64());
        if status.phase != "Ready" {
            metrics.errors.increment(1);
        }
    }

    status
}

/// Apply every grant in declaration order
///
/// Grants with an unsupported access type are skipped and reported; any
/// other failure stops the pass.
async fn apply_grants(
    expander: &AclGrantExpander,
    user: &KafkaUser,
) -> std::result::Result<GrantPass, GrantFailure> {
    let principal = user_principal(&user.spec.dn);
    info!(
        principal = %principal,
        grants = user.spec.topic_grants.len(),
        "Reconciling KafkaUser"
    );

    let mut pass = GrantPass::default();
    for grant in &user.spec.topic_grants {
        let intent = AccessIntent::new(
            principal.clone(),
            grant.topic_name.clone(),
            grant.access_type.clone(),
        );
        match expander.apply_intent(&intent).await {
            Ok(()) => pass.applied += 1,
            Err(OperatorError::UnsupportedIntentKind(kind)) => {
                warn!(
                    principal = %principal,
                    topic = %grant.topic_name,
                    access_type = %kind,
                    "Skipping grant with unsupported access type"
                );
                pass.skipped.push(format!("{}:{}", grant.topic_name, kind));
            }
            Err(error) => return Err(GrantFailure { pass, error }),
        }
    }

    Ok(pass)
}

/// Revoke every ACL held by the user's principal
///
/// Returns the number of removed bindings.
#[instrument(skip(expander, user), fields(name = %user.name_any()))]
pub async fn cleanup_user(expander: &AclGrantExpander, user: &KafkaUser) -> Result<usize> {
    let principal = user_principal(&user.spec.dn);
    let removed = expander.revoke_all_for_principal(&principal).await?;
    info!(principal = %principal, removed, "User cleanup complete");
    Ok(removed)
}

fn build_ready_status(user: &KafkaUser, pass: GrantPass) -> KafkaUserStatus {
    let now = Utc::now().to_rfc3339();
    let message = format!("{} topic grants applied", pass.applied);

    let acls_applied = if pass.skipped.is_empty() {
        Condition::new("ACLsApplied", "True", "ACLsApplied", &message, &now)
    } else {
        Condition::new(
            "ACLsApplied",
            "False",
            "UnsupportedIntentKind",
            &format!("{}, skipped {}", message, pass.skipped.join(",")),
            &now,
        )
    };

    KafkaUserStatus {
        phase: "Ready".to_string(),
        message,
        principal: user_principal(&user.spec.dn),
        applied_grants: pass.applied as i32,
        skipped_grants: pass.skipped,
        observed_generation: user.metadata.generation.unwrap_or(0),
        conditions: vec![
            Condition::new("Ready", "True", "UserReady", "User is ready", &now),
            acls_applied,
        ],
        last_sync_time: Some(now),
    }
}

fn build_failed_status(user: &KafkaUser, error_msg: &str) -> KafkaUserStatus {
    let now = Utc::now().to_rfc3339();

    KafkaUserStatus {
        phase: "Failed".to_string(),
        message: error_msg.to_string(),
        principal: String::new(),
        applied_grants: 0,
        skipped_grants: Vec::new(),
        observed_generation: user.metadata.generation.unwrap_or(0),
        conditions: vec![Condition::new("Ready", "False", "ValidationFailed", error_msg, &now)],
        last_sync_time: Some(now),
    }
}

fn build_error_status(user: &KafkaUser, pass: GrantPass, error: &OperatorError) -> KafkaUserStatus {
    let now = Utc::now().to_rfc3339();
    let message = error.to_string();

    KafkaUserStatus {
        phase: "Error".to_string(),
        message: message.clone(),
        principal: user_principal(&user.spec.dn),
        applied_grants: pass.applied as i32,
        skipped_grants: pass.skipped,
        observed_generation: user.metadata.generation.unwrap_or(0),
        conditions: vec![
            Condition::new("Ready", "False", error.reason(), &message, &now),
            Condition::new("ACLsApplied", "False", error.reason(), &message, &now),
        ],
        last_sync_time: Some(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::AccessKind;
    use crate::admin::{AclOperation, AclResourceType};
    use crate::crd::{ClusterReference, KafkaUserSpec, UserTopicGrant};
    use crate::testing::{AdminCall, MockClusterAdmin};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::sync::Arc;

    fn create_test_user(grants: &[(&str, &str)]) -> KafkaUser {
        KafkaUser {
            metadata: ObjectMeta {
                name: Some("orders-app".to_string()),
                namespace: Some("kafka".to_string()),
                ..Default::default()
            },
            spec: KafkaUserSpec {
                cluster_ref: ClusterReference {
                    name: "mycluster".to_string(),
                    namespace: None,
                },
                dn: "CN=orders-app".to_string(),
                topic_grants: grants
                    .iter()
                    .map(|(topic, access)| UserTopicGrant {
                        topic_name: topic.to_string(),
                        access_type: AccessKind::from(*access),
                    })
                    .collect(),
            },
            status: None,
        }
    }

    fn setup() -> (Arc<MockClusterAdmin>, AclGrantExpander) {
        let admin = Arc::new(MockClusterAdmin::new());
        let expander = AclGrantExpander::new(admin.clone());
        (admin, expander)
    }

    #[tokio::test]
    async fn test_reconcile_user_applies_grants() {
        let (admin, expander) = setup();
        let user = create_test_user(&[("orders", "read"), ("payments", "write")]);

        let status = reconcile_user(&expander, &user).await;

        assert_eq!(status.phase, "Ready");
        assert_eq!(status.principal, "User:CN=orders-app");
        assert_eq!(status.applied_grants, 2);
        assert_eq!(admin.acls().len(), 6);
        assert!(admin
            .acls()
            .iter()
            .all(|b| b.entry.principal == "User:CN=orders-app"));
    }

    #[tokio::test]
    async fn test_reconcile_user_skips_unsupported_kind() {
        let (admin, expander) = setup();
        let user = create_test_user(&[("orders", "read"), ("payments", "admin"), ("audit", "read")]);

        let status = reconcile_user(&expander, &user).await;

        assert_eq!(status.phase, "Ready");
        assert_eq!(status.applied_grants, 2);
        assert_eq!(status.skipped_grants, vec!["payments:admin".to_string()]);
        assert_eq!(status.conditions[1].status, "False");
        assert_eq!(status.conditions[1].reason, "UnsupportedIntentKind");

        let audit = admin
            .acls()
            .into_iter()
            .filter(|b| b.resource.name == "audit")
            .count();
        // The wildcard group grant of audit is already held from orders
        assert_eq!(audit, 2);
        assert_eq!(admin.acls().len(), 5);
        assert_eq!(
            admin
                .calls_matching(|c| matches!(c, AdminCall::CreateAcl { .. }))
                .len(),
            6
        );
        assert!(admin.acls().iter().all(|b| b.resource.name != "payments"));
    }

    #[tokio::test]
    async fn test_unavailable_cluster_stops_grant_pass() {
        let (admin, expander) = setup();
        admin.set_unavailable(true);
        let user = create_test_user(&[("payments", "admin"), ("orders", "read")]);

        let status = reconcile_user(&expander, &user).await;

        assert_eq!(status.phase, "Error");
        assert_eq!(status.applied_grants, 0);
        assert_eq!(status.skipped_grants, vec!["payments:admin".to_string()]);
        assert_eq!(status.conditions[0].reason, "AdminUnavailable");
    }

    #[tokio::test]
    async fn test_reconcile_user_validation_failure() {
        let (admin, expander) = setup();
        let mut user = create_test_user(&[("orders", "read")]);
        user.spec.dn = String::new();

        let status = reconcile_user(&expander, &user).await;
        assert_eq!(status.phase, "Failed");
        assert!(status.message.contains("dn"));
        assert!(admin.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_user_revokes_same_principal() {
        let (admin, expander) = setup();
        let user = create_test_user(&[("orders", "write")]);
        reconcile_user(&expander, &user).await;

        let removed = cleanup_user(&expander, &user).await.unwrap();
        assert_eq!(removed, 3);
        assert!(admin.acls().is_empty());
    }

    #[tokio::test]
    async fn test_partial_grant_failure_reported() {
        let (admin, expander) = setup();
        admin.fail_create_acl(AclOperation::Write);
        let user = create_test_user(&[("orders", "write")]);

        let status = reconcile_user(&expander, &user).await;

        assert_eq!(status.phase, "Error");
        assert_eq!(status.conditions[0].reason, "AdminUnavailable");
        let held: Vec<_> = admin
            .acls()
            .into_iter()
            .map(|b| (b.entry.operation, b.resource.resource_type))
            .collect();
        assert_eq!(held, vec![(AclOperation::Describe, AclResourceType::Topic)]);
    }
}
