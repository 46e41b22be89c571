//! Kubernetes Resource Builders
//!
//! Wraps rendered broker configs into the ConfigMaps mounted by each broker
//! pod of a KafkaCluster.

use crate::broker_config::{BrokerConfigGenerator, RenderSettings};
use crate::crd::{KafkaCluster, API_GROUP};
use crate::error::{OperatorError, Result};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::BTreeMap;

/// Data key holding the rendered property file
pub const BROKER_CONFIG_KEY: &str = "broker-config";

/// Builder for generating Kubernetes resources from a KafkaCluster
pub struct ResourceBuilder<'a> {
    cluster: &'a KafkaCluster,
    name: String,
    namespace: String,
    settings: RenderSettings,
}

impl<'a> ResourceBuilder<'a> {
    /// Create a new resource builder
    pub fn new(cluster: &'a KafkaCluster) -> Result<Self> {
        let name =
            cluster.metadata.name.clone().ok_or_else(|| {
                OperatorError::InvalidConfig("cluster name is required".to_string())
            })?;

        let namespace = cluster
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());

        Ok(Self {
            cluster,
            name,
            namespace,
            settings: RenderSettings::default(),
        })
    }

    pub fn with_settings(mut self, settings: RenderSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Labels shared by every broker resource of the cluster
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("app".to_string(), "kafka".to_string()),
            ("kafka_cr".to_string(), self.name.clone()),
        ])
    }

    /// Name of the ConfigMap of one broker
    pub fn broker_configmap_name(&self, broker_id: i32) -> String {
        format!("{}-config-{}", self.name, broker_id)
    }

    /// Get owner reference for managed resources
    fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: format!("{}/v1alpha1", API_GROUP),
            kind: "KafkaCluster".to_string(),
            name: self.name.clone(),
            uid: self.cluster.metadata.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// Build the ConfigMap carrying the rendered config of one broker
    pub fn build_broker_configmap(
        &self,
        broker_id: i32,
        load_balancer_address: &str,
        super_users: &[String],
    ) -> Result<ConfigMap> {
        let rendered = BrokerConfigGenerator::new(&self.name, &self.namespace, &self.cluster.spec)
            .with_settings(self.settings.clone())
            .render_broker(broker_id, load_balancer_address, super_users)?;

        let mut data = BTreeMap::new();
        data.insert(BROKER_CONFIG_KEY.to_string(), rendered.text);

        Ok(ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.broker_configmap_name(broker_id)),
                namespace: Some(self.namespace.clone()),
                labels: Some(self.labels()),
                owner_references: Some(vec![self.owner_reference()]),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        })
    }

    /// ConfigMaps for every broker, in declaration order
    pub fn build_broker_configmaps(
        &self,
        load_balancer_address: &str,
        super_users: &[String],
    ) -> Result<Vec<ConfigMap>> {
        self.cluster
            .spec
            .brokers
            .iter()
            .map(|b| self.build_broker_configmap(b.id, load_balancer_address, super_users))
            .collect()
    }
}
