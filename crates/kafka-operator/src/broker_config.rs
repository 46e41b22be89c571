//! Broker configuration rendering
//!
//! Renders the property file a broker is started with from the typed cluster
//! spec. Every block is produced by its own pure function and assembled by
//! [`Properties`] as an ordered list of key/value entries, so identical
//! inputs always yield byte-identical output.
//!
//! Rendering never emits diagnostics. Inconsistent listener sets are
//! rejected with [`OperatorError::ListenerConfiguration`].

use crate::acl::user_principal;
use crate::crd::{
    BrokerSpec, ClusterAddressingMode, ExternalListenerConfig, InternalListenerConfig,
    KafkaCluster, KafkaClusterSpec, ListenersConfig,
};
use crate::error::{OperatorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

const MAX_PORT: i32 = 65535;
const MAX_BROKER_ID: i32 = 65535;

/// Fixed locations and class names written into every broker config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RenderSettings {
    pub keystore_location: String,
    pub truststore_location: String,
    /// Keystore of the metrics reporter client
    pub client_keystore_location: String,
    pub client_truststore_location: String,
    /// Directory created below each storage mount for log segments
    pub log_dir_subdirectory: String,
    pub metric_reporter_class: String,
    /// Cluster DNS domain used for internal addresses
    pub cluster_domain: String,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            keystore_location: "/var/run/secrets/java.io/keystores/kafka.server.keystore.jks"
                .to_string(),
            truststore_location: "/var/run/secrets/java.io/keystores/kafka.server.truststore.jks"
                .to_string(),
            client_keystore_location: "/var/run/secrets/java.io/keystores/client.keystore.jks"
                .to_string(),
            client_truststore_location: "/var/run/secrets/java.io/keystores/client.truststore.jks"
                .to_string(),
            log_dir_subdirectory: "kafka".to_string(),
            metric_reporter_class:
                "com.linkedin.kafka.cruisecontrol.metricsreporter.CruiseControlMetricsReporter"
                    .to_string(),
            cluster_domain: "cluster.local".to_string(),
        }
    }
}

/// Rendered property file of one broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedBrokerConfig {
    pub broker_id: i32,
    pub text: String,
}

impl RenderedBrokerConfig {
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for RenderedBrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// One `key=value` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub key: String,
    pub value: String,
}

impl Property {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Ordered blocks of properties
///
/// Blocks are separated by a single blank line; empty blocks are skipped.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    blocks: Vec<Vec<Property>>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(mut self, block: Vec<Property>) -> Self {
        if !block.is_empty() {
            self.blocks.push(block);
        }
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            for property in block {
                out.push_str(&property.key);
                out.push('=');
                out.push_str(&property.value);
                out.push('\n');
            }
        }
        out
    }
}

/// Renders broker configs for one cluster
pub struct BrokerConfigGenerator<'a> {
    cluster_name: &'a str,
    namespace: &'a str,
    spec: &'a KafkaClusterSpec,
    settings: RenderSettings,
}

impl<'a> BrokerConfigGenerator<'a> {
    /// Generator for a KafkaCluster resource; the resource must have a name
    pub fn for_cluster(cluster: &'a KafkaCluster) -> Result<Self> {
        let name = cluster
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| OperatorError::InvalidConfig("cluster name is required".to_string()))?;
        let namespace = cluster.metadata.namespace.as_deref().unwrap_or("default");
        Ok(Self::new(name, namespace, &cluster.spec))
    }

    pub fn new(cluster_name: &'a str, namespace: &'a str, spec: &'a KafkaClusterSpec) -> Self {
        Self {
            cluster_name,
            namespace,
            spec,
            settings: RenderSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: RenderSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Render the config of the broker with `broker_id`
    pub fn render_broker(
        &self,
        broker_id: i32,
        load_balancer_address: &str,
        super_users: &[String],
    ) -> Result<RenderedBrokerConfig> {
        let broker = self.spec.broker(broker_id).ok_or_else(|| {
            OperatorError::InvalidConfig(format!(
                "broker {} is not declared in cluster {}",
                broker_id, self.cluster_name
            ))
        })?;
        self.render(broker, load_balancer_address, super_users)
    }

    /// Render the complete property file for `broker`
    pub fn render(
        &self,
        broker: &BrokerSpec,
        load_balancer_address: &str,
        super_users: &[String],
    ) -> Result<RenderedBrokerConfig> {
        if !(0..=MAX_BROKER_ID).contains(&broker.id) {
            return Err(OperatorError::InvalidConfig(format!(
                "broker id {} is outside 0-{}",
                broker.id, MAX_BROKER_ID
            )));
        }

        let listeners = &self.spec.listeners_config;
        validate_listeners(listeners, &self.spec.broker_ids())?;

        let internal = internal_listener_addresses(
            &listeners.internal_listeners,
            self.spec.addressing_mode(),
            self.cluster_name,
            self.namespace,
            broker.id,
            &self.settings.cluster_domain,
        );
        let external = external_listener_addresses(
            &listeners.external_listeners,
            load_balancer_address,
            broker.id,
        )?;

        let properties = Properties::new()
            .block(listener_config(listeners)?)
            .block(zookeeper_config(&self.spec.zk_addresses))
            .block(ssl_config(listeners, &self.settings))
            .block(metrics_reporter_ssl_config(listeners, &self.settings))
            .block(metrics_reporter_config(&internal, broker.id, &self.settings))
            .block(storage_config(broker, &self.settings))
            .block(advertised_listener_config(&external, &internal))
            .block(broker_overrides(&broker.config))
            .block(super_users_config(super_users));

        Ok(RenderedBrokerConfig {
            broker_id: broker.id,
            text: properties.render(),
        })
    }
}

/// Check the listener set before anything is rendered
///
/// Exactly one internal listener carries inter-broker traffic, names are
/// unique once uppercased, and every external listener has a starting port
/// whose per-broker range fits the port space without overlapping another.
pub fn validate_listeners(listeners: &ListenersConfig, broker_ids: &[i32]) -> Result<()> {
    inter_broker_listener(&listeners.internal_listeners)?;

    let mut names = HashSet::new();
    let all_names = listeners
        .internal_listeners
        .iter()
        .map(|l| &l.name)
        .chain(listeners.external_listeners.iter().map(|l| &l.name));
    for name in all_names {
        if !names.insert(name.to_uppercase()) {
            return Err(OperatorError::ListenerConfiguration(format!(
                "listener name {} is used more than once",
                name.to_uppercase()
            )));
        }
    }

    let min_id = broker_ids.iter().copied().min().unwrap_or(0);
    let max_id = broker_ids.iter().copied().max().unwrap_or(0);

    let mut ranges: Vec<(&str, i32, i32)> = Vec::new();
    for listener in &listeners.external_listeners {
        let start = listener.external_starting_port.ok_or_else(|| {
            OperatorError::ListenerConfiguration(format!(
                "external listener {} has no externalStartingPort",
                listener.name
            ))
        })?;
        let low = external_port(&listener.name, start, min_id)?;
        let high = external_port(&listener.name, start, max_id)?;
        if let Some((other, _, _)) = ranges
            .iter()
            .find(|(_, other_low, other_high)| low <= *other_high && *other_low <= high)
        {
            return Err(OperatorError::ListenerConfiguration(format!(
                "external listeners {} and {} have overlapping port ranges",
                other, listener.name
            )));
        }
        ranges.push((listener.name.as_str(), low, high));
    }

    Ok(())
}

/// The single internal listener used for inter-broker traffic
pub fn inter_broker_listener(
    listeners: &[InternalListenerConfig],
) -> Result<&InternalListenerConfig> {
    let mut marked = listeners
        .iter()
        .filter(|l| l.used_for_inner_broker_communication);

    match (marked.next(), marked.next()) {
        (Some(listener), None) => Ok(listener),
        (None, _) => Err(OperatorError::ListenerConfiguration(
            "no internal listener is marked usedForInnerBrokerCommunication".to_string(),
        )),
        (Some(first), Some(second)) => Err(OperatorError::ListenerConfiguration(format!(
            "only one internal listener may be used for inter-broker communication, found {} and {}",
            first.name, second.name
        ))),
    }
}

/// `listener.security.protocol.map`, `security.inter.broker.protocol` and `listeners`
pub fn listener_config(listeners: &ListenersConfig) -> Result<Vec<Property>> {
    let inter_broker = inter_broker_listener(&listeners.internal_listeners)?;

    let table: Vec<(String, &'static str, i32)> = listeners
        .internal_listeners
        .iter()
        .map(|l| (l.name.to_uppercase(), l.listener_type.protocol_name(), l.container_port))
        .chain(
            listeners
                .external_listeners
                .iter()
                .map(|l| (l.name.to_uppercase(), l.listener_type.protocol_name(), l.container_port)),
        )
        .collect();

    let protocol_map = table
        .iter()
        .map(|(name, protocol, _)| format!("{}:{}", name, protocol))
        .collect::<Vec<_>>()
        .join(",");
    let binds = table
        .iter()
        .map(|(name, _, port)| format!("{}://:{}", name, port))
        .collect::<Vec<_>>()
        .join(",");

    Ok(vec![
        Property::new("listener.security.protocol.map", protocol_map),
        Property::new(
            "security.inter.broker.protocol",
            inter_broker.listener_type.protocol_name(),
        ),
        Property::new("listeners", binds),
    ])
}

pub fn zookeeper_config(zk_addresses: &[String]) -> Vec<Property> {
    vec![Property::new("zookeeper.connect", zk_addresses.join(","))]
}

/// Broker keystore and truststore, only when TLS secrets are declared
pub fn ssl_config(listeners: &ListenersConfig, settings: &RenderSettings) -> Vec<Property> {
    if listeners.ssl_secrets.is_none() {
        return Vec::new();
    }
    vec![
        Property::new("ssl.keystore.location", &settings.keystore_location),
        Property::new("ssl.truststore.location", &settings.truststore_location),
        Property::new("ssl.client.auth", "required"),
    ]
}

/// TLS settings of the metrics reporter client; needs TLS secrets and an SSL internal listener
pub fn metrics_reporter_ssl_config(
    listeners: &ListenersConfig,
    settings: &RenderSettings,
) -> Vec<Property> {
    if !listeners.ssl_enabled_for_internal_communication() {
        return Vec::new();
    }
    vec![
        Property::new("cruise.control.metrics.reporter.security.protocol", "SSL"),
        Property::new(
            "cruise.control.metrics.reporter.ssl.truststore.location",
            &settings.client_truststore_location,
        ),
        Property::new(
            "cruise.control.metrics.reporter.ssl.keystore.location",
            &settings.client_keystore_location,
        ),
    ]
}

pub fn metrics_reporter_config(
    internal_addresses: &[String],
    broker_id: i32,
    settings: &RenderSettings,
) -> Vec<Property> {
    vec![
        Property::new("metric.reporters", &settings.metric_reporter_class),
        Property::new(
            "cruise.control.metrics.reporter.bootstrap.servers",
            internal_addresses.join(","),
        ),
        Property::new("broker.id", broker_id.to_string()),
    ]
}

pub fn storage_config(broker: &BrokerSpec, settings: &RenderSettings) -> Vec<Property> {
    let dirs = broker
        .storage_configs
        .iter()
        .map(|s| format!("{}/{}", s.mount_path.trim_end_matches('/'), settings.log_dir_subdirectory))
        .collect::<Vec<_>>()
        .join(",");
    vec![Property::new("log.dirs", dirs)]
}

pub fn advertised_listener_config(external: &[String], internal: &[String]) -> Vec<Property> {
    let all = external
        .iter()
        .chain(internal.iter())
        .cloned()
        .collect::<Vec<_>>()
        .join(",");
    vec![Property::new("advertised.listeners", all)]
}

/// Per-broker overrides in key order
pub fn broker_overrides(config: &BTreeMap<String, String>) -> Vec<Property> {
    config
        .iter()
        .map(|(k, v)| Property::new(k.as_str(), v.as_str()))
        .collect()
}

pub fn super_users_config(super_users: &[String]) -> Vec<Property> {
    let principals = super_users
        .iter()
        .map(|u| user_principal(u))
        .collect::<Vec<_>>()
        .join(";");
    vec![Property::new("super.users", principals)]
}

/// In-cluster host name of a broker
pub fn internal_broker_host(
    mode: ClusterAddressingMode,
    cluster_name: &str,
    namespace: &str,
    broker_id: i32,
    cluster_domain: &str,
) -> String {
    match mode {
        ClusterAddressingMode::HeadlessDns => format!(
            "{cluster}-{id}.{cluster}-headless.{ns}.svc.{domain}",
            cluster = cluster_name,
            id = broker_id,
            ns = namespace,
            domain = cluster_domain
        ),
        ClusterAddressingMode::ClusterServiceDns => format!(
            "{}-{}.{}.svc.{}",
            cluster_name, broker_id, namespace, cluster_domain
        ),
    }
}

/// `NAME://host:port` of every internal listener of a broker
///
/// Shared by `advertised.listeners` and the metrics reporter bootstrap list.
pub fn internal_listener_addresses(
    listeners: &[InternalListenerConfig],
    mode: ClusterAddressingMode,
    cluster_name: &str,
    namespace: &str,
    broker_id: i32,
    cluster_domain: &str,
) -> Vec<String> {
    let host = internal_broker_host(mode, cluster_name, namespace, broker_id, cluster_domain);
    listeners
        .iter()
        .map(|l| format!("{}://{}:{}", l.name.to_uppercase(), host, l.container_port))
        .collect()
}

/// `NAME://loadBalancer:(externalStartingPort + brokerId)` of every external listener
pub fn external_listener_addresses(
    listeners: &[ExternalListenerConfig],
    load_balancer_address: &str,
    broker_id: i32,
) -> Result<Vec<String>> {
    if !listeners.is_empty() && load_balancer_address.is_empty() {
        return Err(OperatorError::ListenerConfiguration(
            "external listeners need a resolved load balancer address".to_string(),
        ));
    }
    listeners
        .iter()
        .map(|l| {
            let start = l.external_starting_port.ok_or_else(|| {
                OperatorError::ListenerConfiguration(format!(
                    "external listener {} has no externalStartingPort",
                    l.name
                ))
            })?;
            Ok(format!(
                "{}://{}:{}",
                l.name.to_uppercase(),
                load_balancer_address,
                external_port(&l.name, start, broker_id)?
            ))
        })
        .collect()
}

/// `start + broker_id`, which must be a valid port
fn external_port(listener: &str, start: i32, broker_id: i32) -> Result<i32> {
    start
        .checked_add(broker_id)
        .filter(|port| (1..=MAX_PORT).contains(port))
        .ok_or_else(|| {
            OperatorError::ListenerConfiguration(format!(
                "external listener {} has no valid port for broker {} from start {} (allowed 1-{})",
                listener, broker_id, start, MAX_PORT
            ))
        })
}
