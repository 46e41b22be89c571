//! Kafka Operator CLI
//!
//! Prints the custom resource definitions and renders broker configs from a
//! KafkaCluster manifest.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kafka_operator::broker_config::BrokerConfigGenerator;
use kafka_operator::crd::{KafkaCluster, KafkaTopic, KafkaUser};
use kafka_operator::resources::ResourceBuilder;
use std::path::{Path, PathBuf};
use tracing::{debug, Level};
use tracing_subscriber::fmt::format::FmtSpan;

/// Kafka Operator
#[derive(Parser, Debug)]
#[command(name = "kafka-operator")]
#[command(about = "Topic, ACL and broker configuration management for Kafka on Kubernetes")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: Level,

    /// Enable JSON log format
    #[arg(long, env = "LOG_JSON", default_value = "false", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print CRD YAML for installation
    Crd,

    /// Render the config of one broker
    Render {
        /// KafkaCluster manifest (YAML)
        #[arg(long, env = "KAFKA_CLUSTER_MANIFEST")]
        cluster: PathBuf,

        /// Broker id
        #[arg(long)]
        broker: i32,

        /// Resolved load balancer address for external listeners
        #[arg(long, env = "LOAD_BALANCER_ADDRESS", default_value = "")]
        load_balancer: String,

        /// Super user identity (repeatable)
        #[arg(long = "super-user")]
        super_users: Vec<String>,

        /// Print the ConfigMap instead of the bare property file
        #[arg(long)]
        configmap: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    match args.command {
        Command::Crd => print_crds(),
        Command::Render {
            cluster,
            broker,
            load_balancer,
            super_users,
            configmap,
        } => render(&cluster, broker, &load_balancer, &super_users, configmap),
    }
}

/// Initialize logging subsystem; logs go to stderr so rendered output stays clean
fn init_logging(args: &Args) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Print the CRD YAML for installation
fn print_crds() -> Result<()> {
    use kube::CustomResourceExt;

    let crds = [KafkaCluster::crd(), KafkaTopic::crd(), KafkaUser::crd()];
    for crd in &crds {
        let yaml = serde_yaml::to_string(crd).context("Failed to serialize CRD")?;
        println!("---\n{}", yaml.trim_end());
    }

    Ok(())
}

fn render(
    path: &Path,
    broker: i32,
    load_balancer: &str,
    super_users: &[String],
    configmap: bool,
) -> Result<()> {
    use validator::Validate;

    let manifest = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let cluster: KafkaCluster =
        serde_yaml::from_str(&manifest).context("Failed to parse KafkaCluster manifest")?;
    cluster
        .spec
        .validate()
        .context("KafkaCluster manifest is invalid")?;

    debug!(broker, path = %path.display(), "Rendering broker config");

    if configmap {
        let cm = ResourceBuilder::new(&cluster)?.build_broker_configmap(
            broker,
            load_balancer,
            super_users,
        )?;
        print!("{}", serde_yaml::to_string(&cm)?);
    } else {
        let rendered = BrokerConfigGenerator::for_cluster(&cluster)?.render_broker(
            broker,
            load_balancer,
            super_users,
        )?;
        print!("{}", rendered);
    }

    Ok(())
}
