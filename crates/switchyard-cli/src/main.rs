use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod logging;

use commands::HealthArg;
use logging::LogFormat;

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(about = "Switchyard CLI - service discovery and shared configuration", long_about = None)]
struct Cli {
    /// Consul agent HTTP address
    #[arg(
        long,
        global = true,
        env = "CONSUL_HTTP_ADDR",
        default_value = "http://127.0.0.1:8500"
    )]
    consul_addr: String,

    /// Consul ACL token
    #[arg(long, global = true, env = "CONSUL_HTTP_TOKEN", hide_env_values = true)]
    consul_token: Option<String>,

    /// Path to switchyard.toml (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a service instance
    Register {
        /// Logical service name shared by all instances
        name: String,
        #[arg(long)]
        address: String,
        #[arg(long)]
        port: u16,
        /// Instance id (defaults to NAME-ADDRESS-PORT)
        #[arg(long)]
        id: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long = "capability")]
        capabilities: Vec<String>,
        /// Metadata as key=value, repeatable
        #[arg(long = "meta", value_parser = commands::parse_key_value)]
        metadata: Vec<(String, String)>,
        /// Attach a TTL health check with this many seconds
        #[arg(long)]
        ttl_check: Option<u64>,
    },
    /// Remove a service instance
    Deregister { service_id: String },
    /// List healthy instances of a service
    Discover {
        name: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long = "capability")]
        capabilities: Vec<String>,
    },
    /// List every known service with its tags
    Services,
    /// Show the health summary of a service, or report the health of one instance
    Health {
        name: String,
        /// Report this status for the instance id given as NAME
        #[arg(long, value_enum)]
        report: Option<HealthArg>,
    },
    /// Stream instance changes of a service until interrupted
    Watch { name: String },
    /// Shared configuration in the registry KV namespace
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print a value
    Get { key: String },
    /// Write a value
    Set {
        key: String,
        value: String,
        /// Only write if the key is still at this version (0 = must not exist)
        #[arg(long)]
        expected_version: Option<u64>,
    },
    /// Remove a key
    Delete { key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    let facade = commands::connect(
        &cli.consul_addr,
        cli.consul_token.as_deref(),
        cli.config.as_deref(),
    )?;

    match cli.command {
        Commands::Register {
            name,
            address,
            port,
            id,
            tags,
            capabilities,
            metadata,
            ttl_check,
        } => {
            let args = commands::service::RegisterArgs {
                name,
                address,
                port,
                id,
                tags,
                capabilities,
                metadata,
                ttl_check,
            };
            commands::service::register(&facade, args).await?
        }
        Commands::Deregister { service_id } => {
            commands::service::deregister(&facade, &service_id).await?
        }
        Commands::Discover {
            name,
            tags,
            capabilities,
        } => commands::service::discover(&facade, &name, tags, capabilities).await?,
        Commands::Services => commands::service::services(&facade).await?,
        Commands::Health { name, report } => match report {
            Some(status) => commands::service::report_health(&facade, &name, status).await?,
            None => commands::service::health(&facade, &name).await?,
        },
        Commands::Watch { name } => commands::service::watch(&facade, &name).await?,
        Commands::Config { action } => match action {
            ConfigAction::Get { key } => commands::config::get(&facade, &key).await?,
            ConfigAction::Set {
                key,
                value,
                expected_version,
            } => commands::config::set(&facade, &key, &value, expected_version).await?,
            ConfigAction::Delete { key } => commands::config::delete(&facade, &key).await?,
        },
    }

    Ok(())
}
