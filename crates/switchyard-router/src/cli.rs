//! CLI module for switchyard-router.
//!
//! This module provides the command-line interface that can be used either
//! as a standalone binary or as a subcommand of the main switchyard CLI.

use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use switchyard_config::{
    CliOverrides, Config, LoggingConfig, apply_overrides, load_config, validate_config,
};
use switchyard_core::defaults::{DEFAULT_LOG_FORMAT, DEFAULT_LOG_LEVEL, DEFAULT_LOG_OUTPUT};
use switchyard_dns::{DnsConfig, DnsResolver, DnsStrategy};
use switchyard_rules::{InboundType, Metadata, Network};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::RouterError;
use crate::router::{Router, run_with_shutdown};
use crate::rules::build_rule_list;
use crate::CancellationToken;

/// Router CLI arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "switchyard-router",
    version,
    about = "Rule-based connection routing"
)]
pub struct RouterArgs {
    #[command(subcommand)]
    pub command: RouterCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum RouterCommand {
    /// Load, validate and build the configuration, then print a summary.
    Check(ConfigArgs),
    /// Route a single connection descriptor and print the decision.
    Match(Box<MatchArgs>),
    /// Load the configuration, refresh providers in the background and
    /// reload on SIGHUP until SIGINT/SIGTERM.
    Run(ConfigArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Config file path (json/jsonc/yaml/toml)
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    #[command(flatten)]
    pub overrides: CliOverrides,
}

#[derive(Args, Debug, Clone)]
pub struct MatchArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Destination host name
    #[arg(long)]
    pub host: Option<String>,
    /// Destination IP address
    #[arg(long)]
    pub dst_ip: Option<IpAddr>,
    /// Destination port
    #[arg(long, default_value_t = 443)]
    pub dst_port: u16,
    /// Transport (tcp/udp)
    #[arg(long, default_value = "tcp")]
    pub network: Network,
    /// Source IP address
    #[arg(long)]
    pub src_ip: Option<IpAddr>,
    /// Source port
    #[arg(long, default_value_t = 0)]
    pub src_port: u16,
    /// Local port the connection arrived on
    #[arg(long, default_value_t = 0)]
    pub in_port: u16,
    /// Inbound type (e.g. HTTP, SOCKS5, TUN)
    #[arg(long)]
    pub in_type: Option<String>,
    /// Inbound listener name
    #[arg(long)]
    pub in_name: Option<String>,
    /// Authenticated inbound user
    #[arg(long)]
    pub in_user: Option<String>,
    /// Process name owning the connection
    #[arg(long)]
    pub process: Option<String>,
    /// Full process path owning the connection
    #[arg(long)]
    pub process_path: Option<String>,
    /// UID owning the connection
    #[arg(long)]
    pub uid: Option<u32>,
    /// DSCP value (0-63)
    #[arg(long, default_value_t = 0)]
    pub dscp: u8,
    /// Never resolve; IP rules only see --dst-ip
    #[arg(long)]
    pub offline: bool,
    /// Print the decision as JSON
    #[arg(long)]
    pub json: bool,
}

impl MatchArgs {
    /// Build the connection descriptor described by the flags.
    pub fn metadata(&self) -> Result<Metadata, RouterError> {
        if self.host.is_none() && self.dst_ip.is_none() {
            return Err(RouterError::InvalidArgument(
                "one of --host or --dst-ip is required".into(),
            ));
        }
        if self.dscp > switchyard_core::defaults::MAX_DSCP {
            return Err(RouterError::InvalidArgument(format!(
                "--dscp must be 0..={}",
                switchyard_core::defaults::MAX_DSCP
            )));
        }
        let inbound_type = match &self.in_type {
            Some(s) => InboundType::parse_group(s)?
                .first()
                .copied()
                .unwrap_or_default(),
            None => InboundType::default(),
        };
        Ok(Metadata {
            network: self.network,
            inbound_type,
            src_ip: self.src_ip,
            dst_ip: self.dst_ip,
            src_port: self.src_port,
            dst_port: self.dst_port,
            in_port: self.in_port,
            host: self.host.clone(),
            process: self.process.clone(),
            process_path: self.process_path.clone(),
            uid: self.uid,
            dscp: self.dscp,
            in_name: self.in_name.clone(),
            in_user: self.in_user.clone(),
            ..Default::default()
        })
    }
}

/// Run the router CLI with the given arguments.
///
/// This is the main entry point for the router CLI, used by both the
/// standalone binary and the unified switchyard CLI.
pub async fn run(args: RouterArgs) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        RouterCommand::Check(args) => check(args).await,
        RouterCommand::Match(args) => match_once(*args).await,
        RouterCommand::Run(args) => serve(args).await,
    }
}

fn load(args: &ConfigArgs) -> Result<Config, RouterError> {
    let mut config = load_config(&args.config)?;
    apply_overrides(&mut config, &args.overrides);
    validate_config(&config)?;
    Ok(config)
}

/// Convert the `dns` section into resolver configuration.
pub fn dns_config(config: &switchyard_config::DnsConfig) -> Result<DnsConfig, RouterError> {
    Ok(DnsConfig {
        strategy: config.strategy.parse::<DnsStrategy>()?,
        servers: config.servers.clone(),
        prefer_ipv4: config.prefer_ipv4,
        cache_size: config.cache_size,
    })
}

async fn check(args: ConfigArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load(&args)?;
    init_tracing(&config.logging);

    let list = build_rule_list(&config).await?;
    println!("configuration ok: {}", args.config.display());
    println!("  rules:           {}", list.rule_count());
    println!("  sub-rule groups: {}", list.sub_rule_group_count());
    println!("  providers:       {}", list.provider_count());
    let mut providers: Vec<_> = list.providers().map(|p| p.info()).collect();
    providers.sort_by(|a, b| a.name.cmp(&b.name));
    for info in providers {
        println!(
            "    {} ({}, {}, {}): {} entries",
            info.name, info.vehicle, info.behavior, info.format, info.rule_count
        );
    }
    if list.should_find_process() {
        println!("  process lookup:  required");
    }
    Ok(())
}

async fn match_once(args: MatchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load(&args.config)?;
    init_tracing(&config.logging);

    let mut meta = args.metadata()?;
    if args.offline {
        meta.dns_resolved = true;
    }
    let resolver = DnsResolver::new(&dns_config(&config.dns)?)?;
    let router = Router::new(build_rule_list(&config).await?, Arc::new(resolver));
    let route = router.route(&mut meta).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&route)?);
        return Ok(());
    }
    println!("destination: {}", meta.remote_address());
    if let Some(ip) = route.resolved_ip {
        println!("resolved:    {ip}");
    }
    match &route.rule {
        Some(rule) => println!(
            "rule:        #{} {},{}",
            rule.index, rule.rule_type, rule.payload
        ),
        None => println!("rule:        (none matched)"),
    }
    println!("target:      {}", route.target);
    Ok(())
}

async fn serve(args: ConfigArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load(&args)?;
    init_tracing(&config.logging);

    if let Some(listen) = &config.metrics.listen {
        match switchyard_metrics::init_prometheus(listen) {
            Ok(()) => info!("metrics exporter listening on {}", listen),
            Err(e) => warn!("failed to start metrics exporter: {}", e),
        }
    }

    let resolver = DnsResolver::new(&dns_config(&config.dns)?)?;
    let router = Arc::new(Router::new(
        build_rule_list(&config).await?,
        Arc::new(resolver),
    ));

    // Set up graceful shutdown on SIGTERM/SIGINT
    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();

    tokio::spawn(async move {
        shutdown_signal_handler().await;
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    // Set up SIGHUP handler for config reload
    #[cfg(unix)]
    {
        let router = router.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = reload_signal_handler(args, router) => {}
                _ = shutdown.cancelled() => {}
            }
        });
    }

    run_with_shutdown(router, shutdown).await;
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            // Fall back to waiting forever
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                // Fall back to waiting forever
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Handle SIGHUP for config reload (Unix only).
#[cfg(unix)]
async fn reload_signal_handler(args: ConfigArgs, router: Arc<Router>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(sig) => sig,
        Err(e) => {
            warn!(
                "failed to install SIGHUP handler: {}, config reload disabled",
                e
            );
            return;
        }
    };

    loop {
        sighup.recv().await;
        info!("SIGHUP received, reloading configuration");

        match reload_config(&args, &router).await {
            Ok(()) => {
                switchyard_metrics::record_rule_list_reload(switchyard_metrics::UPDATE_UPDATED);
                info!("configuration reloaded successfully");
            }
            Err(e) => {
                switchyard_metrics::record_rule_list_reload(e.error_type());
                warn!("failed to reload configuration, keeping current rules: {}", e);
            }
        }
    }
}

/// Rebuild the rule list from the config file and swap it in.
///
/// Logging settings are not reapplied; they require a restart.
#[cfg(unix)]
async fn reload_config(args: &ConfigArgs, router: &Router) -> Result<(), RouterError> {
    let config = load(args)?;
    let list = build_rule_list(&config).await?;
    router.reload(list);
    Ok(())
}

/// Initialize tracing subscriber with the given logging configuration.
///
/// Supports:
/// - `level`: Base log level (trace, debug, info, warn, error)
/// - `format`: Output format (json, pretty, compact). Default: pretty
/// - `output`: Output target (stdout, stderr). Default: stderr
/// - `filters`: Per-module log level overrides
pub fn init_tracing(config: &LoggingConfig) {
    // Build the env filter from base level and per-module filters
    let base_level = config.level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL);
    let mut filter_str = base_level.to_string();

    for (module, level) in &config.filters {
        filter_str.push(',');
        filter_str.push_str(module);
        filter_str.push('=');
        filter_str.push_str(level);
    }

    let filter =
        EnvFilter::try_new(&filter_str).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    let format = config.format.as_deref().unwrap_or(DEFAULT_LOG_FORMAT);
    let output = config.output.as_deref().unwrap_or(DEFAULT_LOG_OUTPUT);

    // try_init: a second call (e.g. from tests) keeps the first subscriber.
    let _ = match (format, output) {
        ("json", "stdout") => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(io::stdout))
            .try_init(),
        ("json", _) => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(io::stderr))
            .try_init(),
        ("compact", "stdout") => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_writer(io::stdout))
            .try_init(),
        ("compact", _) => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_writer(io::stderr))
            .try_init(),
        // pretty is default
        (_, "stdout") => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(io::stdout))
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(io::stderr))
            .try_init(),
    };
}
