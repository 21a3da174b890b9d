//! Bridge between switchyard-config and switchyard-rules.
//!
//! Converts configuration into a compiled [`RuleList`]: geo collaborators,
//! rule providers (loaded concurrently) and the ordered rule lines.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use switchyard_config::{Config, GeoConfig, RuleProviderConfig};
use switchyard_core::defaults::DEFAULT_PROVIDER_CACHE_DIR;
use switchyard_rules::geo::{
    AsnLookup, CountryLookup, DirGeoDataLoader, GeoMatcherCache, GeoMode, GeoipDb, LanClassifier,
};
use switchyard_rules::mac::ArpTable;
use switchyard_rules::parser::PayloadFormat;
use switchyard_rules::provider::{
    FileVehicle, HttpVehicle, InlineVehicle, ProviderEvent, Vehicle,
};
use switchyard_rules::{
    Behavior, ParseContext, ProviderMap, RuleList, RuleListBuilder, RuleProvider, RulesError,
};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::error::RouterError;

/// Build the parse context (geo backends, LAN classifier, ARP lookup).
///
/// A configured MaxMind database that fails to open is logged and left
/// out; GEOIP rules in mmdb mode then never match.
pub fn build_context(geo: &GeoConfig) -> Result<ParseContext, RouterError> {
    let geo_mode: GeoMode = geo.mode.parse()?;
    let fake_broadcast = geo
        .fake_broadcast
        .as_deref()
        .map(|s| {
            s.parse::<IpAddr>().map_err(|e| {
                RouterError::InvalidArgument(format!("geo.fake-broadcast '{s}': {e}"))
            })
        })
        .transpose()?;

    let country = geo.mmdb_path.as_deref().and_then(open_mmdb);
    let asn = match geo.asn_path.as_deref() {
        Some(path) => open_mmdb(path),
        None => country.clone(),
    };

    Ok(ParseContext {
        geo_mode,
        geo_cache: Some(Arc::new(GeoMatcherCache::new(Arc::new(
            DirGeoDataLoader::new(&geo.geodata_dir),
        )))),
        country: country.clone().map(|db| db as Arc<dyn CountryLookup>),
        asn: asn.map(|db| db as Arc<dyn AsnLookup>),
        lan: LanClassifier::new(fake_broadcast),
        mac: Some(Arc::new(ArpTable::default())),
    })
}

fn open_mmdb(path: &str) -> Option<Arc<GeoipDb>> {
    match GeoipDb::from_file(Path::new(path)) {
        Ok(db) => {
            info!(path = %path, database_type = %db.database_type(), "GeoIP database loaded");
            Some(Arc::new(db))
        }
        Err(e) => {
            warn!(path = %path, error = %e, "GeoIP database not available");
            None
        }
    }
}

/// Default on-disk cache location for an HTTP provider without `path`.
pub fn default_cache_path(name: &str, format: PayloadFormat) -> PathBuf {
    let ext = match format {
        PayloadFormat::Yaml => "yaml",
        PayloadFormat::Text => "txt",
        PayloadFormat::Binary => "mrs",
    };
    Path::new(DEFAULT_PROVIDER_CACHE_DIR).join(format!("{name}.{ext}"))
}

/// Create (but do not load) a provider from its configuration.
///
/// The provider reports every refresh to the metrics recorder.
pub fn build_provider(
    name: &str,
    cfg: &RuleProviderConfig,
    ctx: &ParseContext,
) -> Result<Arc<RuleProvider>, RouterError> {
    let wrap = |source: RulesError| RouterError::Provider {
        name: name.to_string(),
        source,
    };
    let behavior: Behavior = cfg.behavior.parse().map_err(wrap)?;
    let mut format: PayloadFormat = cfg.format.parse().map_err(wrap)?;
    let mut interval = Duration::from_secs(cfg.interval);

    let vehicle: Arc<dyn Vehicle> = match cfg.vehicle.to_ascii_lowercase().as_str() {
        "file" => {
            let path = cfg.path.as_deref().ok_or_else(|| {
                wrap(RulesError::Provider("path is required for file providers".into()))
            })?;
            Arc::new(FileVehicle::new(path))
        }
        "http" => {
            let url = cfg.url.as_deref().ok_or_else(|| {
                wrap(RulesError::Provider("url is required for http providers".into()))
            })?;
            let cache_path = cfg
                .path
                .as_deref()
                .map(PathBuf::from)
                .unwrap_or_else(|| default_cache_path(name, format));
            let headers: Vec<(String, String)> = cfg
                .header
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Arc::new(
                HttpVehicle::with_options(
                    url,
                    Some(cache_path),
                    Duration::from_secs(cfg.timeout),
                    &headers,
                )
                .map_err(wrap)?,
            )
        }
        "inline" => {
            // Entries are stored as text lines and only change with the
            // configuration itself.
            format = PayloadFormat::Text;
            interval = Duration::ZERO;
            Arc::new(InlineVehicle::from_entries(&cfg.payload))
        }
        other => {
            return Err(wrap(RulesError::Provider(format!(
                "unsupported provider type: {other}"
            ))));
        }
    };

    let provider = Arc::new(RuleProvider::new(
        name,
        behavior,
        format,
        interval,
        vehicle,
        ctx.clone(),
    ));
    provider.set_update_hook(Arc::new(|event: ProviderEvent<'_>| {
        switchyard_metrics::record_provider_update(event.provider, event.result);
        switchyard_metrics::set_provider_rules(event.provider, event.rules);
    }));
    Ok(provider)
}

/// Create every configured provider and run their initial loads concurrently.
///
/// Any failed initial load fails the whole build.
pub async fn load_providers(
    config: &Config,
    ctx: &ParseContext,
) -> Result<ProviderMap, RouterError> {
    let mut tasks = JoinSet::new();
    for (name, cfg) in &config.rule_providers {
        let provider = build_provider(name, cfg, ctx)?;
        tasks.spawn(async move {
            let result = provider.initial().await;
            (provider, result)
        });
    }

    let mut providers = ProviderMap::default();
    while let Some(joined) = tasks.join_next().await {
        let (provider, result) = joined.map_err(|e| {
            RouterError::Rules(RulesError::Provider(format!("provider load task failed: {e}")))
        })?;
        let rules = result.map_err(|source| RouterError::Provider {
            name: provider.name().to_string(),
            source,
        })?;
        switchyard_metrics::set_provider_rules(provider.name(), rules);
        providers.insert(provider.name().to_string(), provider);
    }
    Ok(providers)
}

/// Build a rule list from configuration: context, providers, sub-rule
/// groups and rules, with targets checked against `proxies`.
///
/// Providers are loaded but not started.
pub async fn build_rule_list(config: &Config) -> Result<RuleList, RouterError> {
    let ctx = build_context(&config.geo)?;
    let providers = load_providers(config, &ctx).await?;
    let list = RuleListBuilder::new(&ctx)
        .providers(providers)
        .sub_rule_groups(config.sub_rules.clone())
        .adapters(config.proxies.iter().cloned())
        .build(&config.rules)?;
    info!(
        rules = list.rule_count(),
        providers = list.provider_count(),
        sub_rule_groups = list.sub_rule_group_count(),
        "rule list built"
    );
    Ok(list)
}
