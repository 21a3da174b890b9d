//! Configuration validation logic.

use std::net::{IpAddr, SocketAddr};

use crate::Config;
use crate::defaults::min_provider_interval_secs;
use crate::loader::ConfigError;
use crate::types::RuleProviderConfig;

const VEHICLES: [&str; 3] = ["file", "http", "inline"];
const BEHAVIORS: [&str; 4] = ["domain", "ipcidr", "ip-cidr", "classical"];
const FORMATS: [&str; 7] = ["yaml", "yml", "text", "txt", "list", "binary", "mrs"];
const GEO_MODES: [&str; 2] = ["mmdb", "geodata"];
const DNS_STRATEGIES: [&str; 2] = ["system", "custom"];
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];
const LOG_OUTPUTS: [&str; 2] = ["stderr", "stdout"];

fn one_of(field: &str, value: &str, allowed: &[&str]) -> Result<(), ConfigError> {
    if allowed.iter().any(|a| a.eq_ignore_ascii_case(value)) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "{field} must be one of: {allowed:?}"
        )))
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    for (i, line) in config.rules.iter().enumerate() {
        if line.trim().is_empty() {
            return Err(ConfigError::Validation(format!("rules[{i}] is empty")));
        }
    }
    for (name, lines) in &config.sub_rules {
        if name.trim().is_empty() {
            return Err(ConfigError::Validation("sub-rules: empty group name".into()));
        }
        if lines.iter().any(|l| l.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "sub-rules.{name} contains an empty line"
            )));
        }
    }
    for (name, provider) in &config.rule_providers {
        if name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "rule-providers: empty provider name".into(),
            ));
        }
        validate_provider(name, provider)?;
    }
    for (i, proxy) in config.proxies.iter().enumerate() {
        if proxy.trim().is_empty() {
            return Err(ConfigError::Validation(format!("proxies[{i}] is empty")));
        }
    }

    one_of("geo.mode", &config.geo.mode, &GEO_MODES)?;
    if let Some(addr) = &config.geo.fake_broadcast
        && addr.parse::<IpAddr>().is_err()
    {
        return Err(ConfigError::Validation(format!(
            "geo.fake-broadcast is not an IP address: {addr}"
        )));
    }
    if config.geo.geodata_dir.trim().is_empty() {
        return Err(ConfigError::Validation("geo.geodata-dir is empty".into()));
    }

    one_of("dns.strategy", &config.dns.strategy, &DNS_STRATEGIES)?;
    if config.dns.strategy.eq_ignore_ascii_case("custom") && config.dns.servers.is_empty() {
        return Err(ConfigError::Validation(
            "dns.servers is required with the custom strategy".into(),
        ));
    }
    if config.dns.cache_size == 0 {
        return Err(ConfigError::Validation("dns.cache-size must be > 0".into()));
    }

    if let Some(level) = &config.logging.level {
        one_of("logging.level", level, &LOG_LEVELS)?;
    }
    if let Some(format) = &config.logging.format {
        one_of("logging.format", format, &LOG_FORMATS)?;
    }
    if let Some(output) = &config.logging.output {
        one_of("logging.output", output, &LOG_OUTPUTS)?;
    }

    if let Some(listen) = &config.metrics.listen
        && listen.parse::<SocketAddr>().is_err()
    {
        return Err(ConfigError::Validation(format!(
            "metrics.listen is not a socket address: {listen}"
        )));
    }
    Ok(())
}

fn validate_provider(name: &str, p: &RuleProviderConfig) -> Result<(), ConfigError> {
    let field = |f: &str| format!("rule-providers.{name}.{f}");
    one_of(&field("type"), &p.vehicle, &VEHICLES)?;
    one_of(&field("behavior"), &p.behavior, &BEHAVIORS)?;
    one_of(&field("format"), &p.format, &FORMATS)?;

    let binary = matches!(p.format.to_ascii_lowercase().as_str(), "binary" | "mrs");
    let ipcidr = matches!(p.behavior.to_ascii_lowercase().as_str(), "ipcidr" | "ip-cidr");
    if binary && !ipcidr {
        return Err(ConfigError::Validation(format!(
            "{}: binary format requires the ipcidr behavior",
            field("format")
        )));
    }
    if p.interval != 0 && p.interval < min_provider_interval_secs() {
        return Err(ConfigError::Validation(format!(
            "{} must be 0 or >= {}",
            field("interval"),
            min_provider_interval_secs()
        )));
    }

    match p.vehicle.to_ascii_lowercase().as_str() {
        "file" => {
            if p.path.as_deref().unwrap_or("").trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "{} is required for file providers",
                    field("path")
                )));
            }
        }
        "http" => {
            let url = p.url.as_deref().unwrap_or("");
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Validation(format!(
                    "{} must be an http(s) URL",
                    field("url")
                )));
            }
            if p.timeout == 0 {
                return Err(ConfigError::Validation(format!(
                    "{} must be > 0",
                    field("timeout")
                )));
            }
        }
        _ => {
            if p.payload.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "{} is required for inline providers",
                    field("payload")
                )));
            }
            if binary {
                return Err(ConfigError::Validation(format!(
                    "{}: inline providers carry text entries",
                    field("format")
                )));
            }
        }
    }
    Ok(())
}
