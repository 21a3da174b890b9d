//! Loading geo category lists.

use std::path::{Path, PathBuf};

use ipnet::IpNet;
use switchyard_core::{GEODATA_EXTENSION, GEODATA_GEOIP_DIR, GEODATA_GEOSITE_DIR};

use crate::error::RulesError;
use crate::matcher::parse_cidr;

/// One GEOSITE list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeoSiteEntry {
    /// `full:name`: the name only.
    Full(String),
    /// `domain:name` or a bare name: the name and its sub-domains.
    Domain(String),
    /// `keyword:text`: any name containing the text.
    Keyword(String),
    /// `regexp:pattern`.
    Regex(String),
}

impl GeoSiteEntry {
    /// Parse a v2ray-style list line. Attributes after `@` are ignored.
    pub fn parse(line: &str) -> Result<Self, RulesError> {
        let line = line.trim();
        let line = match line.split_once(" @") {
            Some((entry, _attrs)) => entry.trim_end(),
            None => line,
        };
        let (kind, value) = match line.split_once(':') {
            Some((kind, value)) if !value.is_empty() => (kind, value.trim()),
            _ => ("domain", line),
        };
        if value.is_empty() {
            return Err(RulesError::GeoData("empty geosite entry".into()));
        }
        match kind {
            "full" => Ok(Self::Full(value.to_string())),
            "domain" => Ok(Self::Domain(value.to_string())),
            "keyword" => Ok(Self::Keyword(value.to_string())),
            "regexp" => Ok(Self::Regex(value.to_string())),
            other => Err(RulesError::GeoData(format!(
                "unknown geosite entry type '{other}'"
            ))),
        }
    }
}

/// Source of geo category lists.
///
/// Codes passed in are lower-case and carry no `!` prefix.
pub trait GeoDataLoader: Send + Sync {
    fn load_geoip(&self, code: &str) -> Result<Vec<IpNet>, RulesError>;
    fn load_geosite(&self, code: &str) -> Result<Vec<GeoSiteEntry>, RulesError>;
}

/// Loader reading `<root>/geoip/<code>.txt` and `<root>/geosite/<code>.txt`.
///
/// Files hold one entry per line; blank lines and `#` comments are skipped.
#[derive(Debug, Clone)]
pub struct DirGeoDataLoader {
    root: PathBuf,
}

impl DirGeoDataLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn category_path(&self, dir: &str, code: &str) -> Result<PathBuf, RulesError> {
        let valid = !code.is_empty()
            && code
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'@'));
        if !valid {
            return Err(RulesError::GeoData(format!("invalid category code '{code}'")));
        }
        Ok(self
            .root
            .join(dir)
            .join(format!("{code}.{GEODATA_EXTENSION}")))
    }

    fn read_lines(&self, path: &Path) -> Result<Vec<String>, RulesError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RulesError::GeoData(format!("failed to read {}: {e}", path.display()))
        })?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect())
    }
}

impl GeoDataLoader for DirGeoDataLoader {
    fn load_geoip(&self, code: &str) -> Result<Vec<IpNet>, RulesError> {
        let path = self.category_path(GEODATA_GEOIP_DIR, code)?;
        self.read_lines(&path)?
            .iter()
            .map(|line| parse_cidr(line))
            .collect()
    }

    fn load_geosite(&self, code: &str) -> Result<Vec<GeoSiteEntry>, RulesError> {
        let path = self.category_path(GEODATA_GEOSITE_DIR, code)?;
        self.read_lines(&path)?
            .iter()
            .map(|line| GeoSiteEntry::parse(line))
            .collect()
    }
}
