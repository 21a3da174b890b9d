//! Source MAC address lookup for SRC-MAC rules.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use regex::Regex;
use rustc_hash::FxHashMap;
use switchyard_core::{DEFAULT_ARP_CACHE_TTL_SECS, DEFAULT_ARP_TABLE_PATH};
use tracing::{debug, warn};

static MAC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[0-9a-fA-F]{2}[:-]){5}[0-9a-fA-F]{2}$").unwrap_or_else(|_| unreachable!())
});

/// Resolves the hardware address of a neighbor on the local segment.
pub trait MacLookup: Send + Sync {
    /// Lower-case colon form (`aa:bb:cc:dd:ee:ff`), or `None` when unknown.
    fn lookup(&self, ip: IpAddr) -> Option<String>;
}

/// Normalize a MAC literal to lower-case colon form.
pub fn normalize_mac(mac: &str) -> Option<String> {
    let mac = mac.trim();
    if !MAC_RE.is_match(mac) {
        return None;
    }
    Some(mac.replace('-', ":").to_ascii_lowercase())
}

/// Neighbor table read from a Linux `/proc/net/arp`-style file.
///
/// The parsed table is reused for a TTL; a miss forces one re-read so new
/// neighbors are picked up without waiting for expiry.
pub struct ArpTable {
    path: PathBuf,
    ttl: Duration,
    state: RwLock<Option<(Instant, FxHashMap<IpAddr, String>)>>,
}

impl ArpTable {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
            state: RwLock::new(None),
        }
    }

    fn cached(&self, ip: IpAddr) -> (bool, Option<String>) {
        match &*self.state.read() {
            Some((at, table)) => (at.elapsed() < self.ttl, table.get(&ip).cloned()),
            None => (false, None),
        }
    }

    fn reload(&self) -> Option<FxHashMap<IpAddr, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let table = parse_arp_table(&content);
                debug!(path = %self.path.display(), entries = table.len(), "arp table loaded");
                *self.state.write() = Some((Instant::now(), table.clone()));
                Some(table)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read arp table");
                None
            }
        }
    }
}

impl Default for ArpTable {
    fn default() -> Self {
        Self::new(
            DEFAULT_ARP_TABLE_PATH,
            Duration::from_secs(DEFAULT_ARP_CACHE_TTL_SECS),
        )
    }
}

impl MacLookup for ArpTable {
    fn lookup(&self, ip: IpAddr) -> Option<String> {
        let ip = ip.to_canonical();
        let (fresh, hit) = self.cached(ip);
        if hit.is_some() && fresh {
            return hit;
        }
        self.reload()
            .and_then(|table| table.get(&ip).cloned())
            .or(hit)
    }
}

impl std::fmt::Debug for ArpTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArpTable")
            .field("path", &self.path)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Parse the `IP address  HW type  Flags  HW address ...` table format.
///
/// Incomplete entries (all-zero hardware address) are skipped.
pub fn parse_arp_table(content: &str) -> FxHashMap<IpAddr, String> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let ip: IpAddr = fields.next()?.parse().ok()?;
            let mac = fields.find_map(normalize_mac)?;
            (mac != "00:00:00:00:00:00").then_some((ip, mac))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.1.1      0x1         0x2         AA:BB:cc:dd:ee:01     *        eth0
192.168.1.20     0x1         0x2         aa:bb:cc:dd:ee:14     *        eth0
192.168.1.99     0x1         0x0         00:00:00:00:00:00     *        eth0
";

    #[test]
    fn normalize_forms() {
        assert_eq!(normalize_mac("AA-BB-CC-DD-EE-FF").unwrap(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(normalize_mac(" aa:bb:cc:dd:ee:ff ").unwrap(), "aa:bb:cc:dd:ee:ff");
        assert!(normalize_mac("aa:bb:cc:dd:ee").is_none());
        assert!(normalize_mac("gg:bb:cc:dd:ee:ff").is_none());
    }

    #[test]
    fn parse_table() {
        let table = parse_arp_table(SAMPLE);
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.get(&"192.168.1.1".parse().unwrap()).unwrap(),
            "aa:bb:cc:dd:ee:01"
        );
        assert!(!table.contains_key(&"192.168.1.99".parse().unwrap()));
    }

    #[test]
    fn arp_table_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arp");
        std::fs::write(&path, SAMPLE).unwrap();

        let arp = ArpTable::new(&path, Duration::from_secs(60));
        assert_eq!(
            arp.lookup("192.168.1.20".parse().unwrap()).unwrap(),
            "aa:bb:cc:dd:ee:14"
        );
        assert!(arp.lookup("10.0.0.1".parse().unwrap()).is_none());
    }

    #[test]
    fn arp_table_picks_up_new_neighbors_on_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arp");
        std::fs::write(&path, SAMPLE).unwrap();
        let arp = ArpTable::new(&path, Duration::from_secs(3600));
        assert!(arp.lookup("192.168.1.30".parse().unwrap()).is_none());

        let updated = format!("{SAMPLE}192.168.1.30 0x1 0x2 aa:bb:cc:dd:ee:1e * eth0\n");
        std::fs::write(&path, updated).unwrap();
        assert_eq!(
            arp.lookup("192.168.1.30".parse().unwrap()).unwrap(),
            "aa:bb:cc:dd:ee:1e"
        );
    }

    #[test]
    fn missing_file_is_a_miss() {
        let arp = ArpTable::new("/nonexistent/arp", Duration::from_secs(1));
        assert!(arp.lookup("192.168.1.1".parse().unwrap()).is_none());
    }
}
