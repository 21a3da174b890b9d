//! Provider refresh while matches are in flight.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use switchyard_rules::parser::PayloadFormat;
use switchyard_rules::provider::{Fetched, FileVehicle, Vehicle, VehicleType};
use switchyard_rules::{
    Behavior, Metadata, ParseContext, ProviderMap, RuleListBuilder, RuleProvider, RulesError,
    UpdateOutcome,
};

#[derive(Debug, Default)]
struct Swappable {
    content: Mutex<Bytes>,
}

impl Swappable {
    fn set(&self, text: &str) {
        *self.content.lock() = Bytes::copy_from_slice(text.as_bytes());
    }
}

#[async_trait]
impl Vehicle for Swappable {
    fn kind(&self) -> VehicleType {
        VehicleType::Inline
    }

    async fn fetch(&self) -> Result<Fetched, RulesError> {
        Ok(Fetched::Content(self.content.lock().clone()))
    }
}

fn domain_provider(vehicle: Arc<Swappable>) -> Arc<RuleProvider> {
    Arc::new(RuleProvider::new(
        "blocked",
        Behavior::Domain,
        PayloadFormat::Text,
        Duration::ZERO,
        vehicle,
        ParseContext::default(),
    ))
}

#[tokio::test]
async fn in_flight_snapshot_survives_update() {
    let vehicle = Arc::new(Swappable::default());
    vehicle.set("+.old.example\n");
    let provider = domain_provider(vehicle.clone());
    provider.initial().await.unwrap();

    // A matcher that started before the refresh keeps its snapshot.
    let held = provider.snapshot().unwrap();

    vehicle.set("+.new.example\n");
    assert_eq!(
        provider.update().await.unwrap(),
        UpdateOutcome::Updated { rules: 1 }
    );

    let mut old_host = Metadata::for_host("a.old.example", 443);
    let mut new_host = Metadata::for_host("a.new.example", 443);
    assert!(held.strategy.matches(&mut old_host, false));
    assert!(!held.strategy.matches(&mut new_host, false));

    // Matches started after the update see only the new content.
    assert!(!provider.matches(&mut old_host, false));
    assert!(provider.matches(&mut new_host, false));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_see_whole_snapshots() {
    let vehicle = Arc::new(Swappable::default());
    vehicle.set("+.a.example\n+.b.example\n");
    let provider = domain_provider(vehicle.clone());
    provider.initial().await.unwrap();

    // Content alternates between two lists that each hold two entries of a
    // generation; a reader must see both entries of one generation, never
    // one of each.
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let provider = provider.clone();
            tokio::spawn(async move {
                for _ in 0..2_000 {
                    let snapshot = provider.snapshot().unwrap();
                    let a = snapshot
                        .strategy
                        .matches(&mut Metadata::for_host("x.a.example", 1), false);
                    let b = snapshot
                        .strategy
                        .matches(&mut Metadata::for_host("x.b.example", 1), false);
                    let c = snapshot
                        .strategy
                        .matches(&mut Metadata::for_host("x.c.example", 1), false);
                    let d = snapshot
                        .strategy
                        .matches(&mut Metadata::for_host("x.d.example", 1), false);
                    assert!((a && b && !c && !d) || (!a && !b && c && d));
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for i in 0..50 {
        if i % 2 == 0 {
            vehicle.set("+.c.example\n+.d.example\n");
        } else {
            vehicle.set("+.a.example\n+.b.example\n");
        }
        provider.update().await.unwrap();
        tokio::task::yield_now().await;
    }

    for reader in readers {
        reader.await.unwrap();
    }
}

#[tokio::test]
async fn rule_set_follows_file_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lan.yaml");
    std::fs::write(&path, "payload:\n  - 10.0.0.0/8\n").unwrap();

    let provider = Arc::new(RuleProvider::new(
        "lan",
        Behavior::IpCidr,
        PayloadFormat::Yaml,
        Duration::ZERO,
        Arc::new(FileVehicle::new(&path)),
        ParseContext::default(),
    ));
    provider.initial().await.unwrap();

    let mut providers = ProviderMap::default();
    providers.insert("lan".into(), provider.clone());
    let ctx = ParseContext::default();
    let list = RuleListBuilder::new(&ctx)
        .providers(providers)
        .build(["RULE-SET,lan,DIRECT", "MATCH,PROXY"])
        .unwrap();

    let mut meta = Metadata::for_ip("172.16.0.1".parse().unwrap(), 80);
    assert_eq!(list.evaluate(&mut meta).target(), Some("PROXY"));

    std::fs::write(&path, "payload:\n  - 10.0.0.0/8\n  - 172.16.0.0/12\n").unwrap();
    // Give the new file a distinct modification time.
    let later = std::time::SystemTime::now() + Duration::from_secs(5);
    std::fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(later)
        .unwrap();
    assert_eq!(
        provider.update().await.unwrap(),
        UpdateOutcome::Updated { rules: 2 }
    );

    let mut meta = Metadata::for_ip("172.16.0.1".parse().unwrap(), 80);
    assert_eq!(list.evaluate(&mut meta).target(), Some("DIRECT"));
}
