//! Pair resolution and fan-out across many pairs.

mod common;

use std::sync::Arc;

use common::MockCluster;
use esbridge_cluster::Cluster;
use esbridge_core::{Error, IndexPair};
use esbridge_migrate::BulkMigrator;
use serde_json::json;

fn clusters_with_logs() -> (Arc<MockCluster>, Arc<MockCluster>) {
    let source = Arc::new(MockCluster::typeless());
    source.add_index("logs-1", json!({}), vec![("a", json!({"n": 1}))]);
    source.add_index("logs-2", json!({}), vec![("b", json!({"n": 2}))]);
    source.add_index(".system", json!({}), vec![("s", json!({"internal": true}))]);
    (source, Arc::new(MockCluster::typeless()))
}

#[tokio::test]
async fn pattern_resolution_skips_system_indices() {
    let (source, target) = clusters_with_logs();

    let migrator = BulkMigrator::new(source.clone(), target.clone())
        .with_pattern("logs-.*")
        .await;
    assert_eq!(migrator.pair_keys(), vec!["logs-1:logs-1", "logs-2:logs-2"]);

    let migrator = BulkMigrator::new(source.clone(), target.clone()).with_pattern(".*").await;
    assert_eq!(migrator.pair_keys(), vec!["logs-1:logs-1", "logs-2:logs-2"]);

    let migrator = BulkMigrator::new(source, target)
        .with_ignore_system_index(false)
        .with_pattern(".*")
        .await;
    assert_eq!(
        migrator.pair_keys(),
        vec![".system:.system", "logs-1:logs-1", "logs-2:logs-2"]
    );
}

#[tokio::test]
async fn duplicate_pair_identities_collapse() {
    let (source, target) = clusters_with_logs();
    let migrator = BulkMigrator::new(source, target)
        .with_index_pairs(vec![
            IndexPair::new("logs-1", "logs-1"),
            IndexPair::new("logs-1", "logs-1"),
            IndexPair::new("logs-1", "logs-other"),
        ])
        .with_pattern("logs-1")
        .await;
    assert_eq!(migrator.pair_keys(), vec!["logs-1:logs-1", "logs-1:logs-other"]);
}

#[tokio::test]
async fn batch_sync_migrates_every_pair() {
    let (source, target) = clusters_with_logs();

    let report = BulkMigrator::new(source.clone(), target.clone())
        .with_pattern("logs-.*")
        .await
        .with_parallelism(2)
        .sync(false)
        .await
        .unwrap();

    assert_eq!(report.total, 2);
    assert!(report.all_ok());
    assert_eq!(target.count("logs-1").await.unwrap(), 1);
    assert_eq!(target.count("logs-2").await.unwrap(), 1);
}

#[tokio::test]
async fn pair_failures_do_not_abort_siblings() {
    let (source, target) = clusters_with_logs();

    // One resolvable pair, one pointing at a missing source index.
    let report = BulkMigrator::new(source, target.clone())
        .with_index_pairs(vec![
            IndexPair::new("logs-1", "logs-1"),
            IndexPair::new("missing", "missing"),
        ])
        .sync(false)
        .await
        .unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "missing:missing");
    assert_eq!(target.count("logs-1").await.unwrap(), 1);
}

#[tokio::test]
async fn batch_compare_returns_only_pairs_with_diffs() {
    let (source, target) = clusters_with_logs();
    // logs-1 matches, logs-2 differs.
    target.add_index("logs-1", json!({}), vec![("a", json!({"n": 1}))]);
    target.add_index("logs-2", json!({}), vec![("b", json!({"n": 99}))]);

    let diffs = BulkMigrator::new(source, target)
        .with_pattern("logs-.*")
        .await
        .compare()
        .await
        .unwrap();

    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs["logs-2:logs-2"].updated, 1);
}

#[tokio::test]
async fn invalid_pattern_latches_a_config_error() {
    let (source, target) = clusters_with_logs();
    let err = BulkMigrator::new(source, target)
        .with_pattern("logs-(")
        .await
        .with_parallelism(4)
        .sync(false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
