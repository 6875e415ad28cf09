//! End-to-end scenario: two replicas, one empty, one holding the archive;
//! install, post-install command, idempotent second run, forced reinstall
//! into an emptied target.

use std::fs;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;

use depot_daemon::Scheduler;
use depot_store::{MemoryStore, RemoteTarget, ReplicaSet};
use depot_sync::SyncUnit;

fn archive_of(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, content.as_bytes())
            .expect("append entry");
    }
    builder
        .into_inner()
        .expect("finish tar")
        .finish()
        .expect("finish gzip")
}

fn two_replica_unit(
    empty: Arc<MemoryStore>,
    holder: Arc<MemoryStore>,
    target: &TempDir,
    commands: Vec<String>,
) -> Arc<SyncUnit> {
    let replicas = ReplicaSet::from_stores(vec![
        ("minio1:9000/test".to_string(), empty),
        ("minio2:9000/test".to_string(), holder),
    ]);
    Arc::new(
        SyncUnit::new(
            "testing",
            replicas,
            RemoteTarget::Key("example.tar.gz".to_string()),
            target.path(),
        )
        .with_commands(commands),
    )
}

#[tokio::test]
async fn sync_install_skip_and_forced_reinstall() {
    let empty = Arc::new(MemoryStore::new());
    let holder = Arc::new(MemoryStore::new());
    let target = TempDir::new().expect("target");
    let somefile = target.path().join("somefile");

    let unit = two_replica_unit(
        empty.clone(),
        holder.clone(),
        &target,
        vec![format!("echo foobar > {}", somefile.display())],
    );
    let scheduler = Scheduler::with_units(vec![unit]);

    // Nothing uploaded anywhere yet: the cycle must fail, not fabricate.
    let report = scheduler.run_once().await;
    assert!(report.error.is_some(), "absent object must be an error");
    assert!(!report.any_attempted);

    // Upload to the second replica only; resolution must still find it.
    holder.put(
        "example.tar.gz",
        archive_of(&[("test", "Hello world!\n")]),
        Utc::now() + ChronoDuration::seconds(30),
    );

    let report = scheduler.run_once().await;
    assert!(report.error.is_none(), "cycle failed: {:?}", report.error);
    assert!(report.any_attempted);
    assert_eq!(
        fs::read_to_string(target.path().join("test")).expect("installed file"),
        "Hello world!\n"
    );
    assert_eq!(
        fs::read_to_string(&somefile).expect("command output"),
        "foobar\n"
    );

    // Unchanged remote: the second cycle is a no-op.
    let report = scheduler.run_once().await;
    assert!(report.error.is_none());
    assert!(!report.any_attempted, "unchanged remote must not reinstall");

    // Emptying the target forces a reinstall even with an unchanged cursor.
    for entry in fs::read_dir(target.path()).expect("read target") {
        let path = entry.expect("entry").path();
        if path.is_dir() {
            fs::remove_dir_all(&path).expect("clear dir");
        } else {
            fs::remove_file(&path).expect("clear file");
        }
    }
    let report = scheduler.run_once().await;
    assert!(report.error.is_none(), "cycle failed: {:?}", report.error);
    assert!(report.any_attempted);
    assert!(target.path().join("test").exists());
}

#[tokio::test]
async fn replace_prefix_limits_what_an_install_removes() {
    let holder = Arc::new(MemoryStore::new());
    holder.put(
        "example.tar.gz",
        archive_of(&[("p.new", "fresh")]),
        Utc::now() + ChronoDuration::seconds(30),
    );

    let target = TempDir::new().expect("target");
    fs::write(target.path().join("a.txt"), "keep").expect("seed a.txt");
    fs::write(target.path().join("p.old"), "drop").expect("seed p.old");

    let replicas =
        ReplicaSet::from_stores(vec![("minio1:9000/test".to_string(), holder)]);
    let unit = Arc::new(
        SyncUnit::new(
            "partial",
            replicas,
            RemoteTarget::Key("example.tar.gz".to_string()),
            target.path(),
        )
        .with_replace_prefix("p."),
    );
    let scheduler = Scheduler::with_units(vec![unit]);

    let report = scheduler.run_once().await;
    assert!(report.error.is_none(), "cycle failed: {:?}", report.error);
    assert!(report.any_attempted);

    assert!(target.path().join("a.txt").exists(), "a.txt spared");
    assert!(!target.path().join("p.old").exists(), "p.old removed");
    assert_eq!(
        fs::read_to_string(target.path().join("p.new")).expect("read"),
        "fresh"
    );
}
