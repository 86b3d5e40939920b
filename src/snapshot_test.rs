use super::*;
use crate::{Error, MAX_VERSIONS_IN_REGISTRY};

#[test]
fn test_fresh_store_snapshot() {
    let store = Store::in_memory().unwrap();
    let mut snapshot = store.load_snapshot(0).unwrap();
    assert_eq!(snapshot.version(), 0);

    let mut tree = snapshot.get_tree("root").unwrap();
    assert_eq!(tree.version(), 0);
    assert!(tree.get(b"key").unwrap_err().is_not_found());

    // nothing committed yet, version 1 does not exist.
    match store.load_snapshot(1) {
        Err(err) => assert!(err.is_no_such_version(), "{}", err),
        Ok(_) => unreachable!(),
    }
}

#[test]
fn test_put_commit_get() {
    let store = Store::in_memory().unwrap();
    let mut snapshot = store.load_snapshot(0).unwrap();
    let mut tree = snapshot.get_tree("root").unwrap();

    tree.put(b"key", b"value").unwrap();
    tree.commit(&[]).unwrap();
    assert_eq!(tree.get(b"key").unwrap(), b"value".to_vec());

    let mut snapshot = store.load_snapshot(0).unwrap();
    assert_eq!(snapshot.version(), 1);
    let mut tree = snapshot.get_tree("root").unwrap();
    assert_eq!(tree.get(b"key").unwrap(), b"value".to_vec());
}

#[test]
fn test_snapshot_history() {
    let store = Store::in_memory().unwrap();

    // five commits, one key each; snapshot v holds exactly keys 1..=v.
    for i in 1..=5_u64 {
        let mut snapshot = store.load_snapshot(0).unwrap();
        let mut tree = snapshot.get_tree("root").unwrap();
        tree.put(format!("{}", i).as_bytes(), format!("{}", i).as_bytes()).unwrap();
        let version = tree.commit(&[]).unwrap();
        assert_eq!(version, i);
    }

    for version in 1..=5_u64 {
        let mut snapshot = store.load_snapshot(version).unwrap();
        assert_eq!(snapshot.version(), version);
        let mut tree = snapshot.get_tree("root").unwrap();
        for i in 1..=5_u64 {
            let key = format!("{}", i).into_bytes();
            if i <= version {
                assert_eq!(tree.get(&key).unwrap(), key, "version {} key {}", version, i);
            } else {
                assert!(tree.get(&key).is_err(), "version {} key {}", version, i);
            }
        }
    }
}

#[test]
fn test_snapshot_history_beyond_registry() {
    let store = Store::in_memory().unwrap();

    // 25 commits of 10 keys each rotate the registry ring past its
    // capacity; every snapshot stays reachable through the version
    // chain.
    let batches = (MAX_VERSIONS_IN_REGISTRY + 5) as u64;
    for batch in 0..batches {
        let mut snapshot = store.load_snapshot(0).unwrap();
        let mut tree = snapshot.get_tree("root").unwrap();
        for i in (batch * 10)..((batch + 1) * 10) {
            tree.put(format!("key{:05}", i).as_bytes(), format!("value{}", i).as_bytes())
                .unwrap();
        }
        tree.commit(&[]).unwrap();
    }

    for version in 1..=batches {
        let mut snapshot = store.load_snapshot(version).unwrap();
        let mut tree = snapshot.get_tree("root").unwrap();
        for i in 0..(batches * 10) {
            let key = format!("key{:05}", i).into_bytes();
            if i < version * 10 {
                let value = tree.get(&key).unwrap();
                assert_eq!(value, format!("value{}", i).into_bytes(), "v{} key {}", version, i);
            } else {
                assert!(tree.get(&key).is_err(), "v{} key {}", version, i);
            }
        }
    }

    let beyond = batches + 1;
    match store.load_snapshot(beyond) {
        Err(err) => assert!(err.is_no_such_version(), "{}", err),
        Ok(_) => unreachable!(),
    }
}

#[test]
fn test_tree_versions() {
    let store = Store::in_memory().unwrap();
    let mut snapshot = store.load_snapshot(0).unwrap();
    assert_eq!(snapshot.get_tree_highest_version("root").unwrap(), 0);

    let mut tree = snapshot.get_tree("root").unwrap();
    for i in 1..=3_u64 {
        tree.put(format!("key{}", i).as_bytes(), b"value").unwrap();
        tree.commit(&[]).unwrap();
        assert_eq!(tree.version(), i);
        assert_eq!(tree.parent_version(), i - 1);
    }

    let mut snapshot = store.load_snapshot(0).unwrap();
    assert_eq!(snapshot.get_tree_highest_version("root").unwrap(), 3);

    // every tree version remains loadable.
    let mut v2 = snapshot.get_tree_with_version("root", 2).unwrap();
    assert_eq!(v2.version(), 2);
    assert_eq!(v2.get(b"key2").unwrap(), b"value".to_vec());
    assert!(v2.get(b"key3").unwrap_err().is_not_found());

    // version 0 is an empty tree.
    let mut v0 = snapshot.get_tree_with_version("root", 0).unwrap();
    assert!(v0.get(b"key1").unwrap_err().is_not_found());
}

#[test]
fn test_lookup_by_roothash_and_tag() {
    let store = Store::in_memory().unwrap();
    let mut snapshot = store.load_snapshot(0).unwrap();
    let mut tree = snapshot.get_tree("root").unwrap();

    tree.put(b"key", b"value").unwrap();
    tree.commit(&["release-1"]).unwrap();
    let roothash = tree.hash().unwrap();

    let mut snapshot = store.load_snapshot(0).unwrap();

    let mut by_hash = snapshot.get_tree_with_roothash(&roothash).unwrap();
    assert_eq!(by_hash.get(b"key").unwrap(), b"value".to_vec());
    assert_eq!(by_hash.name(), "root");

    let mut by_tag = snapshot.get_tree_with_tag("release-1").unwrap();
    assert_eq!(by_tag.get(b"key").unwrap(), b"value".to_vec());
    assert_eq!(by_tag.hash().unwrap(), roothash);

    assert!(snapshot.get_tree_with_roothash(&crate::hash::sum(b"unknown")).is_err());
    assert!(snapshot.get_tree_with_tag("no such tag").is_err());

    // a re-used tag resolves to the latest committed root.
    let mut tree = snapshot.get_tree("root").unwrap();
    tree.put(b"more", b"data").unwrap();
    tree.commit(&["release-1"]).unwrap();
    let new_roothash = tree.hash().unwrap();

    let mut snapshot = store.load_snapshot(0).unwrap();
    let mut by_tag = snapshot.get_tree_with_tag("release-1").unwrap();
    assert_eq!(by_tag.hash().unwrap(), new_roothash);
}

#[test]
fn test_tree_name_validation() {
    let store = Store::in_memory().unwrap();
    let mut snapshot = store.load_snapshot(0).unwrap();

    let name = "n".repeat(TREE_NAME_LIMIT);
    snapshot.get_tree(&name).unwrap();

    let name = "n".repeat(TREE_NAME_LIMIT + 1);
    match snapshot.get_tree(&name) {
        Err(Error::InvalidInput(_, _)) => (),
        _ => unreachable!(),
    }
    match snapshot.get_tree(":reserved") {
        Err(Error::InvalidInput(_, _)) => (),
        _ => unreachable!(),
    }
}

#[test]
fn test_multiple_named_trees() {
    let store = Store::in_memory().unwrap();
    let mut snapshot = store.load_snapshot(0).unwrap();

    let mut one = snapshot.get_tree("accounts").unwrap();
    let mut two = snapshot.get_tree("balances").unwrap();
    one.put(b"alice", b"1").unwrap();
    two.put(b"alice", b"100").unwrap();
    crate::tree::commit(&mut [&mut one, &mut two]).unwrap();

    let mut snapshot = store.load_snapshot(0).unwrap();
    assert_eq!(snapshot.get_tree("accounts").unwrap().get(b"alice").unwrap(), b"1".to_vec());
    assert_eq!(snapshot.get_tree("balances").unwrap().get(b"alice").unwrap(), b"100".to_vec());

    // tree versions advance independently of the store version.
    let mut one = snapshot.get_tree("accounts").unwrap();
    one.put(b"bob", b"2").unwrap();
    one.commit(&[]).unwrap();
    assert_eq!(one.version(), 2);

    let mut snapshot = store.load_snapshot(0).unwrap();
    assert_eq!(snapshot.version(), 2);
    assert_eq!(snapshot.get_tree_highest_version("accounts").unwrap(), 2);
    assert_eq!(snapshot.get_tree_highest_version("balances").unwrap(), 1);
}

#[test]
fn test_disk_persistence() {
    let dir = std::env::temp_dir().join("merkdb-snapshot-disk-test");
    std::fs::remove_dir_all(&dir).ok();

    let committed_hash = {
        let store = Store::open(&dir).unwrap();
        let mut snapshot = store.load_snapshot(0).unwrap();
        let mut tree = snapshot.get_tree("root").unwrap();
        for i in 0..500_u32 {
            tree.put(format!("key{}", i).as_bytes(), format!("value{}", i).as_bytes()).unwrap();
        }
        tree.commit(&[]).unwrap();
        let hash = tree.hash().unwrap();
        store.close();
        hash
    };

    // a process restart observes the exact committed state.
    let store = Store::open(&dir).unwrap();
    let mut snapshot = store.load_snapshot(0).unwrap();
    assert_eq!(snapshot.version(), 1);
    let mut tree = snapshot.get_tree("root").unwrap();
    assert_eq!(tree.hash().unwrap(), committed_hash);
    for i in 0..500_u32 {
        let value = tree.get(format!("key{}", i).as_bytes()).unwrap();
        assert_eq!(value, format!("value{}", i).into_bytes(), "at {}", i);
    }

    std::fs::remove_dir_all(&dir).ok();
}
