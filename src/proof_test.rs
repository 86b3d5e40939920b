use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use super::*;
use crate::{node::is_bit_set, Store};

fn setup_tree(count: usize, rng: &mut SmallRng) -> (crate::Tree, Vec<Vec<u8>>) {
    let store = Store::in_memory().unwrap();
    let mut snapshot = store.load_snapshot(0).unwrap();
    let mut tree = snapshot.get_tree("root").unwrap();

    let mut keys = Vec::with_capacity(count);
    for i in 0..count {
        let key = format!("key-{}-{}", i, rng.gen::<u32>()).into_bytes();
        tree.put(&key, format!("value-{}", i).as_bytes()).unwrap();
        keys.push(key);
    }
    (tree, keys)
}

#[test]
fn test_membership_proofs() {
    let seed: u64 = random();
    println!("test_membership_proofs {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let (mut tree, keys) = setup_tree(100, &mut rng);
    let root = tree.hash().unwrap();

    for key in keys.iter() {
        let proof = tree.generate_proof(key).unwrap();
        assert!(proof.verify_membership(&root, key), "key {:?}", key);
        assert!(!proof.verify_non_membership(&root, key), "key {:?}", key);
        assert!(!proof.verify_membership(&sum(b"wrong root"), key));
        assert!(!proof.verify_membership(&root, b"wrong key"));
    }

    // the member value travels with the proof.
    let proof = tree.generate_proof(&keys[0]).unwrap();
    assert_eq!(proof.value(), b"value-0".to_vec());
}

#[test]
fn test_non_membership_proofs() {
    let seed: u64 = random();
    println!("test_non_membership_proofs {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let (mut tree, keys) = setup_tree(100, &mut rng);
    let root = tree.hash().unwrap();

    for i in 0..100_u32 {
        let key = format!("absent-{}-{}", i, rng.gen::<u32>()).into_bytes();
        if keys.contains(&key) {
            continue;
        }
        let proof = tree.generate_proof(&key).unwrap();
        assert!(proof.verify_non_membership(&root, &key), "key {:?}", key);
        assert!(!proof.verify_membership(&root, &key), "key {:?}", key);
    }
}

#[test]
fn test_collision_and_deadend_terminals() {
    let store = Store::in_memory().unwrap();
    let mut snapshot = store.load_snapshot(0).unwrap();
    let mut tree = snapshot.get_tree("root").unwrap();
    tree.put(b"solitary", b"value").unwrap();
    let root = tree.hash().unwrap();
    let solitary_bit = is_bit_set(&sum(b"solitary"), 0);

    // with a single leaf, an absent key sharing the leaf's first bit
    // terminates in a collision, any other in a dead end.
    let (mut collided, mut deadended) = (false, false);
    for i in 0..64 {
        let key = format!("probe-{}", i).into_bytes();
        if key == b"solitary".to_vec() {
            continue;
        }
        let proof = tree.generate_proof(&key).unwrap();
        assert!(proof.verify_non_membership(&root, &key), "key {:?}", key);

        if is_bit_set(&sum(&key), 0) == solitary_bit {
            collided = true;
        } else {
            deadended = true;
        }
        if collided && deadended {
            break;
        }
    }
    assert!(collided && deadended);
}

#[test]
fn test_proof_marshal_roundtrip() {
    let seed: u64 = random();
    println!("test_proof_marshal_roundtrip {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let (mut tree, keys) = setup_tree(200, &mut rng);
    let root = tree.hash().unwrap();

    // member, collision and deadend proofs all survive the wire.
    let mut probes: Vec<Vec<u8>> = keys.iter().take(20).cloned().collect();
    for i in 0..20_u32 {
        probes.push(format!("absent-{}", i).into_bytes());
    }

    for key in probes.iter() {
        let proof = tree.generate_proof(key).unwrap();
        let wire = proof.marshal();

        let mut decoded = Proof::new();
        decoded.unmarshal(&wire).unwrap();
        assert_eq!(decoded, proof, "key {:?}", key);

        let member = proof.verify_membership(&root, key);
        assert_eq!(decoded.verify_membership(&root, key), member);
        assert_eq!(decoded.verify_non_membership(&root, key), !member);
    }
}

#[test]
fn test_proof_reuse() {
    let seed: u64 = random();
    println!("test_proof_reuse {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let (mut tree, keys) = setup_tree(50, &mut rng);
    let root = tree.hash().unwrap();

    // one proof value, unmarshalled over and over.
    let mut proof = Proof::new();
    for key in keys.iter() {
        let wire = tree.generate_proof(key).unwrap().marshal();
        proof.unmarshal(&wire).unwrap();
        assert!(proof.verify_membership(&root, key));
    }
}

#[test]
fn test_proof_unmarshal_corrupt() {
    let mut proof = Proof::new();
    assert!(proof.unmarshal(&[]).is_err());
    assert!(proof.unmarshal(&[1, 1]).is_err());

    // a trace length of zero is structurally impossible.
    let mut wire = vec![1, 3, 0];
    wire.extend_from_slice(&[0; 32]);
    match proof.unmarshal(&wire) {
        Err(err) => assert!(err.is_corruption(), "{}", err),
        Ok(_) => unreachable!(),
    }

    // bitmap claims a sibling that is not there.
    let mut wire = vec![1, 3, 1];
    let mut bitmap = [0_u8; 32];
    bitmap[0] = 0x80;
    wire.extend_from_slice(&bitmap);
    assert!(proof.unmarshal(&wire).is_err());
}

#[test]
fn test_forced_keyhash_membership() {
    let store = Store::in_memory().unwrap();
    let mut snapshot = store.load_snapshot(0).unwrap();
    let mut tree = snapshot.get_tree("root").unwrap();

    // park a leaf exactly on the keyhash of the key under proof; the
    // prover meets a leaf whose keyhash matches but whose key differs
    // only internally, the proof still speaks about keyhashes.
    let keyhash = sum(b"the probed key");
    tree.put_raw(keyhash, b"someone else", b"squatting").unwrap();
    let root = tree.hash().unwrap();

    let mut proof = Proof::new();
    tree.generate_proof_raw(&keyhash, &mut proof).unwrap();
    // the squatter IS the member at that position.
    assert!(proof.verify_membership(&root, b"the probed key"));
}
