use std::sync::Arc;

use kadnode::rpc::SimNetwork;
use kadnode::server::{MemoryStore, ValueStore};
use kadnode::{Contact, Error, Id, Node, Result, Testnet, BUCKET_SIZE};

fn brute_force(nodes: &[&Node], target: &Id) -> Vec<Id> {
    let mut ids: Vec<Id> = nodes.iter().map(|node| *node.id()).collect();
    ids.sort_by_key(|id| id.xor(target));
    ids.truncate(BUCKET_SIZE);
    ids
}

fn ids(contacts: &[Contact]) -> Vec<Id> {
    contacts.iter().map(|contact| *contact.id()).collect()
}

#[test]
fn find_node_converges() {
    let testnet = Testnet::fully_connected(80).unwrap();
    let origin = &testnet.nodes[17];

    let others: Vec<&Node> = testnet
        .nodes
        .iter()
        .filter(|node| node.id() != origin.id())
        .collect();

    for j in (0..80).step_by(8) {
        let target = *testnet.nodes[j].id();

        assert_eq!(ids(&origin.find_node(target)), brute_force(&others, &target));
    }

    testnet.shutdown().unwrap();
}

#[test]
fn find_node_skips_unreachable() {
    let testnet = Testnet::fully_connected(80).unwrap();
    let origin = &testnet.nodes[9];

    let disconnected: Vec<&Node> = testnet.nodes[60..].iter().collect();
    for node in &disconnected {
        testnet.network.disconnect(node.local_addr());
    }

    let reachable: Vec<&Node> = testnet.nodes[..60]
        .iter()
        .filter(|node| node.id() != origin.id())
        .collect();

    for j in [0, 23, 41, 59, 60, 75] {
        let target = *testnet.nodes[j].id();
        let closest = origin.find_node(target);

        for node in &disconnected {
            assert!(!closest.contains(node.contact()));
        }
        assert_eq!(ids(&closest), brute_force(&reachable, &target));
    }

    testnet.shutdown().unwrap();
}

#[test]
fn reject_other_network() {
    let testnet = Testnet::new(3).unwrap();

    let result = Node::builder()
        .transport(Arc::new(testnet.network.clone()))
        .network_id("other")
        .bootstrap(&testnet.bootstrap)
        .build();

    match result {
        Err(Error::NetworkMismatch { local, remote }) => {
            assert_eq!(local, "other");
            assert_eq!(remote, "kademlia");
        }
        other => panic!("unexpected {other:?}"),
    }

    for node in &testnet.nodes {
        assert_eq!(node.routing_table().size(), 2);
    }

    testnet.shutdown().unwrap();
}

#[test]
fn find_value() {
    let testnet = Testnet::new(10).unwrap();

    let key = Id::random();
    let store = Arc::new(MemoryStore::default());
    store.insert(key, "hello");

    let holder = Node::builder()
        .transport(Arc::new(testnet.network.clone()))
        .value_store(store)
        .bootstrap(&testnet.bootstrap)
        .build()
        .unwrap();

    let outcome = testnet.nodes[4].find_value(key);
    assert_eq!(outcome.value.as_deref(), Some("hello"));

    let outcome = testnet.nodes[4].find_value(Id::random());
    assert_eq!(outcome.value, None);
    assert!(!outcome.closest.is_empty());

    holder.shutdown();
    testnet.shutdown().unwrap();
}

#[derive(Debug)]
struct BrokenStore;

impl ValueStore for BrokenStore {
    fn get(&self, _key: &Id) -> Result<Option<String>> {
        Err(Error::ValueStoreFailure("disk on fire".to_string()))
    }
}

#[test]
fn value_store_failure_stops_serving() {
    let network = SimNetwork::new();

    let client = Node::builder()
        .transport(Arc::new(network.clone()))
        .build()
        .unwrap();
    let broken = Node::builder()
        .transport(Arc::new(network.clone()))
        .value_store(Arc::new(BrokenStore))
        .build()
        .unwrap();
    let contact = broken.contact().clone();

    client.ping(&contact).unwrap();

    match client.find_value_at(&contact, Id::random()) {
        Err(Error::Remote { code, .. }) => assert_eq!(code, 202),
        other => panic!("unexpected {other:?}"),
    }

    assert!(matches!(
        broken.block_until_shutdown(),
        Err(Error::ValueStoreFailure(_))
    ));
    assert!(matches!(
        client.ping(&contact),
        Err(Error::Unreachable { .. })
    ));
}

#[test]
fn unreachable_bootstrap() {
    let network = SimNetwork::new();

    let node = Node::builder()
        .transport(Arc::new(network.clone()))
        .bootstrap(&[Contact::new(Id::random(), "sim:9999")])
        .build()
        .unwrap();

    assert!(node.routing_table().is_empty());
    assert!(node.find_node(Id::random()).is_empty());
}
