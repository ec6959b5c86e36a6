//! Kademlia node.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, Sender};
use tracing::{debug, info, trace, warn};

use crate::common::{
    Contact, FindNodeRequestArguments, FindNodeResponseArguments, FindValueRequestArguments,
    FindValueResponseArguments, Id, RequestSpecific, RequestTypeSpecific, ResponseSpecific,
    ReplacementCheck, ResponseTypeSpecific, RoutingTable, BUCKET_SIZE,
};
use crate::rpc::{
    Config, Info, IterativeQuery, Listener, LookupOutcome, ProbeOutcome, Rpc, SimNetwork,
    TcpTransport, Transport,
};
use crate::server::{MemoryStore, RequestHandler, ValueStore};
use crate::{Error, Result};

#[derive(Debug)]
/// A Kademlia node: a routing table, a server answering requests from its
/// peers, and the client side lookups.
///
/// Cloning is cheap, and all clones drive the same node.
pub struct Node {
    inner: Arc<Inner>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl Clone for Node {
    fn clone(&self) -> Self {
        Node {
            inner: self.inner.clone(),
            shutdown: self.shutdown.clone(),
            handle: None,
        }
    }
}

#[derive(Debug, Default)]
/// Node builder
pub struct NodeBuilder {
    config: Config,
    value_store: Option<Arc<dyn ValueStore>>,
    transport: Option<Arc<dyn Transport>>,
}

impl NodeBuilder {
    /// Set this node's [Id], instead of a random one.
    pub fn id(mut self, id: Id) -> Self {
        self.config.id = Some(id);
        self
    }

    /// Set the port to listen on.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = Some(port);
        self
    }

    /// Set the network id. Peers on another network are rejected.
    pub fn network_id(mut self, network_id: impl Into<String>) -> Self {
        self.config.network_id = network_id.into();
        self
    }

    /// Set the maximum number of outstanding probes in a lookup.
    pub fn alpha(mut self, alpha: usize) -> Self {
        self.config.alpha = alpha;
        self
    }

    /// Set the timeout of every outbound call.
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.config.request_timeout = request_timeout;
        self
    }

    /// Set the bootstrapping contacts.
    pub fn bootstrap(mut self, bootstrap: &[Contact]) -> Self {
        self.config.bootstrap = bootstrap.to_vec();
        self
    }

    /// Set the store answering find-value requests.
    ///
    /// Defaults to an empty [MemoryStore].
    pub fn value_store(mut self, value_store: Arc<dyn ValueStore>) -> Self {
        self.value_store = Some(value_store);
        self
    }

    /// Set the transport.
    ///
    /// Defaults to [TcpTransport] on `127.0.0.1`.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Start the node, and bootstrap off the configured contacts.
    pub fn build(self) -> Result<Node> {
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(TcpTransport::default()));
        let value_store = self
            .value_store
            .unwrap_or_else(|| Arc::new(MemoryStore::default()));

        Node::start(self.config, transport, value_store)
    }
}

impl Node {
    /// Returns a builder to edit settings before creating a Node.
    pub fn builder() -> NodeBuilder {
        NodeBuilder::default()
    }

    /// Create a new node with default settings.
    pub fn new() -> Result<Self> {
        Node::builder().build()
    }

    fn start(
        config: Config,
        transport: Arc<dyn Transport>,
        value_store: Arc<dyn ValueStore>,
    ) -> Result<Node> {
        let endpoint = transport.bind(config.port)?;

        let id = config.id.unwrap_or_else(Id::random);
        let contact = Contact::new(id, endpoint.local_addr());

        let rpc = Rpc::new(
            transport,
            contact.clone(),
            config.network_id.clone(),
            config.request_timeout,
        );
        let routing_table = Arc::new(Mutex::new(RoutingTable::new(id)));

        let (replacement_sender, replacement_receiver) = flume::unbounded();
        thread::Builder::new()
            .name(format!("kadnode replacement {}", contact.address()))
            .spawn({
                let rpc = rpc.clone();
                let routing_table = routing_table.clone();

                move || check_replacements(rpc, routing_table, replacement_receiver)
            })?;

        let inner = Arc::new(Inner {
            rpc,
            contact,
            alpha: config.alpha.max(1),
            routing_table,
            value_store,
            replacement_sender,
        });

        let Listener { shutdown, handle } =
            endpoint.serve(inner.clone(), config.request_timeout)?;

        info!(
            %id,
            local_addr = inner.contact.address(),
            network_id = inner.rpc.network_id(),
            "Node listening"
        );

        let node = Node {
            inner,
            shutdown,
            handle: Some(handle),
        };

        for seed in &config.bootstrap {
            if let Err(error) = node.bootstrap(seed) {
                node.shutdown();
                return Err(error);
            }
        }

        Ok(node)
    }

    // === Getters ===

    /// Returns this node's [Id].
    pub fn id(&self) -> &Id {
        self.inner.contact.id()
    }

    /// Returns the contact peers know this node by.
    pub fn contact(&self) -> &Contact {
        &self.inner.contact
    }

    /// Returns the address this node is listening on.
    pub fn local_addr(&self) -> &str {
        self.inner.contact.address()
    }

    /// Returns a snapshot of the routing table.
    pub fn routing_table(&self) -> RoutingTable {
        self.inner.routing_table().clone()
    }

    /// Returns information about this node.
    pub fn info(&self) -> Info {
        Info {
            id: *self.id(),
            local_addr: self.local_addr().to_string(),
            network_id: self.inner.rpc.network_id().to_string(),
            routing_table_size: self.inner.routing_table().size(),
        }
    }

    // === Public Methods ===

    /// Record that `contact` was seen alive.
    ///
    /// If its bucket is full, the least recently seen contact there is pinged
    /// in the background, and only replaced if it does not respond.
    pub fn observe(&self, contact: Contact) {
        self.inner.observe(contact)
    }

    /// Up to `count` contacts from the local routing table, closest to `target` first.
    pub fn closest(&self, target: &Id, count: usize) -> Vec<Contact> {
        self.inner.routing_table().closest(target, count)
    }

    /// Ping a contact.
    pub fn ping(&self, contact: &Contact) -> Result<()> {
        self.inner.call(contact, RequestTypeSpecific::Ping)?;

        Ok(())
    }

    /// Ask a single contact for the contacts it knows closest to `target`.
    pub fn find_node_at(&self, contact: &Contact, target: Id) -> Result<Vec<Contact>> {
        self.inner.find_node_at(contact, target)
    }

    /// Ask a single contact for the value stored under `key`, or the
    /// contacts it knows closest to it.
    pub fn find_value_at(&self, contact: &Contact, key: Id) -> Result<FindValueResponseArguments> {
        self.inner.find_value_at(contact, key)
    }

    /// Iterative lookup of the [BUCKET_SIZE] reachable contacts closest to `target`.
    ///
    /// Unreachable contacts are skipped, so with a partitioned network the
    /// result is partial, or empty with an empty routing table.
    pub fn find_node(&self, target: Id) -> Vec<Contact> {
        let inner = &self.inner;

        let mut query = IterativeQuery::new(*self.id(), target, inner.alpha);
        for contact in inner.routing_table().closest(&target, BUCKET_SIZE) {
            query.add_candidate(contact);
        }

        query
            .run(|contact| {
                inner
                    .find_node_at(contact, target)
                    .map(ProbeOutcome::Contacts)
            })
            .closest
    }

    /// Iterative lookup of the value stored under `key`.
    ///
    /// Stops querying new contacts once one of them returns the value.
    pub fn find_value(&self, key: Id) -> LookupOutcome {
        let inner = &self.inner;

        let mut query = IterativeQuery::new(*self.id(), key, inner.alpha).stop_on_value();
        for contact in inner.routing_table().closest(&key, BUCKET_SIZE) {
            query.add_candidate(contact);
        }

        query.run(|contact| {
            inner
                .find_value_at(contact, key)
                .map(|response| match response {
                    FindValueResponseArguments::Value(value) => ProbeOutcome::Value(value),
                    FindValueResponseArguments::Contacts(contacts) => {
                        ProbeOutcome::Contacts(contacts)
                    }
                })
        })
    }

    /// Join the network through `seed`, then look up our own [Id] to
    /// populate the routing table.
    ///
    /// Returns the closest contacts found. An unreachable seed is not an
    /// error, and results in an empty list.
    pub fn bootstrap(&self, seed: &Contact) -> Result<Vec<Contact>> {
        match self.find_node_at(seed, *self.id()) {
            Ok(_) => {}
            Err(error @ Error::Unreachable { .. }) => {
                warn!(?error, seed = seed.address(), "Bootstrap seed unreachable");
                return Ok(vec![]);
            }
            Err(error) => return Err(error),
        }

        let closest = self.find_node(*self.id());

        debug!(
            seed = seed.address(),
            closest = closest.len(),
            routing_table_size = self.inner.routing_table().size(),
            "Bootstrapped"
        );

        Ok(closest)
    }

    /// Stop serving requests.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Block until this node stops serving, after [Self::shutdown] or a
    /// fatal error, which is returned.
    pub fn block_until_shutdown(self) -> Result<()> {
        match self.handle {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                Err(Error::IO(std::io::Error::other("node thread panicked")))
            }),
            None => Ok(()),
        }
    }
}

/// State shared between the node handles and the transport threads.
#[derive(Debug)]
struct Inner {
    contact: Contact,
    alpha: usize,
    rpc: Rpc,
    routing_table: Arc<Mutex<RoutingTable>>,
    value_store: Arc<dyn ValueStore>,
    /// Drained by [check_replacements].
    replacement_sender: Sender<ReplacementCheck>,
}

impl Inner {
    fn routing_table(&self) -> MutexGuard<'_, RoutingTable> {
        lock(&self.routing_table)
    }

    fn observe(&self, contact: Contact) {
        // Bind first, so the lock is released before sending.
        let check = self.routing_table().observe(contact);

        if let Some(check) = check {
            if let Err(error) = self.replacement_sender.send(check) {
                // Nobody left to ping, keep the bucket as it is.
                self.routing_table().apply_replacement(error.into_inner(), true);
            }
        }
    }

    /// Send a request, and observe the responder.
    fn call(&self, to: &Contact, request_type: RequestTypeSpecific) -> Result<ResponseSpecific> {
        let response = self.rpc.request(to, request_type)?;

        self.observe(response.header.sender.clone());

        Ok(response)
    }

    fn find_node_at(&self, contact: &Contact, target: Id) -> Result<Vec<Contact>> {
        let response = self.call(
            contact,
            RequestTypeSpecific::FindNode(FindNodeRequestArguments { target }),
        )?;

        response
            .closer_nodes()
            .map(<[Contact]>::to_vec)
            .ok_or(Error::InvalidMessage("Expected a find_node response"))
    }

    fn find_value_at(&self, contact: &Contact, key: Id) -> Result<FindValueResponseArguments> {
        let response = self.call(
            contact,
            RequestTypeSpecific::FindValue(FindValueRequestArguments { target: key }),
        )?;

        match response.response_type {
            ResponseTypeSpecific::FindValue(arguments) => Ok(arguments),
            _ => Err(Error::InvalidMessage("Expected a find_value response")),
        }
    }

    fn response(&self, response_type: ResponseTypeSpecific) -> ResponseSpecific {
        ResponseSpecific {
            header: self.rpc.header().clone(),
            response_type,
        }
    }
}

impl RequestHandler for Inner {
    fn handle_request(&self, request: RequestSpecific) -> Result<ResponseSpecific> {
        let RequestSpecific {
            header,
            request_type,
        } = request;

        if header.network_id != self.rpc.network_id() {
            debug!(
                from = header.sender.address(),
                remote = %header.network_id,
                "Rejected request from another network"
            );

            return Err(Error::NetworkMismatch {
                local: self.rpc.network_id().to_string(),
                remote: header.network_id,
            });
        }

        trace!(
            context = "handle_request",
            from = header.sender.address(),
            method = request_type.method_name()
        );

        self.observe(header.sender);

        let response_type = match request_type {
            RequestTypeSpecific::Ping => ResponseTypeSpecific::Ping,
            RequestTypeSpecific::FindNode(FindNodeRequestArguments { target }) => {
                ResponseTypeSpecific::FindNode(FindNodeResponseArguments {
                    contacts: self.routing_table().closest(&target, BUCKET_SIZE),
                })
            }
            RequestTypeSpecific::FindValue(FindValueRequestArguments { target }) => {
                match self.value_store.get(&target)? {
                    Some(value) => {
                        ResponseTypeSpecific::FindValue(FindValueResponseArguments::Value(value))
                    }
                    None => ResponseTypeSpecific::FindValue(FindValueResponseArguments::Contacts(
                        self.routing_table().closest(&target, BUCKET_SIZE),
                    )),
                }
            }
        };

        Ok(self.response(response_type))
    }
}

fn lock(routing_table: &Mutex<RoutingTable>) -> MutexGuard<'_, RoutingTable> {
    routing_table
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Pings the least recently seen contact of full buckets, away from the
/// request path, until the node is dropped.
fn check_replacements(
    rpc: Rpc,
    routing_table: Arc<Mutex<RoutingTable>>,
    checks: Receiver<ReplacementCheck>,
) {
    for check in checks.iter() {
        let alive = rpc.request(check.oldest(), RequestTypeSpecific::Ping).is_ok();

        trace!(
            oldest = check.oldest().address(),
            candidate = check.candidate().address(),
            alive,
            "Replacement check"
        );

        lock(&routing_table).apply_replacement(check, alive);
    }
}

#[derive(Debug)]
/// Create a testnet of Kademlia nodes on a [SimNetwork], to run tests
/// without touching the network.
pub struct Testnet {
    pub network: SimNetwork,
    pub bootstrap: Vec<Contact>,
    pub nodes: Vec<Node>,
}

impl Testnet {
    /// Create `count` nodes, each bootstrapping off the first one.
    pub fn new(count: usize) -> Result<Testnet> {
        let network = SimNetwork::new();
        let mut nodes: Vec<Node> = vec![];
        let mut bootstrap = vec![];

        for i in 0..count {
            let builder = Node::builder().transport(Arc::new(network.clone()));

            if i == 0 {
                let node = builder.build()?;
                bootstrap.push(node.contact().clone());
                nodes.push(node)
            } else {
                let node = builder.bootstrap(&bootstrap).build()?;
                nodes.push(node)
            }
        }

        Ok(Self {
            network,
            bootstrap,
            nodes,
        })
    }

    /// Create `count` nodes that all observed each other, without any lookups.
    pub fn fully_connected(count: usize) -> Result<Testnet> {
        let network = SimNetwork::new();

        let nodes = (0..count)
            .map(|_| Node::builder().transport(Arc::new(network.clone())).build())
            .collect::<Result<Vec<_>>>()?;

        for node in &nodes {
            for other in &nodes {
                node.observe(other.contact().clone());
            }
        }

        let bootstrap = nodes.first().map(|node| node.contact().clone()).into_iter().collect();

        Ok(Self {
            network,
            bootstrap,
            nodes,
        })
    }

    /// Shut every node down.
    pub fn shutdown(self) -> Result<()> {
        for node in &self.nodes {
            node.shutdown();
        }

        for node in self.nodes {
            node.block_until_shutdown()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;
    use std::time::Instant;

    use super::*;
    use crate::common::{ID_BITS, ID_SIZE};

    fn sim_node(network: &SimNetwork) -> NodeBuilder {
        Node::builder().transport(Arc::new(network.clone()))
    }

    /// Answers every request with an error, after a while.
    #[derive(Debug)]
    struct Slow(Duration);

    impl RequestHandler for Slow {
        fn handle_request(&self, _request: RequestSpecific) -> Result<ResponseSpecific> {
            thread::sleep(self.0);

            Err(Error::InvalidMessage("Too slow"))
        }
    }

    /// An id sharing no prefix with the zero id.
    fn far_id(last_byte: u8) -> Id {
        let mut bytes = [0_u8; ID_SIZE];
        bytes[0] = 0x80;
        bytes[ID_SIZE - 1] = last_byte;

        Id::from_bytes(bytes).unwrap()
    }

    #[test]
    fn shutdown() {
        let node = Node::builder()
            .transport(Arc::new(SimNetwork::new()))
            .build()
            .unwrap();

        let clone = node.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));

            clone.shutdown();
        });

        node.block_until_shutdown().unwrap();
    }

    #[test]
    fn ping_observes_both_ways() {
        let network = SimNetwork::new();
        let a = sim_node(&network).build().unwrap();
        let b = sim_node(&network).build().unwrap();

        a.ping(b.contact()).unwrap();

        assert!(a.routing_table().contains(b.id()));
        assert!(b.routing_table().contains(a.id()));
    }

    #[test]
    fn find_node_at() {
        let testnet = Testnet::fully_connected(10).unwrap();
        let a = &testnet.nodes[0];
        let b = &testnet.nodes[1];

        let target = Id::random();
        let contacts = a.find_node_at(b.contact(), target).unwrap();

        assert_eq!(contacts, b.closest(&target, BUCKET_SIZE));
    }

    #[test]
    fn reject_other_network() {
        let network = SimNetwork::new();
        let a = sim_node(&network).build().unwrap();
        let b = sim_node(&network).network_id("other").build().unwrap();

        let result = a.ping(b.contact());

        match result {
            Err(Error::NetworkMismatch { local, remote }) => {
                assert_eq!(local, "kademlia");
                assert_eq!(remote, "other");
            }
            other => panic!("unexpected {other:?}"),
        }

        // Neither side learned about the other.
        assert!(a.routing_table().is_empty());
        assert!(b.routing_table().is_empty());
    }

    #[test]
    fn find_value_at() {
        let network = SimNetwork::new();
        let store = Arc::new(MemoryStore::default());
        let key = Id::random();
        store.insert(key, "hello");

        let a = sim_node(&network).build().unwrap();
        let b = sim_node(&network).value_store(store).build().unwrap();

        assert_eq!(
            a.find_value_at(b.contact(), key).unwrap(),
            FindValueResponseArguments::Value("hello".to_string())
        );
        assert!(matches!(
            a.find_value_at(b.contact(), Id::random()).unwrap(),
            FindValueResponseArguments::Contacts(_)
        ));
    }

    #[test]
    fn empty_lookup() {
        let network = SimNetwork::new();
        let node = sim_node(&network).build().unwrap();

        assert!(node.find_node(Id::random()).is_empty());
        assert!(node.find_value(Id::random()).value.is_none());
    }

    #[test]
    fn unreachable_bootstrap() {
        let network = SimNetwork::new();
        let node = sim_node(&network).build().unwrap();

        // Nothing is bound there.
        let seed = Contact::new(Id::random(), "sim:1");

        assert!(node.bootstrap(&seed).unwrap().is_empty());
        assert!(node.routing_table().is_empty());
    }

    #[test]
    fn testnet_bootstraps() {
        let testnet = Testnet::new(20).unwrap();

        for node in &testnet.nodes {
            assert!(!node.routing_table().is_empty());
            assert!(!node.routing_table().contains(node.id()));
        }

        let ids: HashSet<_> = testnet.nodes.iter().map(|n| *n.id()).collect();
        assert_eq!(ids.len(), 20);

        testnet.shutdown().unwrap();
    }

    #[test]
    fn replacement_check_does_not_delay_replies() {
        let network = SimNetwork::new();

        let slow: Arc<dyn RequestHandler> = Arc::new(Slow(Duration::from_millis(500)));
        let endpoint = network.bind(None).unwrap();
        let slow_address = endpoint.local_addr().to_string();
        let _listener = endpoint.serve(slow.clone(), Duration::from_secs(1)).unwrap();

        let a = sim_node(&network)
            .id(Id::from_bytes([0_u8; ID_SIZE]).unwrap())
            .build()
            .unwrap();
        for i in 0..BUCKET_SIZE as u8 {
            a.observe(Contact::new(far_id(i), slow_address.as_str()));
        }
        assert_eq!(a.routing_table().bucket(0).unwrap().size(), BUCKET_SIZE);

        let b = sim_node(&network).id(far_id(0xff)).build().unwrap();

        let start = Instant::now();
        b.ping(a.contact()).unwrap();
        assert!(start.elapsed() < Duration::from_millis(250));

        // The oldest contact fails to answer, so `b` takes its place.
        let deadline = Instant::now() + Duration::from_secs(5);
        while !a.routing_table().contains(b.id()) {
            assert!(Instant::now() < deadline, "oldest contact was never replaced");
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!a.routing_table().contains(&far_id(0)));
        assert_eq!(a.routing_table().size(), BUCKET_SIZE);
    }

    #[test]
    fn concurrent_observe() {
        let network = SimNetwork::new();
        let node = sim_node(&network).build().unwrap();

        let contacts: Vec<Contact> = (0..15)
            .map(|i| Contact::new(Id::random(), format!("sim:{}", 5000 + i)))
            .collect();

        thread::scope(|scope| {
            for t in 0..8 {
                let node = node.clone();
                let contacts = &contacts;

                scope.spawn(move || {
                    for round in 0..200 {
                        let contact = &contacts[(t + round) % contacts.len()];
                        node.observe(contact.clone());

                        let closest = node.closest(contact.id(), BUCKET_SIZE);
                        assert_eq!(closest.first(), Some(contact));

                        let unique: HashSet<_> = closest.iter().map(|c| *c.id()).collect();
                        assert_eq!(unique.len(), closest.len());
                    }
                });
            }
        });

        let table = node.routing_table();
        assert_eq!(table.size(), contacts.len());

        for contact in &contacts {
            assert!(table.contains(contact.id()));
        }
        for index in 0..ID_BITS {
            let bucket = table.bucket(index).unwrap();
            let unique: HashSet<_> = bucket.iter().map(|c| *c.id()).collect();
            assert_eq!(unique.len(), bucket.size());
        }
    }

    #[test]
    fn info() {
        let network = SimNetwork::new();
        let id = Id::random();
        let node = sim_node(&network)
            .id(id)
            .network_id("test")
            .build()
            .unwrap();

        let info = node.info();

        assert_eq!(info.id(), &id);
        assert_eq!(info.local_addr(), node.local_addr());
        assert_eq!(info.network_id(), "test");
        assert_eq!(info.routing_table_size(), 0);
    }
}
