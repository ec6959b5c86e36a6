use crate::Id;

/// Information about this node.
#[derive(Debug, Clone)]
pub struct Info {
    pub(crate) id: Id,
    pub(crate) local_addr: String,
    pub(crate) network_id: String,
    pub(crate) routing_table_size: usize,
}

impl Info {
    /// This Node's [Id]
    pub fn id(&self) -> &Id {
        &self.id
    }
    /// Address this node is listening on, and advertising to its peers.
    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }
    /// The network id this node accepts messages for.
    pub fn network_id(&self) -> &str {
        &self.network_id
    }
    /// Number of contacts in the routing table at the time of the call.
    pub fn routing_table_size(&self) -> usize {
        self.routing_table_size
    }
}
