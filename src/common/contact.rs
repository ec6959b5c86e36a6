//! Struct and implementation of the Contact entry in the Kademlia routing table
use std::hash::{Hash, Hasher};

use crate::common::Id;

#[derive(Debug, Clone)]
/// Contact entry in Kademlia routing table: an [Id] and the address it is
/// reachable at.
///
/// Equality and hashing only consider the [Id].
pub struct Contact {
    id: Id,
    address: String,
}

impl Contact {
    /// Creates a new Contact from an id and an address.
    pub fn new(id: Id, address: impl Into<String>) -> Contact {
        Contact {
            id,
            address: address.into(),
        }
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// XOR distance between this contact's [Id] and `target`.
    pub fn distance(&self, target: &Id) -> Id {
        self.id.xor(target)
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Contact {}

impl Hash for Contact {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
