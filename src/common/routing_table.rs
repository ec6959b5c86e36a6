//! Simplified Kademlia routing table

use crate::common::{Contact, Id, KBucket, TouchOutcome, ID_BITS};

#[derive(Debug, Clone)]
/// Simplified Kademlia routing table
///
/// Holds exactly [ID_BITS] k-buckets, where bucket `i` contains the contacts
/// sharing exactly `i` leading bits with this table's [Id].
pub struct RoutingTable {
    id: Id,
    buckets: Vec<KBucket>,
}

/// A full bucket was asked to take a new contact, and its least recently seen
/// contact has to be pinged before anything changes.
///
/// Pass the ping result to [RoutingTable::apply_replacement].
#[derive(Debug, Clone)]
pub struct ReplacementCheck {
    bucket_index: usize,
    oldest: Contact,
    candidate: Contact,
}

impl ReplacementCheck {
    /// The contact to ping.
    pub fn oldest(&self) -> &Contact {
        &self.oldest
    }

    /// The contact waiting to take its place.
    pub fn candidate(&self) -> &Contact {
        &self.candidate
    }
}

impl RoutingTable {
    /// Create a new [RoutingTable] with a given id.
    pub fn new(id: Id) -> Self {
        RoutingTable {
            id,
            buckets: vec![KBucket::new(); ID_BITS],
        }
    }

    /// Returns the [Id] of this node, where the distance is measured from.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Returns the bucket at `index`, if `index < ID_BITS`.
    pub fn bucket(&self, index: usize) -> Option<&KBucket> {
        self.buckets.get(index)
    }

    // === Public Methods ===

    /// Record that `contact` was seen alive.
    ///
    /// Contacts with this table's own [Id] are ignored. If the contact's
    /// bucket is full, nothing changes yet and a [ReplacementCheck] is returned.
    pub fn observe(&mut self, contact: Contact) -> Option<ReplacementCheck> {
        let bucket_index = self.id.shared_prefix_len(contact.id())?;

        match self.buckets[bucket_index].touch(contact) {
            TouchOutcome::Full { oldest, candidate } => Some(ReplacementCheck {
                bucket_index,
                oldest,
                candidate,
            }),
            TouchOutcome::Inserted | TouchOutcome::Refreshed | TouchOutcome::Discarded => None,
        }
    }

    /// Complete a [ReplacementCheck]: evict the oldest contact for the
    /// candidate if it did not respond, keep it otherwise.
    ///
    /// Returns `true` if the candidate was inserted.
    pub fn apply_replacement(&mut self, check: ReplacementCheck, oldest_alive: bool) -> bool {
        let ReplacementCheck {
            bucket_index,
            oldest,
            candidate,
        } = check;

        self.buckets[bucket_index].apply_replacement(oldest.id(), candidate, oldest_alive)
    }

    /// Remove a contact from this routing table.
    pub fn remove(&mut self, id: &Id) {
        if let Some(index) = self.id.shared_prefix_len(id) {
            self.buckets[index].remove(id)
        }
    }

    /// Returns up to `count` contacts closest to `target`, sorted by
    /// ascending XOR distance to it.
    pub fn closest(&self, target: &Id, count: usize) -> Vec<Contact> {
        let mut candidates: Vec<Contact> = Vec::with_capacity(count);

        let extend = |index: usize, candidates: &mut Vec<Contact>| {
            candidates.extend(self.buckets[index].iter().cloned());
        };

        match self.id.shared_prefix_len(target) {
            Some(prefix) => {
                // Bucket `prefix` shares more bits with the target than any other.
                extend(prefix, &mut candidates);

                // Contacts in all more specific buckets are at the same
                // order of magnitude from the target, so they go in together.
                if candidates.len() < count {
                    for index in prefix + 1..ID_BITS {
                        extend(index, &mut candidates);
                    }
                }

                // Each less specific bucket is further than the previous one.
                for index in (0..prefix).rev() {
                    if candidates.len() >= count {
                        break;
                    }
                    extend(index, &mut candidates);
                }
            }
            None => {
                for index in (0..ID_BITS).rev() {
                    if candidates.len() >= count {
                        break;
                    }
                    extend(index, &mut candidates);
                }
            }
        }

        candidates.sort_by_cached_key(|contact| contact.distance(target));
        candidates.truncate(count);

        candidates
    }

    /// Returns `true` if this routing table is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|bucket| bucket.is_empty())
    }

    /// Return the number of contacts in this routing table.
    pub fn size(&self) -> usize {
        self.buckets.iter().map(KBucket::size).sum()
    }

    pub fn contains(&self, id: &Id) -> bool {
        match self.id.shared_prefix_len(id) {
            Some(index) => self.buckets[index].contains(id),
            None => false,
        }
    }

    /// Returns an iterator over the contacts in this routing table.
    pub fn nodes(&self) -> RoutingTableIterator<'_> {
        RoutingTableIterator {
            bucket_index: 0,
            node_index: 0,
            table: self,
        }
    }

    /// Export an owned vector of contacts from this routing table.
    pub fn to_owned_nodes(&self) -> Vec<Contact> {
        self.nodes().cloned().collect()
    }
}

pub struct RoutingTableIterator<'a> {
    bucket_index: usize,
    node_index: usize,
    table: &'a RoutingTable,
}

impl<'a> Iterator for RoutingTableIterator<'a> {
    type Item = &'a Contact;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(bucket) = self.table.buckets.get(self.bucket_index) {
            if let Some(contact) = bucket.iter().nth(self.node_index) {
                self.node_index += 1;

                return Some(contact);
            }

            self.node_index = 0;
            self.bucket_index += 1;
        }

        None
    }
}
