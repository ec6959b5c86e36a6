//! Kbuckets
use std::slice::Iter;

use crate::common::{Contact, Id};

/// K = the default maximum size of a k-bucket.
pub const BUCKET_SIZE: usize = 20;

/// Kbuckets are similar to LRU caches that checks and evicts unresponsive nodes,
/// without dropping any responsive nodes in the process.
#[derive(Debug, Clone)]
pub struct KBucket {
    /// Contacts in the k-bucket, sorted by the least recently seen.
    contacts: Vec<Contact>,
    /// Set while the least recently seen contact is being pinged.
    replacement_pending: bool,
}

/// Result of [KBucket::touch].
#[derive(Debug, Clone, PartialEq)]
pub enum TouchOutcome {
    /// The contact was new and the bucket had room.
    Inserted,
    /// The contact was already known and is now the most recently seen.
    Refreshed,
    /// The bucket is full. `oldest` has to be pinged, and
    /// [KBucket::apply_replacement] called with the result.
    Full { oldest: Contact, candidate: Contact },
    /// The bucket is full and already waiting on a ping, the contact was dropped.
    Discarded,
}

impl KBucket {
    pub fn new() -> Self {
        KBucket {
            contacts: Vec::with_capacity(BUCKET_SIZE),
            replacement_pending: false,
        }
    }

    // === Public Methods ===

    pub fn touch(&mut self, incoming: Contact) -> TouchOutcome {
        if let Some(index) = self.position(incoming.id()) {
            // Keep the incoming one, in case the address changed.
            self.contacts.remove(index);
            self.contacts.push(incoming);

            TouchOutcome::Refreshed
        } else if !self.is_full() {
            self.contacts.push(incoming);

            TouchOutcome::Inserted
        } else if self.replacement_pending {
            TouchOutcome::Discarded
        } else {
            match self.contacts.first() {
                Some(oldest) => {
                    self.replacement_pending = true;

                    TouchOutcome::Full {
                        oldest: oldest.clone(),
                        candidate: incoming,
                    }
                }
                // Only reachable with a zero sized bucket.
                None => TouchOutcome::Discarded,
            }
        }
    }

    /// Finish a replacement check started by [Self::touch].
    ///
    /// Returns `true` if the candidate was inserted.
    pub fn apply_replacement(
        &mut self,
        oldest: &Id,
        candidate: Contact,
        oldest_alive: bool,
    ) -> bool {
        self.replacement_pending = false;

        if oldest_alive {
            if let Some(index) = self.position(oldest) {
                let oldest = self.contacts.remove(index);
                self.contacts.push(oldest);
            }

            return false;
        }

        self.remove(oldest);

        if self.contains(candidate.id()) || self.is_full() {
            return false;
        }

        self.contacts.push(candidate);
        true
    }

    pub fn remove(&mut self, id: &Id) {
        self.contacts.retain(|contact| contact.id() != id);
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.position(id).is_some()
    }

    /// Ordered copy of the contacts, least recently seen first.
    pub fn snapshot(&self) -> Vec<Contact> {
        self.contacts.clone()
    }

    pub fn size(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.contacts.len() >= BUCKET_SIZE
    }

    pub fn iter(&self) -> Iter<'_, Contact> {
        self.contacts.iter()
    }

    // === Private Methods ===

    fn position(&self, id: &Id) -> Option<usize> {
        self.contacts.iter().position(|contact| contact.id() == id)
    }
}

impl Default for KBucket {
    fn default() -> Self {
        Self::new()
    }
}
