//! Iterative lookups with a bounded number of outstanding probes.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::thread;

use tracing::{debug, trace};

use super::ClosestNodes;
use crate::common::{Contact, Id, BUCKET_SIZE};
use crate::Result;

/// What a single successful probe learned.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// Contacts the probed peer knows close to the target.
    Contacts(Vec<Contact>),
    /// The probed peer holds the value stored under the target.
    Value(String),
}

/// Result of an [IterativeQuery].
#[derive(Debug, Clone, Default)]
pub struct LookupOutcome {
    /// Up to [BUCKET_SIZE] contacts closest to the target, sorted by distance.
    pub closest: Vec<Contact>,
    /// The first value found, for find-value lookups.
    pub value: Option<String>,
}

/// An iterative process of concurrently probing the closest known unprobed
/// contacts to the target, and adding the closer contacts they return as new
/// candidates, until there is nobody left to probe.
///
/// Probes run on `alpha` worker threads. A single coordinator owns the
/// frontier, the seen set and the result set, and is the only one mutating
/// them.
#[derive(Debug)]
pub struct IterativeQuery {
    alpha: usize,
    /// Stop dispatching once a probe returns a value.
    stop_on_value: bool,
    /// Unprobed candidates, closest first.
    frontier: BinaryHeap<Reverse<Candidate>>,
    /// Every [Id] ever added as a candidate, including our own.
    seen: HashSet<Id>,
    closest: ClosestNodes,
    value: Option<String>,
}

impl IterativeQuery {
    /// Create a query for `target`. `local_id` is never probed nor returned.
    pub fn new(local_id: Id, target: Id, alpha: usize) -> Self {
        let mut seen = HashSet::new();
        seen.insert(local_id);

        trace!(?target, alpha, "New Query");

        Self {
            alpha: alpha.max(1),
            stop_on_value: false,
            frontier: BinaryHeap::new(),
            seen,
            closest: ClosestNodes::new(target),
            value: None,
        }
    }

    /// Stop dispatching new probes after the first [ProbeOutcome::Value].
    pub fn stop_on_value(mut self) -> Self {
        self.stop_on_value = true;
        self
    }

    // === Getters ===

    pub fn target(&self) -> Id {
        self.closest.target()
    }

    // === Public Methods ===

    /// Add a contact to probe, unless it was already seen.
    pub fn add_candidate(&mut self, contact: Contact) {
        if self.seen.insert(*contact.id()) {
            self.frontier
                .push(Reverse(Candidate::new(&self.closest.target(), contact.clone())));
            self.closest.add(contact);
        }
    }

    /// Run the query to completion, calling `probe` for every dispatched contact.
    ///
    /// A failed probe is not retried, and its contact is dropped from the
    /// result.
    pub fn run<P>(mut self, probe: P) -> LookupOutcome
    where
        P: Fn(&Contact) -> Result<ProbeOutcome> + Sync,
    {
        if self.frontier.is_empty() {
            debug!(target = ?self.target(), "Nothing to probe");
            return LookupOutcome::default();
        }

        let (job_sender, job_receiver) = flume::bounded::<Contact>(self.alpha);
        let (done_sender, done_receiver) = flume::unbounded::<(Contact, Result<ProbeOutcome>)>();

        thread::scope(|scope| {
            for _ in 0..self.alpha {
                let job_receiver = job_receiver.clone();
                let done_sender = done_sender.clone();
                let probe = &probe;

                scope.spawn(move || {
                    for contact in job_receiver.iter() {
                        let outcome = probe(&contact);

                        if done_sender.send((contact, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(done_sender);

            let mut outstanding = 0;

            loop {
                while outstanding < self.alpha && !self.stopped() {
                    let Some(Reverse(candidate)) = self.frontier.pop() else {
                        break;
                    };

                    trace!(to = candidate.contact.address(), "Probing");

                    if job_sender.send(candidate.contact).is_err() {
                        break;
                    }
                    outstanding += 1;
                }

                if outstanding == 0 {
                    break;
                }

                let Ok((contact, outcome)) = done_receiver.recv() else {
                    break;
                };
                outstanding -= 1;

                self.complete(contact, outcome);
            }

            // Workers exit once the job channel is closed.
            drop(job_sender);
        });

        let target = self.target();
        let mut closest = self.closest;
        closest.truncate(BUCKET_SIZE);

        debug!(
            ?target,
            closest = closest.len(),
            seen = self.seen.len(),
            found_value = self.value.is_some(),
            "Query done"
        );

        LookupOutcome {
            closest: closest.into_iter().collect(),
            value: self.value,
        }
    }

    // === Private Methods ===

    fn stopped(&self) -> bool {
        self.stop_on_value && self.value.is_some()
    }

    fn complete(&mut self, contact: Contact, outcome: Result<ProbeOutcome>) {
        match outcome {
            Ok(ProbeOutcome::Contacts(contacts)) => {
                for found in contacts {
                    self.add_candidate(found);
                }
            }
            Ok(ProbeOutcome::Value(value)) => {
                if self.value.is_none() {
                    debug!(from = contact.address(), "Found value");
                    self.value = Some(value);
                }
            }
            Err(error) => {
                debug!(?error, to = contact.address(), "Probe failed");
                self.closest.remove(contact.id());
            }
        }
    }
}

/// A frontier entry, ordered by distance to the target.
#[derive(Debug)]
struct Candidate {
    distance: Id,
    contact: Contact,
}

impl Candidate {
    fn new(target: &Id, contact: Contact) -> Self {
        Self {
            distance: contact.distance(target),
            contact,
        }
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance.cmp(&other.distance)
    }
}
