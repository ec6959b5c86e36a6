use std::vec::IntoIter;

use crate::common::{Contact, Id, BUCKET_SIZE};

/// Contacts sorted by XOR distance to a target, without duplicates.
#[derive(Debug, Clone)]
pub struct ClosestNodes {
    target: Id,
    nodes: Vec<Contact>,
}

impl ClosestNodes {
    pub fn new(target: Id) -> Self {
        Self {
            target,
            nodes: Vec::with_capacity(BUCKET_SIZE * 4),
        }
    }

    // === Getters ===

    pub fn target(&self) -> Id {
        self.target
    }

    pub fn nodes(&self) -> &[Contact] {
        &self.nodes
    }

    // === Public Methods ===

    /// Insert a contact at its distance rank, ignoring it if its [Id] is already present.
    pub fn add(&mut self, node: Contact) {
        if self.contains(node.id()) {
            return;
        }

        let seek = node.distance(&self.target);

        if let Err(pos) = self
            .nodes
            .binary_search_by(|prope| prope.distance(&self.target).cmp(&seek))
        {
            self.nodes.insert(pos, node)
        }
    }

    pub fn remove(&mut self, id: &Id) {
        let seek = id.xor(&self.target);

        if let Ok(pos) = self
            .nodes
            .binary_search_by(|prope| prope.distance(&self.target).cmp(&seek))
        {
            self.nodes.remove(pos);
        }
    }

    pub fn contains(&self, id: &Id) -> bool {
        let seek = id.xor(&self.target);

        self.nodes
            .binary_search_by(|prope| prope.distance(&self.target).cmp(&seek))
            .is_ok()
    }

    /// Drop everything past the `count` closest.
    pub fn truncate(&mut self, count: usize) {
        self.nodes.truncate(count)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl IntoIterator for ClosestNodes {
    type Item = Contact;
    type IntoIter = IntoIter<Contact>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_iter()
    }
}

impl<'a> IntoIterator for &'a ClosestNodes {
    type Item = &'a Contact;
    type IntoIter = std::slice::Iter<'a, Contact>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_contact() -> Contact {
        Contact::new(Id::random(), "127.0.0.1:6000")
    }

    #[test]
    fn add() {
        let target = Id::random();

        let mut closest_nodes = ClosestNodes::new(target);

        for _ in 0..10 {
            let node = random_contact();
            closest_nodes.add(node.clone());
            closest_nodes.add(node);
        }

        assert_eq!(closest_nodes.nodes().len(), 10);

        let distances = closest_nodes
            .nodes()
            .iter()
            .map(|n| n.distance(&target))
            .collect::<Vec<_>>();

        let mut sorted = distances.clone();
        sorted.sort();

        assert_eq!(sorted, distances);
    }

    #[test]
    fn remove() {
        let target = Id::random();
        let mut closest_nodes = ClosestNodes::new(target);

        let nodes: Vec<_> = (0..5).map(|_| random_contact()).collect();
        for node in &nodes {
            closest_nodes.add(node.clone());
        }

        closest_nodes.remove(nodes[2].id());
        closest_nodes.remove(&Id::random());

        assert_eq!(closest_nodes.len(), 4);
        assert!(!closest_nodes.contains(nodes[2].id()));
        assert!(closest_nodes.contains(nodes[0].id()));
    }

    #[test]
    fn truncate_keeps_the_closest() {
        let target = Id::random();
        let mut closest_nodes = ClosestNodes::new(target);

        let mut nodes: Vec<_> = (0..50).map(|_| random_contact()).collect();
        for node in &nodes {
            closest_nodes.add(node.clone());
        }

        closest_nodes.truncate(BUCKET_SIZE);

        nodes.sort_by_key(|n| n.distance(&target));
        nodes.truncate(BUCKET_SIZE);

        assert_eq!(closest_nodes.into_iter().collect::<Vec<_>>(), nodes);
    }
}
