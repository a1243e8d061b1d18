//! Session keys and the session-id generator.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

use crate::types::ClientId;

/// Key of one client session: `(client, id)`.
///
/// Ordering is by `id` first, then by client. Equality needs both
/// fields, so two clients that happen to pick the same id never
/// collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub client: ClientId,
    pub id: u32,
}

impl SessionKey {
    pub fn new(client: ClientId, id: u32) -> Self {
        SessionKey { client, id }
    }
}

impl Ord for SessionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id
            .cmp(&other.id)
            .then_with(|| self.client.cmp(&other.client))
    }
}

impl PartialOrd for SessionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Monotonic session-id source.
///
/// Ids start at 1, never take the value 0, and wrap from `u32::MAX`
/// back to 1.
#[derive(Debug)]
pub struct SessionIdGenerator {
    last: AtomicU32,
}

impl Default for SessionIdGenerator {
    fn default() -> Self {
        SessionIdGenerator::new()
    }
}

impl SessionIdGenerator {
    pub fn new() -> Self {
        SessionIdGenerator::starting_after(0)
    }

    /// Generator whose next id is the successor of `last`.
    pub fn starting_after(last: u32) -> Self {
        SessionIdGenerator {
            last: AtomicU32::new(last),
        }
    }

    pub fn next_id(&self) -> u32 {
        let prev = match self.last.fetch_update(
            AtomicOrdering::SeqCst,
            AtomicOrdering::SeqCst,
            |cur| Some(successor(cur)),
        ) {
            Ok(prev) | Err(prev) => prev,
        };
        successor(prev)
    }
}

fn successor(id: u32) -> u32 {
    match id.wrapping_add(1) {
        0 => 1,
        next => next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn ids_start_at_one_and_increase() {
        let gen = SessionIdGenerator::new();
        assert_eq!(gen.next_id(), 1);
        assert_eq!(gen.next_id(), 2);
        assert_eq!(gen.next_id(), 3);
    }

    #[test]
    fn wraps_past_max_to_one_never_zero() {
        let gen = SessionIdGenerator::starting_after(u32::MAX - 2);
        assert_eq!(gen.next_id(), u32::MAX - 1);
        assert_eq!(gen.next_id(), u32::MAX);
        assert_eq!(gen.next_id(), 1);
        assert_eq!(gen.next_id(), 2);
    }

    #[test]
    fn no_repeats_before_wrap() {
        let gen = SessionIdGenerator::new();
        let mut prev = 0;
        for _ in 0..10_000 {
            let id = gen.next_id();
            assert_ne!(id, 0);
            assert!(id > prev);
            prev = id;
        }
    }

    #[test]
    fn keys_order_by_id_then_client() {
        let a = SessionKey::new(ClientId(9), 1);
        let b = SessionKey::new(ClientId(1), 2);
        let c = SessionKey::new(ClientId(2), 2);
        assert!(a < b);
        assert!(b < c);

        let mut map = BTreeMap::new();
        map.insert(c, "c");
        map.insert(a, "a");
        map.insert(b, "b");
        let order: Vec<_> = map.values().copied().collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn same_id_different_clients_are_distinct() {
        let a = SessionKey::new(ClientId(1), 7);
        let b = SessionKey::new(ClientId(2), 7);
        assert_ne!(a, b);
        assert_eq!(a, SessionKey::new(ClientId(1), 7));
    }
}
