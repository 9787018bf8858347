//! Deterministic k-ary broadcast schedule (spec §4.10). Builds a rooted
//! `(k+1)`-ary tree over a group's members from `(source, members, k, nonce)`
//! and answers the tree queries Rollercoaster needs (§4.11).

use std::collections::HashMap;
use std::hash::Hash;

use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha12Rng;

/// One round of the schedule: `(sender, receiver)` pairs that fire
/// simultaneously in round `t`.
pub type Round<N> = (usize, Vec<(N, N)>);

pub struct Schedule<N> {
    source: N,
    rounds: Vec<Round<N>>,
    parent: HashMap<N, N>,
    children: HashMap<N, Vec<N>>,
}

impl<N: Clone + Eq + Hash> Schedule<N> {
    /// `members` need not include `source`; it is prepended if missing and
    /// deduplicated either way, preserving the caller's relative order
    /// unless `nonce != 0`, in which case the tail is deterministically
    /// shuffled by a nonce-seeded RNG independent of the simulation's RNG
    /// stream (spec §4.10).
    pub fn new(source: N, members: &[N], k: usize, nonce: u64) -> Self {
        assert!(k >= 1, "k must be at least 1");

        let mut tail: Vec<N> = members.iter().filter(|m| **m != source).cloned().collect();
        if nonce != 0 {
            let mut rng = ChaCha12Rng::seed_from_u64(nonce);
            tail.shuffle(&mut rng);
        }
        let mut ordered = Vec::with_capacity(tail.len() + 1);
        ordered.push(source.clone());
        ordered.extend(tail);

        let rounds = Self::gen_rounds(&ordered, k);

        let mut parent = HashMap::new();
        let mut children: HashMap<N, Vec<N>> = HashMap::new();
        children.entry(source.clone()).or_default();
        for (_, pairs) in &rounds {
            for (sender, receiver) in pairs {
                parent.insert(receiver.clone(), sender.clone());
                children.entry(receiver.clone()).or_default();
                children.entry(sender.clone()).or_default().push(receiver.clone());
            }
        }

        Self {
            source,
            rounds,
            parent,
            children,
        }
    }

    fn gen_rounds(ordered: &[N], k: usize) -> Vec<Round<N>> {
        let n = ordered.len();
        if n <= 1 {
            return Vec::new();
        }
        // T = ceil(log_{k+1}(n)), computed by integer exponent growth to
        // avoid floating-point edge cases at exact powers of (k+1).
        let mut t_rounds = 0usize;
        let mut p_bound: usize = 1;
        while p_bound < n {
            t_rounds += 1;
            p_bound *= k + 1;
        }

        let mut rounds = Vec::with_capacity(t_rounds);
        let mut p = 1usize;
        for t in 0..t_rounds {
            let w = std::cmp::min(k * p, n - p);
            let mut pairs = Vec::with_capacity(w);
            for idx in 0..w {
                let a = ordered[idx / k].clone();
                let b = ordered[p + idx].clone();
                pairs.push((a, b));
            }
            rounds.push((t, pairs));
            p *= k + 1;
        }
        rounds
    }

    pub fn source(&self) -> &N {
        &self.source
    }

    pub fn rounds(&self) -> &[Round<N>] {
        &self.rounds
    }

    pub fn direct_children(&self, node: &N) -> Vec<N> {
        self.children.get(node).cloned().unwrap_or_default()
    }

    /// Pre-order descendants, excluding `node` itself.
    pub fn recursive_children(&self, node: &N) -> Vec<N> {
        let mut out = Vec::new();
        self.collect_recursive_children(node, &mut out);
        out
    }

    fn collect_recursive_children(&self, node: &N, out: &mut Vec<N>) {
        for child in self.direct_children(node) {
            out.push(child.clone());
            self.collect_recursive_children(&child, out);
        }
    }

    /// Ancestors up to and including `source`, nearest first.
    pub fn parents(&self, node: &N) -> Vec<N> {
        let mut out = Vec::new();
        let mut current = node.clone();
        while let Some(parent) = self.parent.get(&current) {
            out.push(parent.clone());
            current = parent.clone();
        }
        out
    }

    /// Edge count on the path `root -> node`, assuming `node` is in the
    /// subtree of `root`.
    pub fn hops_between(&self, root: &N, node: &N) -> usize {
        let mut count = 0;
        let mut current = node.clone();
        while current != *root {
            count += 1;
            current = self
                .parent
                .get(&current)
                .expect("hops_between: node not in schedule subtree of root")
                .clone();
        }
        count
    }

    pub fn is_leaf(&self, node: &N) -> bool {
        self.direct_children(node).is_empty()
    }

    /// Deterministic fallback ordering is `[source] ++ receivers-in-
    /// S-appearance-order`; returns the element immediately after `failed`,
    /// wrapping back to `source`.
    pub fn next_receiver(&self, failed: &N) -> N {
        let mut order = vec![self.source.clone()];
        for (_, pairs) in &self.rounds {
            for (_, receiver) in pairs {
                if !order.contains(receiver) {
                    order.push(receiver.clone());
                }
            }
        }
        let pos = order
            .iter()
            .position(|n| n == failed)
            .expect("next_receiver: failed node is not a schedule member");
        order[(pos + 1) % order.len()].clone()
    }

    /// Estimates the round-trip time from sending to `root` to receiving
    /// the ACK from `final_node` (spec §4.10): one message delay to root,
    /// at each intermediary a queueing delay for self-ACK plus per-child
    /// queueing, and one message delay for the return ACK.
    pub fn estimated_rtt(&self, root: &N, final_node: &N, t_message: f64, t_queue: f64) -> f64 {
        let mut total = t_message;
        let mut current = final_node.clone();
        loop {
            let num_children = self.direct_children(&current).len();
            total += t_message + t_queue * (1.0 + num_children as f64);
            if current == *root {
                break;
            }
            current = self
                .parent
                .get(&current)
                .expect("estimated_rtt: final_node is not in the subtree of root")
                .clone();
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule_k1_over_7() -> Schedule<u32> {
        let members: Vec<u32> = (0..7).collect();
        Schedule::new(0, &members, 1, 0)
    }

    #[test]
    fn k1_schedule_matches_expected_rounds() {
        let s = schedule_k1_over_7();
        let flat: Vec<(usize, Vec<(u32, u32)>)> = s.rounds().to_vec();
        assert_eq!(
            flat,
            vec![
                (0, vec![(0, 1)]),
                (1, vec![(0, 2), (1, 3)]),
                (2, vec![(0, 4), (1, 5), (2, 6)]),
            ]
        );
    }

    #[test]
    fn next_receiver_wraps_to_source() {
        let s = schedule_k1_over_7();
        assert_eq!(s.next_receiver(&6), 0);
        assert_eq!(s.next_receiver(&1), 2);
    }

    #[test]
    fn recursive_children_of_source_is_everyone_else() {
        let s = schedule_k1_over_7();
        let mut children = s.recursive_children(&0);
        children.sort_unstable();
        assert_eq!(children, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn parents_of_leaf_is_chain_to_source() {
        let s = schedule_k1_over_7();
        assert_eq!(s.parents(&6), vec![2, 0]);
    }

    #[test]
    fn estimated_rtt_matches_paper_example() {
        let s = schedule_k1_over_7();
        assert_eq!(s.estimated_rtt(&4, &4, 10.0, 1.0), 21.0);
        assert_eq!(s.estimated_rtt(&2, &6, 10.0, 1.0), 33.0);
    }

    #[test]
    fn estimated_rtt_is_monotone_in_depth() {
        let s = schedule_k1_over_7();
        let root_rtt = s.estimated_rtt(&0, &0, 10.0, 1.0);
        for descendant in s.recursive_children(&0) {
            let rtt = s.estimated_rtt(&0, &descendant, 10.0, 1.0);
            assert!(rtt >= root_rtt);
        }
    }

    #[test]
    fn schedule_completeness_every_non_source_member_appears_once() {
        let members: Vec<u32> = (0..20).collect();
        for k in 1..4 {
            let s = Schedule::new(0u32, &members, k, 7);
            let mut receivers: Vec<u32> = s
                .rounds()
                .iter()
                .flat_map(|(_, pairs)| pairs.iter().map(|(_, r)| *r))
                .collect();
            receivers.sort_unstable();
            let mut expected: Vec<u32> = members.iter().filter(|&&m| m != 0).cloned().collect();
            expected.sort_unstable();
            assert_eq!(receivers, expected);
        }
    }

    #[test]
    fn is_leaf_true_iff_no_children() {
        let s = schedule_k1_over_7();
        assert!(!s.is_leaf(&0));
        assert!(s.is_leaf(&6));
    }
}
