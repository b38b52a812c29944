//! A discrete probability density function over keyed elements, supporting
//! weighted sampling together with O(log n) insertion, reweighting and
//! removal.

use std::collections::HashMap;
use std::hash::Hash;

/// Maps keys to positive weights and draws a key with probability
/// proportional to its weight.
///
/// Keys occupy slots of a Fenwick tree over the slot weights; a side index
/// maps each key back to its slot, and freed slots are reused. `choose`
/// performs a single O(log n) descent over the tree.
pub struct DiscretePdf<K> {
    /// Fenwick tree over slot weights, 1-based.
    tree: Vec<f64>,
    /// Current weight per slot, zero for free slots.
    weights: Vec<f64>,
    /// Occupant per slot.
    slots: Vec<Option<K>>,
    index: HashMap<K, usize>,
    free: Vec<usize>,
}

impl<K: Copy + Eq + Hash> Default for DiscretePdf<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq + Hash> DiscretePdf<K> {
    pub fn new() -> Self {
        DiscretePdf {
            tree: vec![0.0],
            weights: Vec::new(),
            slots: Vec::new(),
            index: HashMap::new(),
            free: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn contains(&self, key: K) -> bool {
        self.index.contains_key(&key)
    }

    /// Sum of all weights.
    pub fn total(&self) -> f64 {
        self.prefix(self.weights.len())
    }

    pub fn insert(&mut self, key: K, weight: f64) {
        assert!(!self.contains(key), "key inserted twice");
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.grow();
                self.weights.len() - 1
            }
        };
        self.slots[slot] = Some(key);
        self.index.insert(key, slot);
        self.add(slot, weight);
    }

    pub fn update(&mut self, key: K, weight: f64) {
        let slot = *self.index.get(&key).expect("update of an unknown key");
        let delta = weight - self.weights[slot];
        self.add(slot, delta);
    }

    pub fn remove(&mut self, key: K) {
        let slot = self.index.remove(&key).expect("removal of an unknown key");
        let weight = self.weights[slot];
        self.add(slot, -weight);
        self.weights[slot] = 0.0;
        self.slots[slot] = None;
        self.free.push(slot);
    }

    /// Returns the key owning the bucket that contains `u * total()`, for
    /// `u` in `[0, 1)`.
    pub fn choose(&self, u: f64) -> K {
        assert!(!self.is_empty(), "choose on an empty pdf");
        debug_assert!((0.0..1.0).contains(&u));
        let n = self.weights.len();
        let target = u * self.total();

        // find the largest slot count whose weight prefix stays <= target
        let mut pos = 0usize;
        let mut remaining = target;
        let mut mask = 1usize << (usize::BITS - 1 - n.leading_zeros());
        while mask > 0 {
            let next = pos + mask;
            if next <= n && self.tree[next] <= remaining {
                remaining -= self.tree[next];
                pos = next;
            }
            mask >>= 1;
        }

        // rounding at the last bucket boundary can step past the end or
        // onto a freed slot; fall back to the nearest occupied slot below
        let mut slot = pos.min(n - 1);
        loop {
            if let Some(key) = self.slots[slot] {
                return key;
            }
            slot = slot.checked_sub(1).expect("pdf slots out of sync");
        }
    }

    /// Appends one zero-weight slot, extending the Fenwick tree in place.
    fn grow(&mut self) {
        self.weights.push(0.0);
        self.slots.push(None);
        let i = self.weights.len();
        let lsb = i & i.wrapping_neg();
        let below = self.prefix(i - 1) - self.prefix(i - lsb);
        self.tree.push(below);
    }

    fn add(&mut self, slot: usize, delta: f64) {
        self.weights[slot] += delta;
        let mut i = slot + 1;
        while i < self.tree.len() {
            self.tree[i] += delta;
            i += i & i.wrapping_neg();
        }
    }

    /// Sum of the weights of the first `count` slots.
    fn prefix(&self, count: usize) -> f64 {
        let mut sum = 0.0;
        let mut i = count;
        while i > 0 {
            sum += self.tree[i];
            i -= i & i.wrapping_neg();
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn bucket_boundaries() {
        let mut pdf = DiscretePdf::new();
        pdf.insert('a', 1.0);
        pdf.insert('b', 3.0);
        assert_eq!(pdf.total(), 4.0);
        assert_eq!(pdf.choose(0.0), 'a');
        assert_eq!(pdf.choose(0.24), 'a');
        assert_eq!(pdf.choose(0.25), 'b');
        assert_eq!(pdf.choose(0.999), 'b');
    }

    #[test]
    fn update_moves_boundaries() {
        let mut pdf = DiscretePdf::new();
        pdf.insert('a', 1.0);
        pdf.insert('b', 1.0);
        pdf.update('b', 3.0);
        assert_eq!(pdf.choose(0.2), 'a');
        assert_eq!(pdf.choose(0.25), 'b');
    }

    #[test]
    fn remove_reuses_slots() {
        let mut pdf = DiscretePdf::new();
        pdf.insert('a', 1.0);
        pdf.insert('b', 2.0);
        pdf.remove('a');
        assert_eq!(pdf.len(), 1);
        assert_eq!(pdf.choose(0.0), 'b');
        assert_eq!(pdf.choose(0.99), 'b');

        pdf.insert('c', 2.0);
        assert_eq!(pdf.len(), 2);
        assert_eq!(pdf.total(), 4.0);
        assert!(pdf.contains('c'));
        assert!(!pdf.contains('a'));
        let (lo, hi) = (pdf.choose(0.1), pdf.choose(0.9));
        assert_ne!(lo, hi);
    }

    #[test]
    fn choose_hits_every_slot_after_growth() {
        let mut pdf = DiscretePdf::new();
        for k in 0u32..100 {
            pdf.insert(k, 1.0);
        }
        for k in 0u32..100 {
            let u = (k as f64 + 0.5) / 100.0;
            assert_eq!(pdf.choose(u), k);
        }
    }

    #[test]
    fn empirical_frequencies() {
        let mut pdf = DiscretePdf::new();
        pdf.insert('a', 1.0);
        pdf.insert('b', 3.0);
        let mut rng = SmallRng::seed_from_u64(7);
        let draws = 10_000;
        let hits = (0..draws)
            .filter(|_| pdf.choose(rng.gen::<f64>()) == 'b')
            .count();
        let freq = hits as f64 / draws as f64;
        assert!((0.73..=0.77).contains(&freq), "freq {freq}");
    }

    #[test]
    #[should_panic(expected = "removal of an unknown key")]
    fn remove_unknown_key() {
        let mut pdf = DiscretePdf::new();
        pdf.insert('a', 1.0);
        pdf.remove('b');
    }
}
