//! Frequency prefix trees built from training strings.
//!
//! A [`PrefixTree`] is a [`FrequencyAutomaton`] shaped as a tree rooted in a
//! single initial state, enriched with per-state suffix counts. The suffix
//! counts drive [`PrefixTree::suffix_minimize`], which collapses states whose
//! outgoing suffix distributions are identical.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::learning::ffa::{FrequencyAutomaton, StateId};
use crate::wfa::SymbolKey;

/// Prefix tree acceptor with frequencies and suffix statistics.
#[derive(Debug, Clone)]
pub struct PrefixTree<A> {
    automaton: FrequencyAutomaton<A>,
    root: StateId,
    suffix_counts: HashMap<StateId, BTreeMap<Vec<A>, u64>>,
}

impl<A: SymbolKey> Default for PrefixTree<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: SymbolKey> PrefixTree<A> {
    pub fn new() -> Self {
        let mut automaton = FrequencyAutomaton::new();
        let root = automaton.add_state();
        Self {
            automaton,
            root,
            suffix_counts: HashMap::new(),
        }
    }

    pub fn root(&self) -> StateId {
        self.root
    }

    pub fn automaton(&self) -> &FrequencyAutomaton<A> {
        &self.automaton
    }

    pub fn into_automaton(self) -> FrequencyAutomaton<A> {
        self.automaton
    }

    /// Insert one training string. Every edge along the path gains weight 1
    /// (fresh edges start at weight 1 carrying `label`), the endpoint's final
    /// count is incremented, and every visited state records the remaining
    /// suffix, the endpoint recording the empty suffix.
    pub fn add_string(&mut self, word: &[A], label: u64) {
        self.automaton.bump_initial(self.root, 1);
        let mut act = self.root;
        for (i, sym) in word.iter().enumerate() {
            *self
                .suffix_counts
                .entry(act)
                .or_default()
                .entry(word[i..].to_vec())
                .or_insert(0) += 1;

            if let Some(tr) = self.automaton.transition_mut(act, sym) {
                tr.weight += 1;
                act = tr.dest;
            } else {
                let fresh = self.automaton.add_state();
                self.automaton.add_transition(act, fresh, sym.clone(), 1, label);
                act = fresh;
            }
        }
        *self
            .suffix_counts
            .entry(act)
            .or_default()
            .entry(Vec::new())
            .or_insert(0) += 1;
        self.automaton.bump_final(act, 1);
    }

    /// Insert a batch of strings, labeling each edge with the index of the
    /// string that created it.
    pub fn add_strings<W: AsRef<[A]>>(&mut self, words: &[W]) {
        for (i, word) in words.iter().enumerate() {
            self.add_string(word.as_ref(), i as u64);
        }
    }

    /// Number of transitions carrying the given label.
    pub fn count_label_edges(&self, label: u64) -> usize {
        self.automaton
            .transition_list()
            .iter()
            .filter(|tr| tr.label == label)
            .count()
    }

    /// Merge states whose normalized suffix distributions coincide, then
    /// drop whatever became unreachable. Distributions are compared exactly
    /// by cross-multiplying counts, so no floating point is involved.
    pub fn suffix_minimize(&mut self) {
        let mut classes: Vec<(&BTreeMap<Vec<A>, u64>, u64, BTreeSet<StateId>)> = Vec::new();
        let empty = BTreeMap::new();

        for st in self.automaton.states() {
            let counts = self.suffix_counts.get(&st).unwrap_or(&empty);
            let total: u64 = counts.values().sum();
            match classes
                .iter_mut()
                .find(|(other, other_total, _)| Self::same_distribution(counts, total, other, *other_total))
            {
                Some((_, _, members)) => {
                    members.insert(st);
                }
                None => classes.push((counts, total, BTreeSet::from([st]))),
            }
        }

        let partition: Vec<BTreeSet<StateId>> = classes
            .into_iter()
            .map(|(_, _, members)| members)
            .filter(|members| members.len() > 1)
            .collect();

        for class in &partition {
            let rep = match class.iter().next() {
                Some(rep) => *rep,
                None => continue,
            };
            let mut folded: BTreeMap<Vec<A>, u64> = BTreeMap::new();
            for st in class {
                if let Some(counts) = self.suffix_counts.remove(st) {
                    for (suffix, count) in counts {
                        *folded.entry(suffix).or_insert(0) += count;
                    }
                }
            }
            self.suffix_counts.insert(rep, folded);
        }

        self.automaton.merge_equivalent(&partition);
        self.automaton.trim();
    }

    fn same_distribution(
        a: &BTreeMap<Vec<A>, u64>,
        a_total: u64,
        b: &BTreeMap<Vec<A>, u64>,
        b_total: u64,
    ) -> bool {
        if a.len() != b.len() {
            return false;
        }
        a.iter().all(|(suffix, ca)| {
            b.get(suffix)
                .is_some_and(|cb| ca * b_total == cb * a_total)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(items: &[&str]) -> Vec<Vec<char>> {
        items.iter().map(|w| w.chars().collect()).collect()
    }

    #[test]
    fn builds_shared_prefix_once() {
        let mut tree = PrefixTree::new();
        tree.add_strings(&words(&["ab", "ab", "ac"]));
        let aut = tree.automaton();

        // root, the 'a' state and two leaves
        assert_eq!(aut.state_count(), 4);
        assert_eq!(aut.initials().get(&tree.root()), Some(&3));

        let a_state = aut.deterministic_successor(tree.root(), &'a').unwrap();
        let b_state = aut.deterministic_successor(a_state, &'b').unwrap();
        let transitions = aut.transitions_from(tree.root());
        assert_eq!(transitions[&'a'][0].weight, 3);
        assert_eq!(aut.transitions_from(a_state)[&'b'][0].weight, 2);
        assert_eq!(aut.transitions_from(a_state)[&'c'][0].weight, 1);
        assert_eq!(aut.finals().get(&b_state), Some(&2));
    }

    #[test]
    fn empty_string_counts_at_root() {
        let mut tree: PrefixTree<char> = PrefixTree::new();
        tree.add_string(&[], 0);
        let aut = tree.automaton();
        assert_eq!(aut.state_count(), 1);
        assert_eq!(aut.finals().get(&tree.root()), Some(&1));
        assert_eq!(aut.initials().get(&tree.root()), Some(&1));
    }

    #[test]
    fn labels_mark_originating_string() {
        let mut tree = PrefixTree::new();
        tree.add_strings(&words(&["ab", "cd"]));
        // string 0 created two edges, string 1 two more
        assert_eq!(tree.count_label_edges(0), 2);
        assert_eq!(tree.count_label_edges(1), 2);
    }

    #[test]
    fn suffix_minimize_merges_leaves() {
        let mut tree = PrefixTree::new();
        tree.add_strings(&words(&["ab", "ab", "ac"]));
        tree.suffix_minimize();
        let aut = tree.automaton();

        // the two leaves carry the same (empty-suffix) distribution
        assert_eq!(aut.state_count(), 3);
        let a_state = aut.deterministic_successor(tree.root(), &'a').unwrap();
        let leaf = aut.deterministic_successor(a_state, &'b').unwrap();
        assert_eq!(aut.deterministic_successor(a_state, &'c'), Some(leaf));
        assert_eq!(aut.finals().get(&leaf), Some(&3));
    }

    #[test]
    fn suffix_minimize_merges_proportional_interiors() {
        // both 'a' and 'b' branches continue with the same suffix behavior
        let mut tree = PrefixTree::new();
        tree.add_strings(&words(&["ax", "ax", "bx", "bx"]));
        tree.suffix_minimize();
        // root, merged interior, merged leaf
        assert_eq!(tree.automaton().state_count(), 3);
    }

    #[test]
    fn minimized_tree_stays_deterministic() {
        let mut tree = PrefixTree::new();
        tree.add_strings(&words(&["ab", "ab", "ac", "b"]));
        tree.suffix_minimize();
        assert!(tree.automaton().is_deterministic());
    }
}
