//! Alergia state-merging over frequency prefix trees.
//!
//! Red states are settled, blue states are merge candidates on the frontier.
//! Each round picks the smallest blue state with enough evidence, scans the
//! red states for a statistically compatible one, and either merges the pair
//! or promotes the blue state. The result keeps raw frequencies; convert with
//! [`FrequencyAutomaton::normalize`] afterwards.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::learning::ffa::{FrequencyAutomaton, StateId};
use crate::learning::fpt::PrefixTree;
use crate::wfa::SymbolKey;

/// Run Alergia on a prefix tree. `alpha` controls the width of the
/// compatibility margin, `t0` is the minimum visit frequency a blue state
/// needs before it is considered at all; the loop terminates once no blue
/// state qualifies.
pub fn alergia<A: SymbolKey>(tree: PrefixTree<A>, alpha: f64, t0: u64) -> FrequencyAutomaton<A> {
    let mut aut = tree.into_automaton();
    let mut red: BTreeSet<StateId> = aut.initials().keys().copied().collect();

    loop {
        red.retain(|st| aut.is_alive(*st));
        let frontier: BTreeSet<StateId> = aut
            .successors_set(&red)
            .difference(&red)
            .copied()
            .collect();
        let Some(blue) = frontier
            .into_iter()
            .find(|st| aut.state_freq(*st) >= t0)
        else {
            break;
        };

        let target = red
            .iter()
            .copied()
            .find(|r| compatible(&aut, *r, blue, alpha, &mut BTreeSet::new()));
        match target {
            Some(r) => {
                debug!(red = %r, blue = %blue, "merging compatible pair");
                let folded = stochastic_merge(&mut aut, &BTreeSet::from([r, blue]));
                // determinization may fold a red state into a smaller
                // representative; the representative inherits red status
                red = red.iter().map(|st| resolve(&folded, *st)).collect();
            }
            None => {
                debug!(blue = %blue, "promoting to red");
                red.insert(blue);
            }
        }
    }

    aut
}

/// Hoeffding-style two-sample compatibility test. The local final and
/// per-symbol frequency rates of the two states must agree within
/// `sqrt(0.5 * ln(2/alpha) * (1/n1 + 1/n2))`, and the test recurses into
/// successor pairs reached over a shared symbol. A state with zero evidence
/// is compatible with anything.
fn compatible<A: SymbolKey>(
    aut: &FrequencyAutomaton<A>,
    q1: StateId,
    q2: StateId,
    alpha: f64,
    visited: &mut BTreeSet<(StateId, StateId)>,
) -> bool {
    if !visited.insert((q1, q2)) {
        return true;
    }
    let n1 = aut.state_freq(q1) as f64;
    let n2 = aut.state_freq(q2) as f64;
    if n1 == 0.0 || n2 == 0.0 {
        return true;
    }
    let margin = (0.5 * (2.0 / alpha).ln() * (1.0 / n1 + 1.0 / n2)).sqrt();

    let f1 = aut.finals().get(&q1).copied().unwrap_or(0) as f64;
    let f2 = aut.finals().get(&q2).copied().unwrap_or(0) as f64;
    if (f1 / n1 - f2 / n2).abs() > margin {
        return false;
    }

    let mut symbols: BTreeSet<&A> = aut.transitions_from(q1).keys().collect();
    symbols.extend(aut.transitions_from(q2).keys());

    for sym in symbols {
        let w1 = symbol_weight(aut, q1, sym) as f64;
        let w2 = symbol_weight(aut, q2, sym) as f64;
        if (w1 / n1 - w2 / n2).abs() > margin {
            return false;
        }
        if let (Some(d1), Some(d2)) = (
            aut.deterministic_successor(q1, sym),
            aut.deterministic_successor(q2, sym),
        ) {
            if !compatible(aut, d1, d2, alpha, visited) {
                return false;
            }
        }
    }
    true
}

fn symbol_weight<A: SymbolKey>(aut: &FrequencyAutomaton<A>, state: StateId, sym: &A) -> u64 {
    aut.transitions_from(state)
        .get(sym)
        .map(|trs| trs.iter().map(|tr| tr.weight).sum())
        .unwrap_or(0)
}

/// Merge a state set, then restore determinism by folding: whenever a state
/// ends up with two transitions over one symbol, their destinations are
/// merged in turn, repeating until no conflict remains. Unreachable remnants
/// are trimmed at the end. Returns which states were folded into which
/// representative; entries chain when a representative is itself folded by a
/// later round.
pub fn stochastic_merge<A: SymbolKey>(
    aut: &mut FrequencyAutomaton<A>,
    states: &BTreeSet<StateId>,
) -> BTreeMap<StateId, StateId> {
    let mut folded = BTreeMap::new();
    record_merge(&mut folded, states);
    aut.merge_states(states);
    loop {
        let mut conflict: Option<BTreeSet<StateId>> = None;
        'scan: for st in aut.states() {
            for transitions in aut.transitions_from(st).values() {
                if transitions.len() > 1 {
                    conflict = Some(transitions.iter().map(|tr| tr.dest).collect());
                    break 'scan;
                }
            }
        }
        match conflict {
            Some(set) => {
                record_merge(&mut folded, &set);
                aut.merge_states(&set);
            }
            None => break,
        }
    }
    aut.trim();
    folded
}

fn record_merge(folded: &mut BTreeMap<StateId, StateId>, states: &BTreeSet<StateId>) {
    if let Some(rep) = states.iter().next().copied() {
        for st in states.iter().skip(1) {
            folded.insert(*st, rep);
        }
    }
}

/// Follow the fold map down to the surviving representative. Representatives
/// are always the smallest member of their merge set, so chains strictly
/// decrease and terminate.
fn resolve(folded: &BTreeMap<StateId, StateId>, mut state: StateId) -> StateId {
    while let Some(rep) = folded.get(&state) {
        state = *rep;
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(items: &[&str]) -> PrefixTree<char> {
        let words: Vec<Vec<char>> = items.iter().map(|w| w.chars().collect()).collect();
        let mut tree = PrefixTree::new();
        tree.add_strings(&words);
        tree
    }

    #[test]
    fn merges_compatible_branch_into_two_states() {
        let mut t = tree(&["ab", "ab", "ac"]);
        t.suffix_minimize();
        let learned = alergia(t, 0.05, 1);

        assert_eq!(learned.state_count(), 2);
        assert!(learned.is_deterministic());

        // root gained a self-loop over 'a'
        let root = *learned.initials().keys().next().unwrap();
        assert_eq!(learned.deterministic_successor(root, &'a'), Some(root));
    }

    #[test]
    fn learned_probabilities_follow_frequencies() {
        let mut t = tree(&["ab", "ab", "ac"]);
        t.suffix_minimize();
        let pa = alergia(t, 0.05, 1).normalize();

        // root: 'a' 3, 'b' 2, 'c' 1 out of 6; the leaf accepts with 1.0
        let p_ab = pa.string_prob_deterministic(&['a', 'b']).unwrap();
        assert!((p_ab - (0.5f64 * (1.0 / 3.0)).ln()).abs() < 1e-12);
        let p_b = pa.string_prob_deterministic(&['b']).unwrap();
        assert!((p_b - (1.0f64 / 3.0).ln()).abs() < 1e-12);
    }

    #[test]
    fn incompatible_states_are_promoted() {
        // half the sample is empty, half is "a": the root accepts half the
        // time while the leaf always accepts, far outside the margin
        let items: Vec<&str> = std::iter::repeat("a")
            .take(50)
            .chain(std::iter::repeat("").take(50))
            .collect();
        let t = tree(&items);
        let learned = alergia(t, 0.05, 1);

        assert_eq!(learned.state_count(), 2);
        let root = *learned.initials().keys().next().unwrap();
        let leaf = learned.deterministic_successor(root, &'a').unwrap();
        assert_ne!(root, leaf);
        assert_eq!(learned.finals().get(&leaf), Some(&50));
    }

    #[test]
    fn low_frequency_frontier_stops_the_loop() {
        let t = tree(&["ab", "ab", "ac"]);
        let before = t.automaton().state_count();
        let learned = alergia(t, 0.05, 100);
        assert_eq!(learned.state_count(), before);
    }

    #[test]
    fn stochastic_merge_folds_nondeterminism() {
        let mut aut: FrequencyAutomaton<char> = FrequencyAutomaton::new();
        let root = aut.add_state();
        let x = aut.add_state();
        let y = aut.add_state();
        let z = aut.add_state();
        aut.bump_initial(root, 2);
        aut.add_transition(root, x, 'a', 1, 0);
        aut.add_transition(root, y, 'a', 1, 1);
        aut.add_transition(x, z, 'b', 1, 0);
        aut.add_transition(y, z, 'b', 1, 1);
        aut.bump_final(z, 2);

        stochastic_merge(&mut aut, &BTreeSet::from([x, y]));
        assert!(aut.is_deterministic());
        assert_eq!(aut.state_count(), 3);
        let merged = aut.deterministic_successor(root, &'a').unwrap();
        assert_eq!(aut.transitions_from(root)[&'a'][0].weight, 2);
        assert_eq!(aut.transitions_from(merged)[&'b'][0].weight, 2);
    }

    #[test]
    fn stochastic_merge_reports_folded_representatives() {
        // merging x and y also folds their 'b' successors z and w
        let mut aut: FrequencyAutomaton<char> = FrequencyAutomaton::new();
        let root = aut.add_state();
        let x = aut.add_state();
        let y = aut.add_state();
        let z = aut.add_state();
        let w = aut.add_state();
        aut.bump_initial(root, 2);
        aut.add_transition(root, x, 'a', 1, 0);
        aut.add_transition(root, y, 'a', 1, 1);
        aut.add_transition(x, z, 'b', 1, 0);
        aut.add_transition(y, w, 'b', 1, 1);
        aut.bump_final(z, 1);
        aut.bump_final(w, 1);

        let folded = stochastic_merge(&mut aut, &BTreeSet::from([x, y]));
        assert_eq!(folded.get(&y), Some(&x));
        assert_eq!(folded.get(&w), Some(&z));
        assert!(!aut.is_alive(w));
        assert_eq!(resolve(&folded, w), z);
        assert_eq!(resolve(&folded, z), z);
    }

    #[test]
    fn resolve_follows_fold_chains() {
        let mut aut: FrequencyAutomaton<char> = FrequencyAutomaton::new();
        let a = aut.add_state();
        let b = aut.add_state();
        let c = aut.add_state();
        let folded = BTreeMap::from([(c, b), (b, a)]);
        assert_eq!(resolve(&folded, c), a);
        assert_eq!(resolve(&folded, b), a);
        assert_eq!(resolve(&folded, a), a);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let build = || {
            let mut t = tree(&["ab", "ab", "ac", "b", "b"]);
            t.suffix_minimize();
            alergia(t, 0.05, 1)
        };
        let first = build();
        let second = build();
        assert_eq!(first.state_count(), second.state_count());
        assert_eq!(first.transition_list().len(), second.transition_list().len());
        for (a, b) in first.transition_list().iter().zip(second.transition_list()) {
            assert_eq!(a.src, b.src);
            assert_eq!(a.dest, b.dest);
            assert_eq!(a.symbol, b.symbol);
            assert_eq!(a.weight, b.weight);
        }
    }
}
