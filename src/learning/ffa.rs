//! General (possibly nondeterministic) frequency automata.
//!
//! Weights are observation counts, not probabilities. States live in an
//! arena and are addressed by opaque [`StateId`] handles; merging states is
//! an index union, no re-keying involved. Transition storage is uniform --
//! `state -> symbol -> transitions` -- whether or not the automaton is
//! currently deterministic.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::wfa::{SymbolKey, Transition, WeightedAutomaton};

/// Opaque handle of a state in a [`FrequencyAutomaton`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(u32);

impl StateId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Frequency transition. `label` records the minimal training-item index at
/// which this structural transition first appeared; merging two edges keeps
/// the minimum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreqTransition<A> {
    pub src: StateId,
    pub dest: StateId,
    pub symbol: A,
    pub weight: u64,
    pub label: u64,
}

/// Frequency automaton over symbols `A`.
#[derive(Debug, Clone)]
pub struct FrequencyAutomaton<A> {
    alive: Vec<bool>,
    trans: Vec<BTreeMap<A, Vec<FreqTransition<A>>>>,
    initials: BTreeMap<StateId, u64>,
    finals: BTreeMap<StateId, u64>,
}

impl<A: SymbolKey> Default for FrequencyAutomaton<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: SymbolKey> FrequencyAutomaton<A> {
    pub fn new() -> Self {
        Self {
            alive: Vec::new(),
            trans: Vec::new(),
            initials: BTreeMap::new(),
            finals: BTreeMap::new(),
        }
    }

    pub fn add_state(&mut self) -> StateId {
        let id = StateId(self.alive.len() as u32);
        self.alive.push(true);
        self.trans.push(BTreeMap::new());
        id
    }

    pub fn is_alive(&self, state: StateId) -> bool {
        self.alive.get(state.index()).copied().unwrap_or(false)
    }

    /// Alive states in ascending handle order.
    pub fn states(&self) -> Vec<StateId> {
        self.alive
            .iter()
            .enumerate()
            .filter(|(_, alive)| **alive)
            .map(|(i, _)| StateId(i as u32))
            .collect()
    }

    pub fn state_count(&self) -> usize {
        self.alive.iter().filter(|alive| **alive).count()
    }

    pub fn initials(&self) -> &BTreeMap<StateId, u64> {
        &self.initials
    }

    pub fn finals(&self) -> &BTreeMap<StateId, u64> {
        &self.finals
    }

    pub fn bump_initial(&mut self, state: StateId, by: u64) {
        *self.initials.entry(state).or_insert(0) += by;
    }

    pub fn bump_final(&mut self, state: StateId, by: u64) {
        *self.finals.entry(state).or_insert(0) += by;
    }

    pub fn transitions_from(&self, state: StateId) -> &BTreeMap<A, Vec<FreqTransition<A>>> {
        &self.trans[state.index()]
    }

    /// All transitions of the automaton, grouped nowhere in particular.
    pub fn transition_list(&self) -> Vec<FreqTransition<A>> {
        let mut list = Vec::new();
        for (i, by_symbol) in self.trans.iter().enumerate() {
            if !self.alive[i] {
                continue;
            }
            for transitions in by_symbol.values() {
                list.extend(transitions.iter().cloned());
            }
        }
        list
    }

    /// Add a transition, merging with a structurally equal edge
    /// (same source, destination and symbol): weights sum, labels keep the
    /// minimum.
    pub fn add_transition(&mut self, src: StateId, dest: StateId, symbol: A, weight: u64, label: u64) {
        let slot = self.trans[src.index()].entry(symbol.clone()).or_default();
        if let Some(existing) = slot.iter_mut().find(|tr| tr.dest == dest) {
            existing.weight += weight;
            existing.label = existing.label.min(label);
            return;
        }
        slot.push(FreqTransition {
            src,
            dest,
            symbol,
            weight,
            label,
        });
    }

    /// The unique successor over `symbol`, when the automaton is
    /// deterministic at `state`.
    pub fn deterministic_successor(&self, state: StateId, symbol: &A) -> Option<StateId> {
        self.trans[state.index()]
            .get(symbol)
            .and_then(|v| v.first())
            .map(|tr| tr.dest)
    }

    pub(crate) fn transition_mut(&mut self, state: StateId, symbol: &A) -> Option<&mut FreqTransition<A>> {
        self.trans[state.index()].get_mut(symbol).and_then(|v| v.first_mut())
    }

    /// Successors of `state`, optionally restricted to one symbol.
    pub fn successors(&self, state: StateId, symbol: Option<&A>) -> BTreeSet<StateId> {
        let mut succ = BTreeSet::new();
        if !self.is_alive(state) {
            return succ;
        }
        for (sym, transitions) in &self.trans[state.index()] {
            if let Some(only) = symbol {
                if sym != only {
                    continue;
                }
            }
            succ.extend(transitions.iter().map(|tr| tr.dest));
        }
        succ
    }

    pub fn successors_set(&self, states: &BTreeSet<StateId>) -> BTreeSet<StateId> {
        let mut succ = BTreeSet::new();
        for st in states {
            succ.extend(self.successors(*st, None));
        }
        succ
    }

    /// Fixed point of `successors_set` starting from `states`.
    pub fn reachable_states(&self, states: &BTreeSet<StateId>) -> BTreeSet<StateId> {
        let mut reach = states.clone();
        loop {
            let next = self.successors_set(&reach);
            if next.is_subset(&reach) {
                return reach;
            }
            reach.extend(next);
        }
    }

    /// Collapse a set of states into its smallest member: every transition
    /// endpoint is redirected, duplicate edges recombine (weights summed,
    /// min label), and initial/final counts fold into the representative.
    pub fn merge_states(&mut self, states: &BTreeSet<StateId>) {
        let rep = match states.iter().next() {
            Some(rep) => *rep,
            None => return,
        };
        let remap = |s: StateId| if states.contains(&s) { rep } else { s };

        let old = self.transition_list();
        for by_symbol in &mut self.trans {
            by_symbol.clear();
        }
        for st in states {
            if *st != rep {
                self.alive[st.index()] = false;
            }
        }
        for tr in old {
            self.add_transition(remap(tr.src), remap(tr.dest), tr.symbol, tr.weight, tr.label);
        }

        self.initials = Self::fold_counts(&self.initials, states, rep);
        self.finals = Self::fold_counts(&self.finals, states, rep);
    }

    fn fold_counts(
        counts: &BTreeMap<StateId, u64>,
        merged: &BTreeSet<StateId>,
        rep: StateId,
    ) -> BTreeMap<StateId, u64> {
        let mut folded = BTreeMap::new();
        let mut total = 0;
        for (st, count) in counts {
            if merged.contains(st) {
                total += count;
            } else {
                folded.insert(*st, *count);
            }
        }
        if total > 0 {
            folded.insert(rep, total);
        }
        folded
    }

    /// Merge every equivalence class of the given partition.
    pub fn merge_equivalent(&mut self, classes: &[BTreeSet<StateId>]) {
        for class in classes {
            self.merge_states(class);
        }
    }

    /// Remove states unreachable from the initial states. Forward
    /// reachability only; co-accessibility is not required here.
    pub fn trim(&mut self) {
        let start: BTreeSet<StateId> = self.initials.keys().copied().collect();
        let reach = self.reachable_states(&start);
        for st in self.states() {
            if !reach.contains(&st) {
                self.alive[st.index()] = false;
                self.trans[st.index()].clear();
                self.initials.remove(&st);
                self.finals.remove(&st);
            }
        }
    }

    /// Automaton with every transition reversed and initial/final counts
    /// swapped.
    pub fn inverse(&self) -> Self {
        let mut inv = Self {
            alive: self.alive.clone(),
            trans: vec![BTreeMap::new(); self.trans.len()],
            initials: self.finals.clone(),
            finals: self.initials.clone(),
        };
        for tr in self.transition_list() {
            inv.add_transition(tr.dest, tr.src, tr.symbol, tr.weight, tr.label);
        }
        inv
    }

    /// Visit frequency of a state: its initial count plus the weight of all
    /// incoming transitions.
    pub fn state_freq(&self, state: StateId) -> u64 {
        let mut freq = self.initials.get(&state).copied().unwrap_or(0);
        for tr in self.transition_list() {
            if tr.dest == state {
                freq += tr.weight;
            }
        }
        freq
    }

    /// States with no outgoing transitions.
    pub fn leaves(&self) -> BTreeSet<StateId> {
        self.states()
            .into_iter()
            .filter(|st| self.trans[st.index()].values().all(Vec::is_empty))
            .collect()
    }

    /// At most one initial state and one transition per `(state, symbol)`.
    pub fn is_deterministic(&self) -> bool {
        if self.initials.len() > 1 {
            return false;
        }
        for st in self.states() {
            for transitions in self.trans[st.index()].values() {
                if transitions.len() > 1 {
                    return false;
                }
            }
        }
        true
    }

    /// Raw counts as a weighted automaton (renamed to contiguous states).
    pub fn to_wfa(&self) -> WeightedAutomaton<usize, A> {
        let transitions = self
            .transition_list()
            .into_iter()
            .map(|tr| {
                Transition::new(tr.src.index(), tr.dest.index(), tr.symbol, tr.weight as f64)
            })
            .collect();
        let initials = self
            .initials
            .iter()
            .map(|(s, c)| (s.index(), *c as f64))
            .collect();
        let finals = self
            .finals
            .iter()
            .map(|(s, c)| (s.index(), *c as f64))
            .collect();
        WeightedAutomaton::new(transitions, initials, finals, None).rename_states().0
    }

    /// Frequencies converted to probabilities: per state the outgoing and
    /// final counts are normalized by their sum, initial counts by the total
    /// initial count. The result is renamed to contiguous states.
    pub fn normalize(&self) -> WeightedAutomaton<usize, A> {
        let mut denom: BTreeMap<StateId, u64> = BTreeMap::new();
        for st in self.states() {
            let outgoing: u64 = self.trans[st.index()]
                .values()
                .flatten()
                .map(|tr| tr.weight)
                .sum();
            let fin = self.finals.get(&st).copied().unwrap_or(0);
            denom.insert(st, outgoing + fin);
        }

        let transitions = self
            .transition_list()
            .into_iter()
            .map(|tr| {
                let d = denom.get(&tr.src).copied().unwrap_or(0).max(1);
                Transition::new(
                    tr.src.index(),
                    tr.dest.index(),
                    tr.symbol,
                    tr.weight as f64 / d as f64,
                )
            })
            .collect();

        let ini_total: u64 = self.initials.values().sum();
        let initials = self
            .initials
            .iter()
            .map(|(s, c)| (s.index(), *c as f64 / ini_total.max(1) as f64))
            .collect();
        let finals = self
            .finals
            .iter()
            .map(|(s, c)| {
                let d = denom.get(s).copied().unwrap_or(0).max(1);
                (s.index(), *c as f64 / d as f64)
            })
            .collect();

        WeightedAutomaton::new(transitions, initials, finals, None).rename_states().0
    }
}
