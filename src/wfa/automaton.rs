//! Core weighted-finite-automaton representation and algebra.
//!
//! A [`WeightedAutomaton`] owns a transition list plus initial/final weight
//! maps; the state set is always derived from those, never stored separately.
//! Algebraic operations (product, trim, difference) are pure transforms
//! producing new automata, while `complete`, `set_ones` and the weight
//! setters mutate in place.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use thiserror::Error;

use super::{StateKey, SymbolKey};

/// Errors for contract violations on automaton operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WfaError {
    #[error("{operation} requires a deterministic automaton")]
    NotDeterministic { operation: &'static str },

    #[error("{operation} requires exactly one initial state, found {found}")]
    SingleInitialRequired {
        operation: &'static str,
        found: usize,
    },
}

/// A single weighted transition. Identity is `(src, dest, symbol)`; the
/// weight is the only mutable part.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<S, A> {
    pub src: S,
    pub dest: S,
    pub symbol: A,
    pub weight: f64,
}

impl<S, A> Transition<S, A> {
    pub fn new(src: S, dest: S, symbol: A, weight: f64) -> Self {
        Self {
            src,
            dest,
            symbol,
            weight,
        }
    }
}

/// Weighted finite automaton over states `S` and symbols `A`.
///
/// Multiple initial states are representable, though most operations assume
/// exactly one. An explicit alphabet may be attached; otherwise the alphabet
/// is derived from the transitions in first-occurrence order.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedAutomaton<S, A> {
    transitions: Vec<Transition<S, A>>,
    initials: BTreeMap<S, f64>,
    finals: BTreeMap<S, f64>,
    alphabet: Option<Vec<A>>,
}

impl<S: StateKey, A: SymbolKey> WeightedAutomaton<S, A> {
    pub fn new(
        transitions: Vec<Transition<S, A>>,
        initials: BTreeMap<S, f64>,
        finals: BTreeMap<S, f64>,
        alphabet: Option<Vec<A>>,
    ) -> Self {
        Self {
            transitions,
            initials,
            finals,
            alphabet,
        }
    }

    pub fn transitions(&self) -> &[Transition<S, A>] {
        &self.transitions
    }

    pub fn initials(&self) -> &BTreeMap<S, f64> {
        &self.initials
    }

    pub fn finals(&self) -> &BTreeMap<S, f64> {
        &self.finals
    }

    pub fn set_finals(&mut self, finals: BTreeMap<S, f64>) {
        self.finals = finals;
    }

    pub fn set_initials(&mut self, initials: BTreeMap<S, f64>) {
        self.initials = initials;
    }

    pub fn set_alphabet(&mut self, alphabet: Vec<A>) {
        self.alphabet = Some(alphabet);
    }

    /// Make every state final with accepting weight 1.0.
    pub fn set_all_finals(&mut self) {
        self.finals = self.states().into_iter().map(|s| (s, 1.0)).collect();
    }

    /// Set the weight of all transitions to 1.0.
    pub fn set_ones(&mut self) {
        for tr in &mut self.transitions {
            tr.weight = 1.0;
        }
    }

    /// Explicit alphabet if one was attached, otherwise the transition
    /// symbols in first-occurrence order.
    pub fn alphabet(&self) -> Vec<A> {
        if let Some(alph) = &self.alphabet {
            if !alph.is_empty() {
                return alph.clone();
            }
        }
        let mut seen = HashSet::new();
        let mut alph = Vec::new();
        for tr in &self.transitions {
            if seen.insert(tr.symbol.clone()) {
                alph.push(tr.symbol.clone());
            }
        }
        alph
    }

    /// All states, derived from initials, finals and transitions.
    pub fn states(&self) -> BTreeSet<S> {
        let mut states = BTreeSet::new();
        for s in self.initials.keys() {
            states.insert(s.clone());
        }
        for s in self.finals.keys() {
            states.insert(s.clone());
        }
        for tr in &self.transitions {
            states.insert(tr.src.clone());
            states.insert(tr.dest.clone());
        }
        states
    }

    pub fn state_count(&self) -> usize {
        self.states().len()
    }

    /// Transition indices grouped by source state.
    fn outgoing_index(&self) -> HashMap<S, Vec<usize>> {
        let mut idx: HashMap<S, Vec<usize>> = HashMap::new();
        for (i, tr) in self.transitions.iter().enumerate() {
            idx.entry(tr.src.clone()).or_default().push(i);
        }
        idx
    }

    /// Transition indices grouped by `(source, symbol)`.
    fn state_symbol_index(&self) -> HashMap<(S, A), Vec<usize>> {
        let mut idx: HashMap<(S, A), Vec<usize>> = HashMap::new();
        for (i, tr) in self.transitions.iter().enumerate() {
            idx.entry((tr.src.clone(), tr.symbol.clone()))
                .or_default()
                .push(i);
        }
        idx
    }

    /// Assign consecutive integers starting at 0 to the states, initial
    /// states first (in their iteration order). Returns the renamed
    /// automaton together with the original-to-renamed mapping, which
    /// matrix operations require.
    pub fn rename_states(&self) -> (WeightedAutomaton<usize, A>, HashMap<S, usize>) {
        let mut mapping: HashMap<S, usize> = HashMap::new();
        let mut count = 0usize;

        for s in self.initials.keys() {
            if !mapping.contains_key(s) {
                mapping.insert(s.clone(), count);
                count += 1;
            }
        }
        for s in self.states() {
            if !mapping.contains_key(&s) {
                mapping.insert(s, count);
                count += 1;
            }
        }

        let initials = self
            .initials
            .iter()
            .map(|(s, w)| (mapping[s], *w))
            .collect();
        let finals = self.finals.iter().map(|(s, w)| (mapping[s], *w)).collect();
        let transitions = self
            .transitions
            .iter()
            .map(|tr| Transition::new(mapping[&tr.src], mapping[&tr.dest], tr.symbol.clone(), tr.weight))
            .collect();

        (
            WeightedAutomaton::new(transitions, initials, finals, self.alphabet.clone()),
            mapping,
        )
    }

    /// Synchronized-symbol product of two automata. States of the result are
    /// pairs; only reachable pairs are constructed (breadth-first worklist,
    /// each pair enqueued once). The alphabet of the result is the
    /// intersection of the component alphabets.
    pub fn product<S2: StateKey>(
        &self,
        other: &WeightedAutomaton<S2, A>,
    ) -> WeightedAutomaton<(S, S2), A> {
        let mut initials: BTreeMap<(S, S2), f64> = BTreeMap::new();
        let mut queue: VecDeque<(S, S2)> = VecDeque::new();
        let mut seen: HashSet<(S, S2)> = HashSet::new();

        for (s1, w1) in &self.initials {
            for (s2, w2) in &other.initials {
                let st = (s1.clone(), s2.clone());
                initials.insert(st.clone(), w1 * w2);
                if seen.insert(st.clone()) {
                    queue.push_back(st);
                }
            }
        }

        let idx1 = self.outgoing_index();
        let idx2 = other.outgoing_index();
        let mut finals: BTreeMap<(S, S2), f64> = BTreeMap::new();
        let mut transitions: Vec<Transition<(S, S2), A>> = Vec::new();

        while let Some((s1, s2)) = queue.pop_front() {
            if let (Some(f1), Some(f2)) = (self.finals.get(&s1), other.finals.get(&s2)) {
                finals.insert((s1.clone(), s2.clone()), f1 * f2);
            }

            let out1 = idx1.get(&s1).map(Vec::as_slice).unwrap_or(&[]);
            let out2 = idx2.get(&s2).map(Vec::as_slice).unwrap_or(&[]);
            for &i in out1 {
                let t1 = &self.transitions[i];
                for &j in out2 {
                    let t2 = &other.transitions[j];
                    if t1.symbol != t2.symbol {
                        continue;
                    }
                    let dest = (t1.dest.clone(), t2.dest.clone());
                    transitions.push(Transition::new(
                        (s1.clone(), s2.clone()),
                        dest.clone(),
                        t1.symbol.clone(),
                        t1.weight * t2.weight,
                    ));
                    if seen.insert(dest.clone()) {
                        queue.push_back(dest);
                    }
                }
            }
        }

        let other_alph: HashSet<A> = other.alphabet().into_iter().collect();
        let alphabet = self
            .alphabet()
            .into_iter()
            .filter(|a| other_alph.contains(a))
            .collect();

        WeightedAutomaton::new(transitions, initials, finals, Some(alphabet))
    }

    fn bfs(start: &[S], edges: &HashMap<S, Vec<S>>) -> HashSet<S> {
        let mut visited: HashSet<S> = HashSet::new();
        let mut queue: VecDeque<S> = VecDeque::new();
        for s in start {
            if visited.insert(s.clone()) {
                queue.push_back(s.clone());
            }
        }
        while let Some(head) = queue.pop_front() {
            if let Some(succ) = edges.get(&head) {
                for dest in succ {
                    if visited.insert(dest.clone()) {
                        queue.push_back(dest.clone());
                    }
                }
            }
        }
        visited
    }

    /// States reachable from some initial state.
    pub fn accessible_states(&self) -> HashSet<S> {
        let mut edges: HashMap<S, Vec<S>> = HashMap::new();
        for tr in &self.transitions {
            edges.entry(tr.src.clone()).or_default().push(tr.dest.clone());
        }
        let start: Vec<S> = self.initials.keys().cloned().collect();
        Self::bfs(&start, &edges)
    }

    /// States from which some final state is reachable (reverse-graph BFS
    /// from the final states).
    pub fn coaccessible_states(&self) -> HashSet<S> {
        let mut edges: HashMap<S, Vec<S>> = HashMap::new();
        for tr in &self.transitions {
            edges.entry(tr.dest.clone()).or_default().push(tr.src.clone());
        }
        let start: Vec<S> = self.finals.keys().cloned().collect();
        Self::bfs(&start, &edges)
    }

    /// Restriction of the automaton to the given state set. If the
    /// restriction would drop every initial state while the original had at
    /// least one, a single original initial state is retained so the result
    /// is never left without an entry point.
    pub fn restriction(&self, states: &HashSet<S>) -> Self {
        let transitions = self
            .transitions
            .iter()
            .filter(|tr| states.contains(&tr.src) && states.contains(&tr.dest))
            .cloned()
            .collect();
        let finals = self
            .finals
            .iter()
            .filter(|(s, _)| states.contains(*s))
            .map(|(s, w)| (s.clone(), *w))
            .collect();
        let mut initials: BTreeMap<S, f64> = self
            .initials
            .iter()
            .filter(|(s, _)| states.contains(*s))
            .map(|(s, w)| (s.clone(), *w))
            .collect();
        if initials.is_empty() {
            if let Some((s, w)) = self.initials.iter().next() {
                initials.insert(s.clone(), *w);
            }
        }
        WeightedAutomaton::new(transitions, initials, finals, Some(self.alphabet()))
    }

    /// Trim to accessible-and-coaccessible states.
    pub fn trim(&self) -> Self {
        let acc = self.accessible_states();
        let coacc = self.coaccessible_states();
        let both: HashSet<S> = acc.intersection(&coacc).cloned().collect();
        self.restriction(&both)
    }

    /// Exactly one initial state and at most one outgoing transition per
    /// `(state, symbol)`.
    pub fn is_deterministic(&self) -> bool {
        if self.initials.len() > 1 {
            return false;
        }
        let mut seen: HashSet<(S, A)> = HashSet::new();
        for tr in &self.transitions {
            if !seen.insert((tr.src.clone(), tr.symbol.clone())) {
                return false;
            }
        }
        true
    }

    /// Log-probability of `word` in a deterministic automaton: the sum of
    /// log-weights along the unique path (initial, transitions, final).
    /// `None` means the word is rejected or crosses a non-positive weight --
    /// "no probability", distinct from a probability of zero.
    pub fn string_prob_deterministic(&self, word: &[A]) -> Option<f64> {
        let (start, ini_weight) = self.initials.iter().next()?;
        if *ini_weight <= 0.0 {
            return None;
        }
        let mut prob = ini_weight.ln();
        let idx = self.state_symbol_index();

        let mut act = start.clone();
        for sym in word {
            let indices = idx.get(&(act.clone(), sym.clone()))?;
            let tr = &self.transitions[*indices.first()?];
            if tr.weight <= 0.0 {
                return None;
            }
            prob += tr.weight.ln();
            act = tr.dest.clone();
        }

        let fin = self.finals.get(&act)?;
        if *fin <= 0.0 {
            return None;
        }
        Some(prob + fin.ln())
    }

    /// Highest-weight accepting string of a deterministic automaton,
    /// computed by fixed-point value iteration over
    /// `value[s] = max(final[s], max_t value[dest] * weight)`.
    /// Returns `([], 0.0)` when there are no final states.
    pub fn most_probable_string(&self) -> Result<(Vec<A>, f64), WfaError> {
        if !self.is_deterministic() {
            return Err(WfaError::NotDeterministic {
                operation: "most_probable_string",
            });
        }
        if self.finals.is_empty() {
            return Ok((Vec::new(), 0.0));
        }

        let mut val: HashMap<S, f64> = HashMap::new();
        let mut words: HashMap<S, Vec<A>> = HashMap::new();
        for (s, w) in &self.finals {
            val.insert(s.clone(), *w);
            words.insert(s.clone(), Vec::new());
        }

        let mut changed = true;
        while changed {
            changed = false;
            for tr in &self.transitions {
                let dest_val = val.get(&tr.dest).copied().unwrap_or(0.0);
                let src_val = val.get(&tr.src).copied().unwrap_or(0.0);
                let candidate = dest_val * tr.weight;
                if src_val < candidate {
                    let mut word = vec![tr.symbol.clone()];
                    word.extend(words.get(&tr.dest).cloned().unwrap_or_default());
                    val.insert(tr.src.clone(), candidate);
                    words.insert(tr.src.clone(), word);
                    changed = true;
                }
            }
        }

        match self.initials.keys().next() {
            Some(ini) => Ok((
                words.get(ini).cloned().unwrap_or_default(),
                val.get(ini).copied().unwrap_or(0.0),
            )),
            None => Ok((Vec::new(), 0.0)),
        }
    }

    /// Complete the automaton in place: every `(state, symbol)` pair without
    /// a transition gets a zero-weight edge into the fresh sink state `trap`,
    /// and the sink absorbs every alphabet symbol with weight 0.
    pub fn complete(&mut self, trap: S) {
        let alphabet = self.alphabet();
        if alphabet.is_empty() {
            return;
        }
        let states = self.states();
        let mut have: HashSet<(S, A)> = HashSet::new();
        for tr in &self.transitions {
            have.insert((tr.src.clone(), tr.symbol.clone()));
        }
        for st in states {
            for sym in &alphabet {
                if !have.contains(&(st.clone(), sym.clone())) {
                    self.transitions.push(Transition::new(
                        st.clone(),
                        trap.clone(),
                        sym.clone(),
                        0.0,
                    ));
                }
            }
        }
        for sym in &alphabet {
            self.transitions
                .push(Transition::new(trap.clone(), trap.clone(), sym.clone(), 0.0));
        }
    }

    /// Difference of two deterministic automata: strings accepted by `self`
    /// but not by `other`, with `self`'s weights preserved. Built as the
    /// trimmed product of `self` with a completed, all-ones, complemented
    /// copy of `other`; `trap` is the fresh sink used for completion.
    pub fn difference(
        &self,
        other: &Self,
        trap: S,
    ) -> Result<WeightedAutomaton<(S, S), A>, WfaError> {
        if !self.is_deterministic() {
            return Err(WfaError::NotDeterministic {
                operation: "difference",
            });
        }
        if !other.is_deterministic() {
            return Err(WfaError::NotDeterministic {
                operation: "difference",
            });
        }

        let mut complement = other.clone();
        let mut union_alph = self.alphabet();
        for sym in other.alphabet() {
            if !union_alph.contains(&sym) {
                union_alph.push(sym);
            }
        }
        complement.set_alphabet(union_alph);
        complement.complete(trap);
        complement.set_ones();

        let old_finals = complement.finals.clone();
        let flipped = complement
            .states()
            .into_iter()
            .filter(|s| !old_finals.contains_key(s))
            .map(|s| (s, 1.0))
            .collect();
        complement.set_finals(flipped);

        Ok(self.product(&complement).trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// a -> b with probability .6 / .4 split after shared first symbol.
    fn simple_dpa() -> WeightedAutomaton<usize, &'static str> {
        let transitions = vec![
            Transition::new(0, 1, "a", 1.0),
            Transition::new(1, 2, "b", 0.6),
            Transition::new(1, 3, "c", 0.4),
        ];
        let initials = BTreeMap::from([(0, 1.0)]);
        let finals = BTreeMap::from([(2, 1.0), (3, 1.0)]);
        WeightedAutomaton::new(transitions, initials, finals, None)
    }

    #[test]
    fn alphabet_first_occurrence_order() {
        let aut = simple_dpa();
        assert_eq!(aut.alphabet(), vec!["a", "b", "c"]);
    }

    #[test]
    fn deterministic_detection() {
        let mut aut = simple_dpa();
        assert!(aut.is_deterministic());

        aut = WeightedAutomaton::new(
            vec![
                Transition::new(0, 1, "a", 0.5),
                Transition::new(0, 2, "a", 0.5),
            ],
            BTreeMap::from([(0, 1.0)]),
            BTreeMap::from([(1, 1.0)]),
            None,
        );
        assert!(!aut.is_deterministic());
    }

    #[test]
    fn string_prob_accepted() {
        let aut = simple_dpa();
        let prob = aut.string_prob_deterministic(&["a", "b"]).unwrap();
        assert!((prob - 0.6f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn string_prob_rejected_is_none() {
        let aut = simple_dpa();
        // "a d" leaves state 1 with no matching transition
        assert!(aut.string_prob_deterministic(&["a", "d"]).is_none());
        // "a" alone stops in a non-final state
        assert!(aut.string_prob_deterministic(&["a"]).is_none());
    }

    #[test]
    fn rename_numbers_initials_first() {
        let transitions = vec![
            Transition::new("root", "x", "a", 1.0),
            Transition::new("x", "y", "b", 1.0),
        ];
        let aut = WeightedAutomaton::new(
            transitions,
            BTreeMap::from([("root", 1.0)]),
            BTreeMap::from([("y", 1.0)]),
            None,
        );
        let (renamed, mapping) = aut.rename_states();
        assert_eq!(mapping["root"], 0);
        assert_eq!(renamed.states().len(), 3);
        assert_eq!(renamed.initials().keys().copied().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn trim_is_idempotent() {
        // state 4 unreachable, state 5 cannot reach a final state
        let transitions = vec![
            Transition::new(0, 1, "a", 1.0),
            Transition::new(4, 1, "a", 1.0),
            Transition::new(0, 5, "b", 1.0),
        ];
        let aut = WeightedAutomaton::new(
            transitions,
            BTreeMap::from([(0, 1.0)]),
            BTreeMap::from([(1, 1.0)]),
            None,
        );
        let once = aut.trim();
        let twice = once.trim();
        assert_eq!(once.states(), twice.states());
        assert_eq!(once.transitions().len(), twice.transitions().len());
        assert_eq!(once.states().len(), 2);
    }

    #[test]
    fn trim_keeps_an_initial_state() {
        // no final state is reachable, so the restriction would drop
        // everything; one initial state must survive
        let aut: WeightedAutomaton<usize, &str> = WeightedAutomaton::new(
            vec![Transition::new(0, 1, "a", 1.0)],
            BTreeMap::from([(0, 1.0)]),
            BTreeMap::new(),
            None,
        );
        let trimmed = aut.trim();
        assert_eq!(trimmed.initials().len(), 1);
    }

    #[test]
    fn product_synchronizes_symbols() {
        let a = simple_dpa();
        let b = WeightedAutomaton::new(
            vec![
                Transition::new(0, 1, "a", 1.0),
                Transition::new(1, 2, "b", 1.0),
            ],
            BTreeMap::from([(0, 1.0)]),
            BTreeMap::from([(2, 1.0)]),
            None,
        );
        let prod = a.product(&b);
        // only the "a b" path survives the synchronization
        assert!(prod.string_prob_deterministic(&["a", "b"]).is_some());
        assert!(prod.string_prob_deterministic(&["a", "c"]).is_none());
    }

    #[test]
    fn most_probable_string_picks_heavier_branch() {
        let aut = simple_dpa();
        let (word, weight) = aut.most_probable_string().unwrap();
        assert_eq!(word, vec!["a", "b"]);
        assert!((weight - 0.6).abs() < 1e-12);
    }

    #[test]
    fn most_probable_string_empty_language() {
        let aut: WeightedAutomaton<usize, &str> = WeightedAutomaton::new(
            vec![Transition::new(0, 1, "a", 1.0)],
            BTreeMap::from([(0, 1.0)]),
            BTreeMap::new(),
            None,
        );
        assert_eq!(aut.most_probable_string().unwrap(), (Vec::new(), 0.0));
    }

    #[test]
    fn difference_with_self_is_empty() {
        let aut = simple_dpa();
        let diff = aut.difference(&aut, usize::MAX).unwrap();
        assert!(diff.finals().is_empty());
    }

    #[test]
    fn difference_requires_determinism() {
        let nondet = WeightedAutomaton::new(
            vec![
                Transition::new(0, 1, "a", 0.5),
                Transition::new(0, 2, "a", 0.5),
            ],
            BTreeMap::from([(0, 1.0)]),
            BTreeMap::from([(1, 1.0)]),
            None,
        );
        let det = simple_dpa();
        assert!(matches!(
            det.difference(&nondet, usize::MAX),
            Err(WfaError::NotDeterministic { .. })
        ));
    }

    #[test]
    fn difference_keeps_own_weights() {
        let a = simple_dpa();
        // b accepts only "a b"; difference accepts "a c" with weight 0.4
        let b = WeightedAutomaton::new(
            vec![
                Transition::new(0, 1, "a", 1.0),
                Transition::new(1, 2, "b", 1.0),
            ],
            BTreeMap::from([(0, 1.0)]),
            BTreeMap::from([(2, 1.0)]),
            None,
        );
        let diff = a.difference(&b, usize::MAX).unwrap();
        let prob = diff.string_prob_deterministic(&["a", "c"]).unwrap();
        assert!((prob - 0.4f64.ln()).abs() < 1e-12);
        assert!(diff.string_prob_deterministic(&["a", "b"]).is_none());
    }

    #[test]
    fn complete_adds_sink_loops() {
        let mut aut = simple_dpa();
        let states_before = aut.state_count();
        aut.complete(99);
        let idx: Vec<_> = aut
            .transitions()
            .iter()
            .filter(|tr| tr.src == 99 && tr.dest == 99)
            .collect();
        assert_eq!(idx.len(), 3); // one self-loop per alphabet symbol
        assert_eq!(aut.state_count(), states_before + 1);
    }
}
