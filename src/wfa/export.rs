//! Textual export of automata: the line-based FA format used for inspection
//! and a DOT digraph for visualization. A symmetric FA reader is provided so
//! dumped automata can be compared round-trip in tooling and tests; neither
//! format is a persistence layer.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::fmt::Write as _;

use thiserror::Error;

use super::automaton::{Transition, WeightedAutomaton, WfaError};
use super::{StateKey, SymbolKey};

/// Rounding applied to weights in DOT labels.
const DOT_PRECISION: usize = 3;

/// Errors from reading the FA format
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FaParseError {
    #[error("line {line}: expected `src dest \"symbol\" weight`, `state weight` or an initial state id: {content}")]
    MalformedLine { line: usize, content: String },

    #[error("line {line}: invalid number: {content}")]
    InvalidNumber { line: usize, content: String },
}

impl<S: StateKey + Display, A: SymbolKey + Display> WeightedAutomaton<S, A> {
    /// FA-format dump: one line per transition `src dest "symbol" weight`,
    /// one line per final state `state weight`. Optionally preceded by the
    /// initial state id and a `:`-prefixed alphabet line. Requires exactly
    /// one initial state.
    pub fn to_fa_format(&self, initial: bool, alphabet: bool) -> Result<String, WfaError> {
        if self.initials().len() != 1 {
            return Err(WfaError::SingleInitialRequired {
                operation: "to_fa_format",
                found: self.initials().len(),
            });
        }

        let mut out = String::new();
        if initial {
            if let Some(ini) = self.initials().keys().next() {
                let _ = writeln!(out, "{ini}");
            }
        }
        if alphabet {
            out.push(':');
            for sym in self.alphabet() {
                let _ = write!(out, "{sym} ");
            }
            out.push('\n');
        }
        for tr in self.transitions() {
            let _ = writeln!(out, "{} {} \"{}\" {}", tr.src, tr.dest, tr.symbol, tr.weight);
        }
        for (state, weight) in self.finals() {
            let _ = writeln!(out, "{state} {weight}");
        }
        Ok(out)
    }

    /// Transitions between the same state pair merged into one labeled edge:
    /// symbol list plus summed weight.
    fn aggregated_transitions(&self) -> BTreeMap<(S, S), (Vec<A>, f64)> {
        let mut aggregate: BTreeMap<(S, S), (Vec<A>, f64)> = BTreeMap::new();
        for tr in self.transitions() {
            let entry = aggregate
                .entry((tr.src.clone(), tr.dest.clone()))
                .or_insert_with(|| (Vec::new(), 0.0));
            entry.0.push(tr.symbol.clone());
            entry.1 += tr.weight;
        }
        aggregate
    }

    /// DOT digraph for visualization. With `aggregate` set, transitions
    /// between the same pair of states collapse into a single edge labeled
    /// with the symbol list.
    pub fn to_dot(&self, aggregate: bool, legend: Option<&str>) -> String {
        let mut dot = String::from("digraph \"Automaton\" {\n    rankdir=LR;\n");
        if let Some(text) = legend {
            let _ = writeln!(
                dot,
                "{{ rank = LR\n Legend [shape=none, margin=0, label=\"{text}\"] }}"
            );
        }

        dot.push_str("node [shape = doublecircle];\n");
        for (state, weight) in self.finals() {
            if *weight == 0.0 {
                continue;
            }
            let _ = writeln!(
                dot,
                "\"{state}\" [label=\"{state}, {weight:.prec$}\"];",
                prec = DOT_PRECISION
            );
        }

        dot.push_str("node [shape = circle];\n");
        for state in self.states() {
            if !self.finals().contains_key(&state) {
                let _ = writeln!(dot, "\"{state}\" [label=\"{state}\"];");
            }
        }

        for (state, weight) in self.initials() {
            let _ = writeln!(dot, "\"init{state}\" [label=\"{weight}\",shape=plaintext];");
            let _ = writeln!(dot, "\"init{state}\" -> \"{state}\";");
        }

        if aggregate {
            for ((src, dest), (symbols, weight)) in self.aggregated_transitions() {
                let mut label = String::from("[");
                for sym in &symbols {
                    let _ = write!(label, "{sym} ");
                }
                let _ = write!(label, "] {weight:.prec$}", prec = DOT_PRECISION);
                let _ = writeln!(dot, "\"{src}\" -> \"{dest}\" [ label = \"{label}\" ];");
            }
        } else {
            for tr in self.transitions() {
                let _ = writeln!(
                    dot,
                    "\"{}\" -> \"{}\" [ label = \"{} : {:.prec$}\" ];",
                    tr.src,
                    tr.dest,
                    tr.symbol,
                    tr.weight,
                    prec = DOT_PRECISION
                );
            }
        }

        dot.push('}');
        dot
    }
}

fn parse_state(token: &str, line: usize, content: &str) -> Result<usize, FaParseError> {
    token.parse().map_err(|_| FaParseError::InvalidNumber {
        line,
        content: content.to_string(),
    })
}

fn parse_weight(token: &str, line: usize, content: &str) -> Result<f64, FaParseError> {
    token.parse().map_err(|_| FaParseError::InvalidNumber {
        line,
        content: content.to_string(),
    })
}

/// Symmetric reader for [`WeightedAutomaton::to_fa_format`] output. The
/// initial state, when present, is assigned weight 1.0 (the FA format does
/// not carry initial weights).
pub fn from_fa_format(input: &str) -> Result<WeightedAutomaton<usize, String>, FaParseError> {
    let mut transitions: Vec<Transition<usize, String>> = Vec::new();
    let mut initials: BTreeMap<usize, f64> = BTreeMap::new();
    let mut finals: BTreeMap<usize, f64> = BTreeMap::new();
    let mut alphabet: Option<Vec<String>> = None;

    for (idx, raw) in input.lines().enumerate() {
        let lineno = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix(':') {
            alphabet = Some(rest.split_whitespace().map(str::to_string).collect());
            continue;
        }

        if let Some(open) = line.find('"') {
            let close = line.rfind('"').filter(|c| *c > open).ok_or_else(|| {
                FaParseError::MalformedLine {
                    line: lineno,
                    content: line.to_string(),
                }
            })?;
            let symbol = line[open + 1..close].to_string();
            let head: Vec<&str> = line[..open].split_whitespace().collect();
            let tail: Vec<&str> = line[close + 1..].split_whitespace().collect();
            if head.len() != 2 || tail.len() != 1 {
                return Err(FaParseError::MalformedLine {
                    line: lineno,
                    content: line.to_string(),
                });
            }
            transitions.push(Transition::new(
                parse_state(head[0], lineno, line)?,
                parse_state(head[1], lineno, line)?,
                symbol,
                parse_weight(tail[0], lineno, line)?,
            ));
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.len() {
            1 => {
                initials.insert(parse_state(tokens[0], lineno, line)?, 1.0);
            }
            2 => {
                finals.insert(
                    parse_state(tokens[0], lineno, line)?,
                    parse_weight(tokens[1], lineno, line)?,
                );
            }
            _ => {
                return Err(FaParseError::MalformedLine {
                    line: lineno,
                    content: line.to_string(),
                });
            }
        }
    }

    Ok(WeightedAutomaton::new(transitions, initials, finals, alphabet))
}
