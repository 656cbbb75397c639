//! Pure finite state machine primitive (C1).
//!
//! A machine is `(initial, transitions: Map<State, Set<State>>)`. Lookups are
//! O(1) and the transition map is immutable once built. An empty target set
//! denotes a terminal state.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Error raised by [`Fsm::assert_transition`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("FSM_INVALID_TRANSITION: cannot go from {from:?} to {to:?}, valid targets: {valid:?}")]
pub struct FsmError<S: core::fmt::Debug> {
    pub from: S,
    pub to: S,
    pub valid: Vec<S>,
}

/// Immutable state machine definition.
#[derive(Debug, Clone)]
pub struct Fsm<S: Eq + Hash + Clone> {
    initial: S,
    transitions: HashMap<S, HashSet<S>>,
}

impl<S: Eq + Hash + Clone + core::fmt::Debug> Fsm<S> {
    pub fn initial(&self) -> &S {
        &self.initial
    }

    pub fn is_valid_state(&self, state: &S) -> bool {
        self.transitions.contains_key(state)
    }

    pub fn can_transition(&self, from: &S, to: &S) -> bool {
        self.transitions
            .get(from)
            .is_some_and(|targets| targets.contains(to))
    }

    pub fn assert_transition(&self, from: &S, to: &S) -> Result<(), FsmError<S>> {
        if self.can_transition(from, to) {
            return Ok(());
        }
        Err(FsmError {
            from: from.clone(),
            to: to.clone(),
            valid: self.valid_transitions(from),
        })
    }

    pub fn valid_transitions(&self, from: &S) -> Vec<S> {
        self.transitions
            .get(from)
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// A state is terminal when it has an empty (or absent) target set.
    pub fn is_terminal(&self, state: &S) -> bool {
        self.transitions
            .get(state)
            .is_none_or(|targets| targets.is_empty())
    }
}

/// Builds an [`Fsm`], validating the transition map eagerly: every target
/// state referenced by a transition must itself appear in the keyset,
/// unless it is declared terminal by being added with an empty target set.
#[derive(Debug, Default)]
pub struct FsmBuilder<S: Eq + Hash + Clone> {
    initial: Option<S>,
    transitions: HashMap<S, HashSet<S>>,
}

impl<S: Eq + Hash + Clone + core::fmt::Debug> FsmBuilder<S> {
    pub fn new(initial: S) -> Self {
        Self {
            initial: Some(initial),
            transitions: HashMap::new(),
        }
    }

    /// Declare that `from` may transition to each of `to`. Calling this with
    /// an empty `to` set declares `from` terminal.
    pub fn allow(mut self, from: S, to: impl IntoIterator<Item = S>) -> Self {
        self.transitions.entry(from).or_default().extend(to);
        self
    }

    pub fn build(self) -> Result<Fsm<S>, String> {
        let initial = self.initial.ok_or_else(|| "FSM has no initial state".to_string())?;
        let keyset: HashSet<&S> = self.transitions.keys().collect();
        for (from, targets) in &self.transitions {
            for target in targets {
                if !keyset.contains(target) {
                    return Err(format!(
                        "FSM transition {from:?} -> {target:?} targets a state absent from the transition keyset"
                    ));
                }
            }
        }
        if !keyset.contains(&initial) {
            return Err(format!(
                "FSM initial state {initial:?} is not present in the transition keyset"
            ));
        }
        Ok(Fsm {
            initial,
            transitions: self.transitions,
        })
    }
}
