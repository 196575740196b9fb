//! Signature provenance tracking.
//!
//! A signature summarises the raw input fields an action depends on. That is
//! only meaningful while every record still corresponds one-to-one with an
//! input record, so each pipeline walks a small state machine:
//!
//! ```text
//! Pure ──Let/Require──▶ AlmostPure ──Group/Join/Flatten──▶ Transformed
//!   └──────────────any failed clause──────────────────────▶ Bad
//! ```
//!
//! Transitions only move right. Filters and observers leave the state alone.

use std::collections::BTreeSet;

/// How far a pipeline has drifted from its input records. Ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PurityState {
    Pure,
    AlmostPure,
    Transformed,
    /// Resolution failed; further purity diagnostics are suppressed.
    Bad,
}

/// The effect a clause kind has on purity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseEffect {
    /// Drops or observes records without changing them.
    Filter,
    /// Adds fields but keeps one output per input.
    PassThrough,
    /// Reshapes records; raw inputs are gone afterwards.
    Transform,
}

#[derive(Debug, Clone)]
pub struct PurityTracker {
    state: PurityState,
    signable: BTreeSet<String>,
    history: Vec<PurityState>,
}

impl Default for PurityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PurityTracker {
    pub fn new() -> Self {
        Self {
            state: PurityState::Pure,
            signable: BTreeSet::new(),
            history: vec![PurityState::Pure],
        }
    }

    pub fn state(&self) -> PurityState {
        self.state
    }

    /// Raw input fields the pipeline's signatures must cover.
    pub fn signable(&self) -> &BTreeSet<String> {
        &self.signable
    }

    /// The state after each clause, starting with the initial `Pure`.
    pub fn history(&self) -> &[PurityState] {
        &self.history
    }

    pub fn is_pre_transform(&self) -> bool {
        self.state <= PurityState::AlmostPure
    }

    /// Record a successfully resolved clause. `inputs` is the provenance of
    /// every signable variable the clause reads.
    pub fn apply(&mut self, effect: ClauseEffect, inputs: impl IntoIterator<Item = String>) {
        if self.is_pre_transform() {
            self.signable.extend(inputs);
        }
        let next = match effect {
            ClauseEffect::Filter => self.state,
            ClauseEffect::PassThrough => PurityState::AlmostPure,
            ClauseEffect::Transform => PurityState::Transformed,
        };
        self.advance(next);
    }

    /// Record a clause that failed to resolve.
    pub fn fail(&mut self) {
        self.advance(PurityState::Bad);
    }

    /// Declare a derived signable value. Refused once transformed.
    pub fn register_signable(
        &mut self,
        provenance: impl IntoIterator<Item = String>,
    ) -> Result<(), PurityState> {
        match self.state {
            PurityState::Pure | PurityState::AlmostPure => {
                self.signable.extend(provenance);
                Ok(())
            }
            state => Err(state),
        }
    }

    /// Lift the current state to at least `floor` without recording a new
    /// clause.
    pub fn raise(&mut self, floor: PurityState) {
        self.state = self.state.max(floor);
        if let Some(last) = self.history.last_mut() {
            *last = self.state;
        }
    }

    fn advance(&mut self, next: PurityState) {
        self.state = self.state.max(next);
        self.history.push(self.state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn let_moves_to_almost_pure_and_collects() {
        let mut t = PurityTracker::new();
        t.apply(ClauseEffect::Filter, ["run".to_string()]);
        assert_eq!(t.state(), PurityState::Pure);
        t.apply(ClauseEffect::PassThrough, ["lane".to_string()]);
        assert_eq!(t.state(), PurityState::AlmostPure);
        assert_eq!(t.signable().len(), 2);
    }

    #[test]
    fn raise_rewrites_the_last_entry() {
        let mut t = PurityTracker::new();
        t.apply(ClauseEffect::Filter, Vec::<String>::new());
        t.raise(PurityState::AlmostPure);
        assert_eq!(t.history(), [PurityState::Pure, PurityState::AlmostPure]);
        t.raise(PurityState::Pure);
        assert_eq!(t.state(), PurityState::AlmostPure);
    }

    #[test]
    fn group_transforms_and_stops_collecting() {
        let mut t = PurityTracker::new();
        t.apply(ClauseEffect::Transform, ["key".to_string()]);
        assert_eq!(t.state(), PurityState::Transformed);
        t.apply(ClauseEffect::PassThrough, ["late".to_string()]);
        assert_eq!(t.state(), PurityState::Transformed);
        assert!(!t.signable().contains("late"));
        assert_eq!(
            t.register_signable(["x".to_string()]),
            Err(PurityState::Transformed)
        );
    }

    #[test]
    fn never_returns_to_purer_state() {
        let mut t = PurityTracker::new();
        t.fail();
        t.apply(ClauseEffect::Filter, Vec::<String>::new());
        t.apply(ClauseEffect::PassThrough, []);
        assert_eq!(t.state(), PurityState::Bad);
        assert!(t.history().windows(2).all(|w| w[0] <= w[1]));
    }
}
