//! The backend-independent shape of a compiled olive.
//!
//! Code generation turns each olive into a setup function returning a tuple
//! of closures, plus a [`PipelinePlan`] naming which closure slot each stage
//! uses. The runtime walks the plan; the closures do all per-record work.
//!
//! Unless noted, a closure slot takes the current record (a tuple in the
//! stage's input layout) as its only argument.

use crate::collect::CollectSpec;

/// Index into the closure tuple a setup function returns.
pub type Slot = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct CollectorPlan {
    pub spec: CollectSpec,
    /// Value collected from each record; absent for `Count`.
    pub value: Option<Slot>,
    pub filters: Vec<Slot>,
    /// Comparator over the collected type, for collectors that order.
    pub comparator: Option<Slot>,
    /// Fallback when empty. Called with the group key (`Group`) or the
    /// outer record (`LeftJoin`).
    pub default: Option<Slot>,
    /// Called like `default`.
    pub delimiter: Option<Slot>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandlerPlan {
    Monitor {
        metric: String,
        help: String,
        labels: Vec<String>,
        /// Returns a tuple of label values.
        values: Slot,
    },
    Dump {
        dumper: String,
        /// Returns a tuple of column values.
        columns: Slot,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StagePlan {
    Where {
        condition: Slot,
    },
    /// `extend` returns a tuple of values appended to the record.
    Let {
        extend: Slot,
    },
    Require {
        value: Slot,
        handlers: Vec<HandlerPlan>,
    },
    Reject {
        condition: Slot,
        handlers: Vec<HandlerPlan>,
    },
    /// `extract`: element fields appended for a wildcard target, or `None`
    /// to append the element itself.
    Flatten {
        source: Slot,
        extract: Option<Vec<usize>>,
    },
    /// `key` returns the discriminator tuple; `equality` and `hasher`
    /// compare and hash group records by their discriminators.
    Group {
        key: Slot,
        equality: Slot,
        hasher: Slot,
        collectors: Vec<CollectorPlan>,
    },
    /// `inner_key` takes an inner record; `equality` and `hasher` work on
    /// key values.
    Join {
        format: String,
        outer_key: Slot,
        inner_key: Slot,
        equality: Slot,
        hasher: Slot,
    },
    /// Collectors see outer fields followed by inner fields.
    LeftJoin {
        format: String,
        outer_key: Slot,
        inner_key: Slot,
        equality: Slot,
        hasher: Slot,
        collectors: Vec<CollectorPlan>,
    },
    Pick {
        max: bool,
        key: Slot,
        equality: Slot,
        hasher: Slot,
        score: Slot,
        /// Comparator over the score type.
        comparator: Slot,
    },
    Monitor {
        metric: String,
        help: String,
        labels: Vec<String>,
        values: Slot,
    },
    Dump {
        dumper: String,
        columns: Slot,
    },
}

impl StagePlan {
    pub fn name(&self) -> &'static str {
        match self {
            StagePlan::Where { .. } => "Where",
            StagePlan::Let { .. } => "Let",
            StagePlan::Require { .. } => "Require",
            StagePlan::Reject { .. } => "Reject",
            StagePlan::Flatten { .. } => "Flatten",
            StagePlan::Group { .. } => "Group",
            StagePlan::Join { .. } => "Join",
            StagePlan::LeftJoin { .. } => "LeftJoin",
            StagePlan::Pick { .. } => "Pick",
            StagePlan::Monitor { .. } => "Monitor",
            StagePlan::Dump { .. } => "Dump",
        }
    }

    /// Input formats this stage reads besides the olive's own.
    pub fn joined_format(&self) -> Option<&str> {
        match self {
            StagePlan::Join { format, .. } | StagePlan::LeftJoin { format, .. } => Some(format),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TerminalPlan {
    /// `arguments` returns a tuple of argument values, one per name.
    Run {
        action: String,
        names: Vec<String>,
        arguments: Slot,
    },
    Refill {
        refiller: String,
        names: Vec<String>,
        arguments: Slot,
    },
    /// `arguments` returns the label values, the annotation values and
    /// the time to live in seconds, in that order.
    Alert {
        labels: Vec<String>,
        annotations: Vec<String>,
        arguments: Slot,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelinePlan {
    pub description: Option<String>,
    pub format: String,
    pub stages: Vec<StagePlan>,
    pub terminal: TerminalPlan,
    /// Length of the closure tuple the setup function returns.
    pub closures: usize,
}
