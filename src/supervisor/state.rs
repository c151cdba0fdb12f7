use std::fmt;

use serde::{Deserialize, Serialize};

/// The ten states of a processing job.
///
/// Success path: INIT → BUDGET_CHECK → SEGMENT → EXTRACT → MINE_PATTERNS →
/// GATE_CHECK → PROMOTE → FINALIZE → DONE, with a single bounded back-edge
/// GATE_CHECK → EXTRACT. ERROR is reachable from every working state and
/// always drains to DONE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    Init,
    BudgetCheck,
    Segment,
    Extract,
    MinePatterns,
    GateCheck,
    Promote,
    Finalize,
    Error,
    Done,
}

impl State {
    pub fn is_terminal(self) -> bool {
        self == State::Done
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Init => write!(f, "INIT"),
            State::BudgetCheck => write!(f, "BUDGET_CHECK"),
            State::Segment => write!(f, "SEGMENT"),
            State::Extract => write!(f, "EXTRACT"),
            State::MinePatterns => write!(f, "MINE_PATTERNS"),
            State::GateCheck => write!(f, "GATE_CHECK"),
            State::Promote => write!(f, "PROMOTE"),
            State::Finalize => write!(f, "FINALIZE"),
            State::Error => write!(f, "ERROR"),
            State::Done => write!(f, "DONE"),
        }
    }
}

/// The complete edge set. Illegal transitions are unrepresentable at run
/// time: every advance is checked against this table, and the table itself
/// is validated when the supervisor is constructed.
pub const TRANSITIONS: &[(State, &[State])] = &[
    (State::Init, &[State::BudgetCheck]),
    (State::BudgetCheck, &[State::Segment, State::Error]),
    (State::Segment, &[State::Extract, State::Error]),
    (State::Extract, &[State::MinePatterns, State::Error]),
    (State::MinePatterns, &[State::GateCheck, State::Error]),
    (
        State::GateCheck,
        &[State::Promote, State::Extract, State::Error],
    ),
    (State::Promote, &[State::Finalize, State::Error]),
    (State::Finalize, &[State::Done, State::Error]),
    (State::Error, &[State::Done]),
    (State::Done, &[]),
];

/// Whether `from → to` is a defined edge.
pub fn allowed(from: State, to: State) -> bool {
    TRANSITIONS
        .iter()
        .find(|(state, _)| *state == from)
        .is_some_and(|(_, outgoing)| outgoing.contains(&to))
}

/// Checks the transition table for structural defects. Run once at
/// supervisor construction so a broken table cannot ship silently.
pub fn validate_transitions() -> Result<(), String> {
    const ALL: [State; 10] = [
        State::Init,
        State::BudgetCheck,
        State::Segment,
        State::Extract,
        State::MinePatterns,
        State::GateCheck,
        State::Promote,
        State::Finalize,
        State::Error,
        State::Done,
    ];

    for state in ALL {
        let entries = TRANSITIONS
            .iter()
            .filter(|(from, _)| *from == state)
            .count();
        if entries != 1 {
            return Err(format!("state {state} has {entries} table entries"));
        }
        let (_, outgoing) = TRANSITIONS
            .iter()
            .find(|(from, _)| *from == state)
            .expect("entry counted above");
        if !state.is_terminal() && outgoing.is_empty() {
            return Err(format!("non-terminal state {state} has no outgoing edges"));
        }
        if state.is_terminal() && !outgoing.is_empty() {
            return Err(format!("terminal state {state} has outgoing edges"));
        }
        // Every working state must be able to reach ERROR directly; a
        // collaborator fault can strike anywhere after INIT.
        if !matches!(state, State::Init | State::Error | State::Done)
            && !outgoing.contains(&State::Error)
        {
            return Err(format!("state {state} cannot reach ERROR"));
        }
    }
    Ok(())
}
