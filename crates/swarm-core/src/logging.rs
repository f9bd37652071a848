//! Structured tracing macros for the engine.
//!
//! Each subsystem logs under its own target so observers can filter with
//! `RUST_LOG=swarm::scheduler=debug` and friends.

/// Trace scheduler-level events (wave formation, barriers, mutation).
#[macro_export]
macro_rules! swarm_sched {
    ($level:ident, $($arg:tt)*) => {
        tracing::$level!(target: "swarm::scheduler", $($arg)*)
    }
}

/// Trace sub-agent execution (dispatch, tool turns, completion).
#[macro_export]
macro_rules! swarm_agent {
    ($level:ident, $($arg:tt)*) => {
        tracing::$level!(target: "swarm::agent", $($arg)*)
    }
}

/// Trace supervisor planning (ReAct iterations, plan parsing).
#[macro_export]
macro_rules! swarm_plan {
    ($level:ident, $($arg:tt)*) => {
        tracing::$level!(target: "swarm::planner", $($arg)*)
    }
}

/// Trace event-bus activity (publication, subscriber lag).
#[macro_export]
macro_rules! swarm_bus {
    ($level:ident, $($arg:tt)*) => {
        tracing::$level!(target: "swarm::bus", $($arg)*)
    }
}

/// Trace reviewer decisions.
#[macro_export]
macro_rules! swarm_review {
    ($level:ident, $($arg:tt)*) => {
        tracing::$level!(target: "swarm::reviewer", $($arg)*)
    }
}
