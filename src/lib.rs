//! Autonomous refactor cycle engine.
//!
//! Drives an LLM through a three-phase loop over a checked-out repository:
//! **Decide** (pick one small refactor), **Execute** (obtain full post-change
//! file contents), **Commit** (apply to disk and commit on the work branch).
//! One cycle per process invocation, at most one commit per cycle, with
//! rollback on every failure path. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (path guarding, text repair,
//!   record validation, token accounting). No I/O, fully testable in
//!   isolation.
//! - **[`io`]**: Side-effecting operations (configuration, filesystem, git,
//!   HTTP model transport). Isolated behind traits to enable scripting in
//!   tests.
//!
//! Orchestration modules ([`cycle`], [`verify`]) coordinate core logic with
//! I/O to implement the state machine.

pub mod core;
pub mod cycle;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod verify;
