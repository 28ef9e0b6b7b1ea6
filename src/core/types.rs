//! Shared deterministic types for the refactor cycle.
//!
//! These types define stable contracts between core components and must not
//! depend on external state or I/O.

/// Progress tag for one cycle, recorded in history at termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Start,
    Step1Ok,
    NoAction,
    Step1Error,
    Step2ApplyError,
    ApplyOk,
    VerifyOk,
    VerifyFail,
    VerifySkipped,
    CommitNone,
    CommitError,
    Success,
    Fatal,
}

impl CycleOutcome {
    /// The literal tag used in persisted history entries.
    pub fn as_str(self) -> &'static str {
        match self {
            CycleOutcome::Start => "START",
            CycleOutcome::Step1Ok => "STEP1_OK",
            CycleOutcome::NoAction => "NO_ACTION",
            CycleOutcome::Step1Error => "STEP1_ERROR",
            CycleOutcome::Step2ApplyError => "STEP2_APPLY_ERROR",
            CycleOutcome::ApplyOk => "APPLY_OK",
            CycleOutcome::VerifyOk => "VERIFY_OK",
            CycleOutcome::VerifyFail => "VERIFY_FAIL",
            CycleOutcome::VerifySkipped => "VERIFY_SKIPPED",
            CycleOutcome::CommitNone => "COMMIT_NONE",
            CycleOutcome::CommitError => "COMMIT_ERROR",
            CycleOutcome::Success => "SUCCESS",
            CycleOutcome::Fatal => "FATAL",
        }
    }
}

impl std::fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
