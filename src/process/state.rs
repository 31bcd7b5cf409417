//! Process read-mode state machine.
//!
//! ```text
//!              ┌──> ReadBytes ──┬──> Exited ──> Disposed
//!   Initial ───┤                └──> ReadException
//!              └──> ReadChars ─────> Exited
//! ```
//!
//! The first read fixes the mode. `Disposed` is reachable from every state
//! and absorbs everything. From `ReadException` only a final
//! wait-for-exit is allowed. All checks go through [`ProcessState::begin`],
//! so the whole table lives in one `match`.

// Rust guideline compliant 2026-02

use crate::error::{ProcessError, Result};

/// Lifecycle state of a [`Process`](super::Process).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// No read has happened yet.
    Initial,
    /// Reading raw bytes.
    ReadBytes,
    /// Reading decoded lines.
    ReadChars,
    /// A read-to-end handler failed; only `wait_for_exit` remains valid.
    ReadException,
    /// The transport reported process exit.
    Exited,
    /// The process has been disposed.
    Disposed,
}

/// Operations whose validity depends on the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    ReadBytes,
    ReadChars,
    WaitForExit,
    ExitCode,
    Write,
}

impl ProcessState {
    /// Validate `op` against the current state and return the state the
    /// process enters while performing it.
    pub(crate) fn begin(self, op: Operation) -> Result<ProcessState> {
        use Operation as Op;
        use ProcessState as S;

        match (self, op) {
            (S::Disposed, _) => Err(ProcessError::Disposed),

            (S::Initial | S::ReadBytes, Op::ReadBytes) => Ok(S::ReadBytes),
            (S::ReadChars, Op::ReadBytes) => Err(ProcessError::InvalidOperation(
                "cannot read raw bytes after reading text",
            )),

            (S::Initial | S::ReadChars, Op::ReadChars) => Ok(S::ReadChars),
            (S::ReadBytes, Op::ReadChars) => Err(ProcessError::InvalidOperation(
                "cannot read text after reading raw bytes",
            )),

            (S::ReadException, Op::ReadBytes | Op::ReadChars) => Err(
                ProcessError::InvalidOperation("output handler failed; only wait for exit is allowed"),
            ),
            (S::Exited, Op::ReadBytes | Op::ReadChars) => {
                Err(ProcessError::InvalidOperation("process has exited"))
            }

            (state, Op::WaitForExit | Op::Write) => Ok(state),

            (S::Exited, Op::ExitCode) => Ok(S::Exited),
            (_, Op::ExitCode) => Err(ProcessError::InvalidOperation("process has not exited")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_read_fixes_mode() {
        assert_eq!(
            ProcessState::Initial.begin(Operation::ReadBytes).unwrap(),
            ProcessState::ReadBytes
        );
        assert_eq!(
            ProcessState::Initial.begin(Operation::ReadChars).unwrap(),
            ProcessState::ReadChars
        );
    }

    #[test]
    fn test_modes_are_exclusive() {
        let err = ProcessState::ReadChars.begin(Operation::ReadBytes).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid operation: cannot read raw bytes after reading text"
        );
        assert!(ProcessState::ReadBytes.begin(Operation::ReadChars).is_err());
    }

    #[test]
    fn test_disposed_absorbs_everything() {
        for op in [
            Operation::ReadBytes,
            Operation::ReadChars,
            Operation::WaitForExit,
            Operation::ExitCode,
            Operation::Write,
        ] {
            assert!(matches!(
                ProcessState::Disposed.begin(op),
                Err(ProcessError::Disposed)
            ));
        }
    }

    #[test]
    fn test_read_exception_only_allows_wait() {
        assert!(ProcessState::ReadException.begin(Operation::ReadBytes).is_err());
        assert!(ProcessState::ReadException.begin(Operation::ReadChars).is_err());
        assert!(ProcessState::ReadException.begin(Operation::ExitCode).is_err());
        assert_eq!(
            ProcessState::ReadException.begin(Operation::WaitForExit).unwrap(),
            ProcessState::ReadException
        );
    }

    #[test]
    fn test_exit_code_only_after_exit() {
        assert!(ProcessState::Initial.begin(Operation::ExitCode).is_err());
        assert!(ProcessState::ReadBytes.begin(Operation::ExitCode).is_err());
        assert!(ProcessState::Exited.begin(Operation::ExitCode).is_ok());
        assert!(ProcessState::Exited.begin(Operation::ReadBytes).is_err());
    }
}
