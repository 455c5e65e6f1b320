//! Terminal output helpers for the `webaudit` binary.

use webaudit_tracker::{JobEvent, JobState};

/// Exit status for a completed audit.
pub const EXIT_COMPLETED: u8 = 0;
/// Exit status for a failed audit.
pub const EXIT_FAILED: u8 = 1;
/// Exit status for invalid input or configuration.
pub const EXIT_USAGE: u8 = 2;
/// Exit status after Ctrl-C (128 + SIGINT).
pub const EXIT_CANCELLED: u8 = 130;

/// Map a job's final state to the process exit status.
pub fn exit_code(state: JobState) -> u8 {
    match state {
        JobState::Completed => EXIT_COMPLETED,
        JobState::Cancelled => EXIT_CANCELLED,
        _ => EXIT_FAILED,
    }
}

/// One human-readable line per event.
pub fn render_event(event: &JobEvent) -> String {
    match event {
        JobEvent::Submitting => "Submitting audit request".to_string(),
        JobEvent::AwaitingChannel { session_id } => {
            format!("Audit accepted (session {session_id}), waiting for progress")
        }
        JobEvent::Active(snapshot) => match &snapshot.message {
            Some(message) => format!("[{:>3}%] {}: {}", snapshot.percent, snapshot.stage, message),
            None => format!("[{:>3}%] {}", snapshot.percent, snapshot.stage),
        },
        JobEvent::Completed {
            cached,
            analysis_id,
            ..
        } => {
            let id = analysis_id
                .map(|id| format!(" #{id}"))
                .unwrap_or_default();
            if *cached {
                format!("Audit{id} complete (cached result)")
            } else {
                format!("Audit{id} complete")
            }
        }
        JobEvent::Failed { reason } => format!("Audit failed: {reason}"),
        JobEvent::Cancelled => "Cancelled; the analyzer may still finish the audit".to_string(),
    }
}
