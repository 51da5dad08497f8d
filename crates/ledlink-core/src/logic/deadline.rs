//! Backup timer for the compatibility verdict

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::state::{Completion, CompletionSender};

/// Single-shot timer that reports `DeadlineElapsed` for one attempt.
///
/// Disarmed by dropping it.
pub(crate) struct DeadlineGuard {
    task: JoinHandle<()>,
}

impl DeadlineGuard {
    /// Arm the deadline for the attempt with `generation`
    pub fn arm(generation: u64, after: Duration, completions: CompletionSender) -> Self {
        debug!("Arming {:?} verdict deadline for attempt {}", after, generation);
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = completions.send(Completion::DeadlineElapsed { generation });
        });
        Self { task }
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}
