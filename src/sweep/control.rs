use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::db::Database;
use crate::error::Result;
use crate::types::{ControlCommand, ControlFlags, SchedulerState};

/// Operator handle on the scheduler.
///
/// Commands go through the store's control-flag path first (so another
/// process reading the row sees them), then are broadcast to the in-process
/// scheduler so a sleeping step wakes up immediately.
#[derive(Clone)]
pub struct SweepController {
    db: Database,
    flags_tx: Arc<watch::Sender<ControlFlags>>,
}

impl SweepController {
    pub fn new(db: Database, initial: ControlFlags) -> (Self, watch::Receiver<ControlFlags>) {
        let (tx, rx) = watch::channel(initial);
        (
            Self {
                db,
                flags_tx: Arc::new(tx),
            },
            rx,
        )
    }

    pub async fn apply(&self, cmd: ControlCommand) -> Result<ControlFlags> {
        let flags = self.db.apply_control_command(cmd).await?;
        self.flags_tx.send_replace(flags);
        info!(
            event = "SWEEP_CONTROL",
            command = %cmd,
            is_running = flags.is_running,
            is_paused = flags.is_paused,
            "[SWEEP] {cmd} -> {:?}",
            SchedulerState::from_flags(flags),
        );
        Ok(flags)
    }

    pub fn current(&self) -> ControlFlags {
        *self.flags_tx.borrow()
    }
}
