//! Actuator that latches the newest command for the physics step.

use follow_env::{Actuator, ControlCommand, EnvError};
use std::sync::{Arc, Mutex, PoisonError};

/// Shared handle to the last applied command.
///
/// Clones share state: the agent owns one clone as its actuator, the
/// physics loop reads another.
#[derive(Debug, Clone, Default)]
pub struct CommandLatch {
    inner: Arc<Mutex<LatchState>>,
}

#[derive(Debug, Default)]
struct LatchState {
    command: ControlCommand,
    applied: u64,

    /// Reject every command (motor driver offline)
    offline: bool,
}

impl CommandLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Command the platform is currently executing.
    pub fn current(&self) -> ControlCommand {
        self.lock().command
    }

    /// Number of commands accepted so far.
    pub fn applied(&self) -> u64 {
        self.lock().applied
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LatchState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Actuator for CommandLatch {
    fn apply(&mut self, command: &ControlCommand) -> Result<(), EnvError> {
        let mut state = self.lock();
        if state.offline {
            return Err(EnvError::actuator("motor driver offline"));
        }
        state.command = *command;
        state.applied += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_latch() {
        let reader = CommandLatch::new();
        let mut writer = reader.clone();

        writer.apply(&ControlCommand::new(0.2, 0.1)).unwrap();
        assert_eq!(reader.current(), ControlCommand::new(0.2, 0.1));
        assert_eq!(reader.applied(), 1);
    }

    #[test]
    fn test_offline_rejects_and_keeps_previous() {
        let reader = CommandLatch::new();
        let mut writer = reader.clone();
        writer.apply(&ControlCommand::new(0.0, 0.3)).unwrap();

        reader.set_offline(true);
        assert!(writer.apply(&ControlCommand::stop()).is_err());
        assert_eq!(reader.current().forward_rate, 0.3);
        assert_eq!(reader.applied(), 1);
    }
}
