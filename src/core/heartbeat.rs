//! Watchdog timer that probes the gateway link while no traffic arrives.
//!
//! The supervisor never fires on its own: the dispatcher awaits [`HeartbeatSupervisor::expired`]
//! alongside the bus and calls [`HeartbeatSupervisor::on_timer_expired`] from the same task, so
//! the probe can never overlap a command write.
use std::time::Duration;
use strum::Display;
use tokio::time::{sleep_until, Instant};

use crate::api::gateway::FieldbusGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TimerState {
    Armed,
    Disarmed,
}

/// Register window read on every heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatProbe {
    pub address: u16,
    pub count: u16,
}

impl Default for HeartbeatProbe {
    fn default() -> Self {
        Self {
            address: 0,
            count: 2,
        }
    }
}

/// What a heartbeat firing did, reported for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The gateway could not be connected; the poll was skipped.
    Skipped,
    /// The probe read succeeded.
    Read(Vec<u16>),
    /// The probe read was issued and failed.
    Failed,
}

pub struct HeartbeatSupervisor {
    interval: Duration,
    probe: HeartbeatProbe,
    deadline: Option<Instant>,
}

impl HeartbeatSupervisor {
    /// Create a disarmed supervisor.
    pub fn new(interval: Duration, probe: HeartbeatProbe) -> Self {
        Self {
            interval,
            probe,
            deadline: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> TimerState {
        if self.deadline.is_some() {
            TimerState::Armed
        } else {
            TimerState::Disarmed
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Arm a fresh deadline `interval` from now, replacing any pending one.
    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.interval);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    /// Any inbound traffic pushes the deadline back.
    pub fn on_message_received(&mut self) {
        self.disarm();
        self.arm();
    }

    /// Resolves once the deadline passes. Never resolves while disarmed.
    ///
    /// Cancel-safe: dropping the future leaves the deadline untouched.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    /// Probe the gateway, then re-arm regardless of the outcome.
    pub async fn on_timer_expired<G>(&mut self, gateway: &mut G) -> PollOutcome
    where
        G: FieldbusGateway + ?Sized,
    {
        self.disarm();
        log::debug!("Heartbeat expired, probing gateway");

        let outcome = match gateway.ensure_connected().await {
            Err(err) => {
                log::warn!("Heartbeat poll skipped, gateway not connected: {err}");
                PollOutcome::Skipped
            }
            Ok(()) => match gateway
                .read_registers(self.probe.address, self.probe.count)
                .await
            {
                Ok(values) => PollOutcome::Read(values),
                Err(err) => {
                    log::warn!("Heartbeat poll failed: {err}");
                    PollOutcome::Failed
                }
            },
        };

        self.arm();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test(start_paused = true)]
    async fn test_disarmed_never_expires() {
        let supervisor = HeartbeatSupervisor::new(Duration::from_secs(10), HeartbeatProbe::default());
        assert_eq!(supervisor.state(), TimerState::Disarmed);

        let mut expired = task::spawn(supervisor.expired());
        assert_pending!(expired.poll());
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_pending!(expired.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_after_interval() {
        let mut supervisor =
            HeartbeatSupervisor::new(Duration::from_secs(10), HeartbeatProbe::default());
        supervisor.arm();
        assert_eq!(supervisor.state(), TimerState::Armed);

        let mut expired = task::spawn(supervisor.expired());
        tokio::time::advance(Duration::from_secs(9)).await;
        assert_pending!(expired.poll());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_ready!(expired.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_pushes_deadline_back() {
        let mut supervisor =
            HeartbeatSupervisor::new(Duration::from_secs(10), HeartbeatProbe::default());
        supervisor.arm();
        let first = supervisor.deadline().unwrap();

        tokio::time::advance(Duration::from_secs(7)).await;
        supervisor.on_message_received();
        let second = supervisor.deadline().unwrap();

        assert_eq!(second - first, Duration::from_secs(7));
        assert_eq!(supervisor.state(), TimerState::Armed);
    }
}
