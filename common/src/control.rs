use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ControlAction, ControlMode, DecisionOutput, DeviceState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlState {
    Idle,
    ActiveAutomatic,
    Suspended,
}

impl ControlState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::ActiveAutomatic => "ACTIVE_AUTOMATIC",
            Self::Suspended => "SUSPENDED",
        }
    }
}

/// Where a setting change originated; recorded in the diagnostics log so
/// automatic actions and manual overrides stay distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionSource {
    Automatic,
    UserOverride,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub source: ActionSource,
    #[serde(rename = "oldTemp")]
    pub old_temp: Option<i32>,
    #[serde(rename = "newTemp")]
    pub new_temp: i32,
    pub rationale: String,
}

/// Outcome of offering a computed decision to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Commands to dispatch; the cooldown clock has been stamped.
    Apply(Vec<ControlAction>),
    /// Decision matches the device state already.
    Unchanged,
    /// A prior action is too recent.
    CoolingDown,
    /// Engine is not in a state that acts.
    Inactive,
}

/// Gates when computed decisions are actually sent to a device.
///
/// The engine is pure: time enters as a monotonic millisecond value and
/// commands leave as values, so every path is testable without a runtime.
#[derive(Debug, Clone)]
pub struct ControlEngine {
    state: ControlState,
    prev_mode: Option<ControlMode>,
    last_action_ms: Option<u64>,
    next_eval_ms: Option<u64>,
    pending_immediate: bool,
    cooldown_ms: u64,
    interval_ms: u64,
}

impl ControlEngine {
    pub fn new(cooldown_ms: u64, interval_ms: u64) -> Self {
        Self {
            state: ControlState::Idle,
            prev_mode: None,
            last_action_ms: None,
            next_eval_ms: None,
            pending_immediate: false,
            cooldown_ms,
            interval_ms,
        }
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn last_action_ms(&self) -> Option<u64> {
        self.last_action_ms
    }

    /// Feed the currently configured control mode. Transitions follow the
    /// observed mode; the first observation decides whether activation came
    /// from a cold start (suppress the first action) or from a live
    /// manual-to-automatic switch (act immediately).
    pub fn observe_mode(&mut self, mode: ControlMode, now_ms: u64) {
        match (self.state, mode) {
            (ControlState::Idle, ControlMode::Automatic) => {
                if self.prev_mode.is_none() {
                    // Cold start straight into automatic: stamp the clock so
                    // the unit is not kicked the moment the host comes up.
                    self.last_action_ms = Some(now_ms);
                } else {
                    self.pending_immediate = true;
                }
                self.next_eval_ms = Some(now_ms);
                self.state = ControlState::ActiveAutomatic;
            }
            (ControlState::ActiveAutomatic | ControlState::Suspended, ControlMode::Manual) => {
                self.state = ControlState::Idle;
                self.next_eval_ms = None;
                self.pending_immediate = false;
            }
            _ => {}
        }
        self.prev_mode = Some(mode);
    }

    /// Park the engine while prerequisites are missing (no sensor mapping,
    /// no telemetry yet). Skipped cycles do not touch the cooldown clock.
    pub fn set_suspended(&mut self, suspended: bool) {
        match (self.state, suspended) {
            (ControlState::ActiveAutomatic, true) => self.state = ControlState::Suspended,
            (ControlState::Suspended, false) => self.state = ControlState::ActiveAutomatic,
            _ => {}
        }
    }

    /// Whether a decision cycle is due at `now_ms`.
    pub fn due(&self, now_ms: u64) -> bool {
        if self.state != ControlState::ActiveAutomatic {
            return false;
        }
        if self.pending_immediate {
            return true;
        }
        self.next_eval_ms.map(|at| now_ms >= at).unwrap_or(false)
    }

    /// Offer a computed decision. Applied only when it differs from the
    /// current device state and the cooldown has fully elapsed; the cooldown
    /// is independent of the evaluation interval.
    pub fn consider(
        &mut self,
        decision: &DecisionOutput,
        device: &DeviceState,
        now_ms: u64,
    ) -> Verdict {
        if self.state != ControlState::ActiveAutomatic {
            return Verdict::Inactive;
        }

        self.pending_immediate = false;
        self.next_eval_ms = Some(now_ms.saturating_add(self.interval_ms));

        if !Self::differs(decision, device) {
            return Verdict::Unchanged;
        }

        let elapsed = self
            .last_action_ms
            .map(|last| now_ms.saturating_sub(last))
            .unwrap_or(u64::MAX);
        if elapsed < self.cooldown_ms {
            return Verdict::CoolingDown;
        }

        self.last_action_ms = Some(now_ms);
        let mut actions = Vec::new();
        if !device.power_on {
            actions.push(ControlAction::Power(true));
        }
        if device.target_temp != Some(decision.target_temp) {
            actions.push(ControlAction::SetTarget(decision.target_temp));
        }
        if device.mode != Some(decision.mode) {
            actions.push(ControlAction::SetMode(decision.mode));
        }
        if device.fan_level != Some(decision.fan_level) {
            actions.push(ControlAction::SetFan(decision.fan_level));
        }
        Verdict::Apply(actions)
    }

    fn differs(decision: &DecisionOutput, device: &DeviceState) -> bool {
        !device.power_on
            || device.target_temp != Some(decision.target_temp)
            || device.mode != Some(decision.mode)
            || device.fan_level != Some(decision.fan_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FanLevel, OperationMode};
    use pretty_assertions::assert_eq;

    const COOLDOWN: u64 = 300_000;
    const INTERVAL: u64 = 300_000;

    fn decision(target: i32) -> DecisionOutput {
        DecisionOutput {
            target_temp: target,
            fan_level: FanLevel::Auto,
            mode: OperationMode::Cool,
            rationale: Vec::new(),
        }
    }

    fn device_at(target: i32) -> DeviceState {
        DeviceState {
            power_on: true,
            target_temp: Some(target),
            mode: Some(OperationMode::Cool),
            fan_level: Some(FanLevel::Auto),
        }
    }

    #[test]
    fn cold_start_into_automatic_suppresses_first_action() {
        let mut engine = ControlEngine::new(COOLDOWN, INTERVAL);
        engine.observe_mode(ControlMode::Automatic, 1_000);

        assert_eq!(engine.state(), ControlState::ActiveAutomatic);
        assert!(engine.due(1_000));
        // Differs from device state, but the stamped clock blocks it.
        let verdict = engine.consider(&decision(24), &device_at(27), 1_000);
        assert_eq!(verdict, Verdict::CoolingDown);
    }

    #[test]
    fn manual_to_automatic_switch_fires_immediately() {
        let mut engine = ControlEngine::new(COOLDOWN, INTERVAL);
        engine.observe_mode(ControlMode::Manual, 0);
        engine.observe_mode(ControlMode::Automatic, 1_000);

        let verdict = engine.consider(&decision(24), &device_at(27), 1_000);
        match verdict {
            Verdict::Apply(actions) => {
                assert!(actions.contains(&ControlAction::SetTarget(24)));
            }
            other => panic!("expected apply, got {other:?}"),
        }
    }

    #[test]
    fn cooldown_allows_exactly_one_action_within_window() {
        let mut engine = ControlEngine::new(COOLDOWN, INTERVAL);
        engine.observe_mode(ControlMode::Manual, 0);
        engine.observe_mode(ControlMode::Automatic, 0);

        let first = engine.consider(&decision(24), &device_at(27), 0);
        assert!(matches!(first, Verdict::Apply(_)));

        // Second differing decision two minutes later is held back.
        let second = engine.consider(&decision(23), &device_at(24), 120_000);
        assert_eq!(second, Verdict::CoolingDown);

        // After the full cooldown it goes through.
        let third = engine.consider(&decision(23), &device_at(24), 300_000);
        assert!(matches!(third, Verdict::Apply(_)));
    }

    #[test]
    fn unchanged_decision_sends_nothing_and_keeps_cooldown_clock() {
        let mut engine = ControlEngine::new(COOLDOWN, INTERVAL);
        engine.observe_mode(ControlMode::Manual, 0);
        engine.observe_mode(ControlMode::Automatic, 0);

        assert_eq!(
            engine.consider(&decision(26), &device_at(26), 0),
            Verdict::Unchanged
        );
        assert_eq!(engine.last_action_ms(), None);
    }

    #[test]
    fn switching_back_to_manual_deactivates_and_cancels_evaluation() {
        let mut engine = ControlEngine::new(COOLDOWN, INTERVAL);
        engine.observe_mode(ControlMode::Manual, 0);
        engine.observe_mode(ControlMode::Automatic, 0);
        engine.observe_mode(ControlMode::Manual, 5_000);

        assert_eq!(engine.state(), ControlState::Idle);
        assert!(!engine.due(1_000_000));
        assert_eq!(
            engine.consider(&decision(24), &device_at(27), 1_000_000),
            Verdict::Inactive
        );
    }

    #[test]
    fn suspension_skips_cycles_without_losing_activation() {
        let mut engine = ControlEngine::new(COOLDOWN, INTERVAL);
        engine.observe_mode(ControlMode::Manual, 0);
        engine.observe_mode(ControlMode::Automatic, 0);

        engine.set_suspended(true);
        assert_eq!(engine.state(), ControlState::Suspended);
        assert!(!engine.due(0));

        engine.set_suspended(false);
        assert_eq!(engine.state(), ControlState::ActiveAutomatic);
        assert!(engine.due(0));
    }

    #[test]
    fn evaluation_interval_schedules_next_cycle() {
        let mut engine = ControlEngine::new(COOLDOWN, INTERVAL);
        engine.observe_mode(ControlMode::Manual, 0);
        engine.observe_mode(ControlMode::Automatic, 0);

        let _ = engine.consider(&decision(26), &device_at(26), 0);
        assert!(!engine.due(100_000));
        assert!(engine.due(300_000));
    }

    #[test]
    fn powered_off_device_gets_power_command_first() {
        let mut engine = ControlEngine::new(COOLDOWN, INTERVAL);
        engine.observe_mode(ControlMode::Manual, 0);
        engine.observe_mode(ControlMode::Automatic, 0);

        let device = DeviceState::default();
        match engine.consider(&decision(26), &device, 0) {
            Verdict::Apply(actions) => {
                assert_eq!(actions.first(), Some(&ControlAction::Power(true)));
            }
            other => panic!("expected apply, got {other:?}"),
        }
    }
}
