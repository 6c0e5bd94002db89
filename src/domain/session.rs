use crate::domain::models::{
    MetricEvent, MetricType, MetricValue, SessionPhase, SessionSettings, SessionType,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Phase lengths in seconds. Production values come from `SessionSettings`;
/// tests use second-scale plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionDurations {
    pub focus_seconds: u32,
    pub break_seconds: u32,
    pub meditation_seconds: u32,
}

impl SessionDurations {
    pub fn from_seconds(focus_seconds: u32, break_seconds: u32, meditation_seconds: u32) -> Self {
        Self {
            focus_seconds,
            break_seconds,
            meditation_seconds,
        }
    }
}

impl From<SessionSettings> for SessionDurations {
    fn from(settings: SessionSettings) -> Self {
        Self {
            focus_seconds: settings.focus_minutes.saturating_mul(60),
            break_seconds: settings.break_minutes.saturating_mul(60),
            meditation_seconds: settings.meditation_minutes.saturating_mul(60),
        }
    }
}

/// Point-in-time view of the timer, handed to UI surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub session_type: Option<SessionType>,
    pub phase: Option<SessionPhase>,
    pub remaining_seconds: u32,
    pub running: bool,
    pub paused: bool,
}

impl SessionState {
    pub const IDLE: Self = Self {
        session_type: None,
        phase: None,
        remaining_seconds: 0,
        running: false,
        paused: false,
    };

    pub fn is_idle(&self) -> bool {
        !self.running
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionCompletion {
    pub session_type: SessionType,
    pub credited_seconds: u32,
}

impl SessionCompletion {
    pub fn metric_type(&self) -> MetricType {
        match self.session_type {
            SessionType::Focus => MetricType::FocusSession,
            SessionType::Meditation => MetricType::MeditationSession,
        }
    }

    pub fn metric(&self, owner: &str, created_at: DateTime<Utc>) -> MetricEvent {
        MetricEvent {
            owner: owner.to_string(),
            metric_type: self.metric_type(),
            value: MetricValue::Duration {
                seconds: self.credited_seconds,
            },
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TickOutcome {
    Idle,
    Paused,
    Ticked { remaining_seconds: u32 },
    PhaseChanged { phase: SessionPhase, remaining_seconds: u32 },
    Completed(SessionCompletion),
}

#[derive(Debug, Clone, Copy)]
struct ActiveSession {
    session_type: SessionType,
    phase: SessionPhase,
    remaining_seconds: u32,
    paused: bool,
    break_seconds: u32,
    credited_seconds: u32,
}

/// Countdown for focus (work then break) and meditation sessions.
///
/// Idle → Running → (Paused ↔ Running)* → Completed → Idle, with cancel
/// reachable from any non-idle state. Out-of-order calls are no-ops.
#[derive(Debug, Clone)]
pub struct SessionTimer {
    durations: SessionDurations,
    active: Option<ActiveSession>,
}

impl SessionTimer {
    pub fn new(durations: SessionDurations) -> Self {
        Self {
            durations,
            active: None,
        }
    }

    pub fn durations(&self) -> SessionDurations {
        self.durations
    }

    /// Takes effect on the next `start`; a running session keeps its plan.
    pub fn set_durations(&mut self, durations: SessionDurations) {
        self.durations = durations;
    }

    pub fn state(&self) -> SessionState {
        match self.active {
            None => SessionState::IDLE,
            Some(active) => SessionState {
                session_type: Some(active.session_type),
                phase: match active.session_type {
                    SessionType::Focus => Some(active.phase),
                    SessionType::Meditation => None,
                },
                remaining_seconds: active.remaining_seconds,
                running: true,
                paused: active.paused,
            },
        }
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }

    /// Starts a session, discarding any session already in progress.
    /// Returns the discarded session's state, if there was one.
    pub fn start(&mut self, session_type: SessionType) -> Option<SessionState> {
        let replaced = self.cancel();
        let remaining_seconds = match session_type {
            SessionType::Focus => self.durations.focus_seconds,
            SessionType::Meditation => self.durations.meditation_seconds,
        };
        self.active = Some(ActiveSession {
            session_type,
            phase: SessionPhase::Work,
            remaining_seconds,
            paused: false,
            break_seconds: self.durations.break_seconds,
            credited_seconds: remaining_seconds,
        });
        replaced
    }

    pub fn pause(&mut self) -> bool {
        match self.active.as_mut() {
            Some(active) if !active.paused => {
                active.paused = true;
                true
            }
            _ => false,
        }
    }

    pub fn resume(&mut self) -> bool {
        match self.active.as_mut() {
            Some(active) if active.paused => {
                active.paused = false;
                true
            }
            _ => false,
        }
    }

    /// Discards the current session without crediting it.
    pub fn cancel(&mut self) -> Option<SessionState> {
        let state = self.state();
        self.active.take().map(|_| state)
    }

    pub fn tick(&mut self) -> TickOutcome {
        let Some(active) = self.active.as_mut() else {
            return TickOutcome::Idle;
        };
        if active.paused {
            return TickOutcome::Paused;
        }

        active.remaining_seconds = active.remaining_seconds.saturating_sub(1);
        if active.remaining_seconds > 0 {
            return TickOutcome::Ticked {
                remaining_seconds: active.remaining_seconds,
            };
        }

        match (active.session_type, active.phase) {
            (SessionType::Focus, SessionPhase::Work) => {
                active.phase = SessionPhase::Break;
                active.remaining_seconds = active.break_seconds;
                TickOutcome::PhaseChanged {
                    phase: SessionPhase::Break,
                    remaining_seconds: active.remaining_seconds,
                }
            }
            (session_type, _) => {
                let completion = SessionCompletion {
                    session_type,
                    credited_seconds: active.credited_seconds,
                };
                self.active = None;
                TickOutcome::Completed(completion)
            }
        }
    }
}
