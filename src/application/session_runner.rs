use crate::application::NowProvider;
use crate::domain::models::SessionType;
use crate::domain::session::{
    SessionCompletion, SessionDurations, SessionState, SessionTimer, TickOutcome,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::metric_store::MetricSink;
use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Started { state: SessionState },
    Paused { state: SessionState },
    Resumed { state: SessionState },
    Cancelled { state: SessionState },
    Ticked { state: SessionState },
    PhaseChanged { state: SessionState },
    Completed { completion: SessionCompletion, recorded: bool },
}

struct RunnerState {
    timer: SessionTimer,
    epoch: u64,
}

struct Shared<M: ?Sized> {
    owner: String,
    metrics: Arc<M>,
    events: broadcast::Sender<SessionEvent>,
    state: Mutex<RunnerState>,
}

impl<M: ?Sized> Shared<M> {
    fn lock(&self) -> Result<MutexGuard<'_, RunnerState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::store(format!("session lock poisoned: {error}")))
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

/// Drives one owner's `SessionTimer` on a tokio interval. Every start or
/// cancel bumps an epoch so a ticker spawned for an earlier session exits on
/// its next wake-up instead of driving the new one.
pub struct SessionRunner<M>
where
    M: MetricSink + ?Sized + 'static,
{
    shared: Arc<Shared<M>>,
    now_provider: NowProvider,
    tick_period: Duration,
}

impl<M> SessionRunner<M>
where
    M: MetricSink + ?Sized + 'static,
{
    pub fn new(
        owner: impl Into<String>,
        metrics: Arc<M>,
        durations: SessionDurations,
        tick_period: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                owner: owner.into(),
                metrics,
                events,
                state: Mutex::new(RunnerState {
                    timer: SessionTimer::new(durations),
                    epoch: 0,
                }),
            }),
            now_provider: Arc::new(Utc::now),
            tick_period,
        }
    }

    /// Clock used to stamp completion metrics of sessions started afterwards.
    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn owner(&self) -> &str {
        &self.shared.owner
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> Result<SessionState, InfraError> {
        Ok(self.shared.lock()?.timer.state())
    }

    pub fn durations(&self) -> Result<SessionDurations, InfraError> {
        Ok(self.shared.lock()?.timer.durations())
    }

    /// Applies from the next `start`.
    pub fn set_durations(&self, durations: SessionDurations) -> Result<(), InfraError> {
        self.shared.lock()?.timer.set_durations(durations);
        Ok(())
    }

    /// Starts a session, discarding any running one. Outside a tokio runtime
    /// this fails and leaves the timer untouched.
    pub fn start(&self, session_type: SessionType) -> Result<SessionState, InfraError> {
        let runtime = Handle::try_current()
            .map_err(|error| InfraError::store(format!("session ticker needs a tokio runtime: {error}")))?;
        let (replaced, started, epoch) = {
            let mut state = self.shared.lock()?;
            let replaced = state.timer.start(session_type);
            state.epoch += 1;
            (replaced, state.timer.state(), state.epoch)
        };

        if let Some(replaced) = replaced {
            log::info!(
                "session for {} replaced with {} seconds left",
                self.shared.owner,
                replaced.remaining_seconds
            );
            self.shared.emit(SessionEvent::Cancelled { state: replaced });
        }
        self.shared.emit(SessionEvent::Started { state: started });
        runtime.spawn(drive(
            Arc::clone(&self.shared),
            Arc::clone(&self.now_provider),
            epoch,
            self.tick_period,
        ));
        Ok(started)
    }

    pub fn pause(&self) -> Result<SessionState, InfraError> {
        let (changed, state) = {
            let mut runner = self.shared.lock()?;
            (runner.timer.pause(), runner.timer.state())
        };
        if changed {
            self.shared.emit(SessionEvent::Paused { state });
        }
        Ok(state)
    }

    pub fn resume(&self) -> Result<SessionState, InfraError> {
        let (changed, state) = {
            let mut runner = self.shared.lock()?;
            (runner.timer.resume(), runner.timer.state())
        };
        if changed {
            self.shared.emit(SessionEvent::Resumed { state });
        }
        Ok(state)
    }

    /// Discards the running session without a metric. A completion write
    /// already in flight still finishes.
    pub fn cancel(&self) -> Result<SessionState, InfraError> {
        let cancelled = {
            let mut runner = self.shared.lock()?;
            let cancelled = runner.timer.cancel();
            if cancelled.is_some() {
                runner.epoch += 1;
            }
            cancelled
        };
        if let Some(state) = cancelled {
            self.shared.emit(SessionEvent::Cancelled { state });
        }
        Ok(SessionState::IDLE)
    }
}

async fn drive<M>(shared: Arc<Shared<M>>, now_provider: NowProvider, epoch: u64, period: Duration)
where
    M: MetricSink + ?Sized + 'static,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let (outcome, state) = {
            let Ok(mut runner) = shared.state.lock() else {
                log::error!("session lock poisoned for {}", shared.owner);
                return;
            };
            if runner.epoch != epoch {
                return;
            }
            (runner.timer.tick(), runner.timer.state())
        };

        match outcome {
            TickOutcome::Idle => return,
            TickOutcome::Paused => {}
            TickOutcome::Ticked { .. } => shared.emit(SessionEvent::Ticked { state }),
            TickOutcome::PhaseChanged { .. } => shared.emit(SessionEvent::PhaseChanged { state }),
            TickOutcome::Completed(completion) => {
                let event = completion.metric(&shared.owner, now_provider());
                let recorded = match shared.metrics.record(event).await {
                    Ok(()) => true,
                    Err(error) => {
                        log::error!(
                            "failed to record {} for {}: {error}",
                            completion.metric_type().as_str(),
                            shared.owner
                        );
                        false
                    }
                };
                shared.emit(SessionEvent::Completed {
                    completion,
                    recorded,
                });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{MetricEvent, MetricType, MetricValue, SessionPhase};
    use crate::infrastructure::metric_store::InMemoryMetricStore;
    use async_trait::async_trait;
    use chrono::DateTime;
    use tokio::sync::Notify;

    fn runner(metrics: &Arc<InMemoryMetricStore>) -> SessionRunner<InMemoryMetricStore> {
        SessionRunner::new(
            "alice",
            Arc::clone(metrics),
            SessionDurations::from_seconds(2, 1, 3),
            Duration::from_secs(1),
        )
    }

    async fn next_completion(events: &mut broadcast::Receiver<SessionEvent>) -> (SessionCompletion, bool) {
        loop {
            match events.recv().await.expect("session event") {
                SessionEvent::Completed {
                    completion,
                    recorded,
                } => return (completion, recorded),
                _ => continue,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn focus_session_flips_to_break_then_records_one_metric() {
        let metrics = Arc::new(InMemoryMetricStore::default());
        let runner = runner(&metrics);
        let mut events = runner.subscribe();

        let started = runner.start(SessionType::Focus).expect("start");
        assert_eq!(started.phase, Some(SessionPhase::Work));
        assert_eq!(started.remaining_seconds, 2);

        let mut seen = Vec::new();
        loop {
            let event = events.recv().await.expect("event");
            let done = matches!(event, SessionEvent::Completed { .. });
            seen.push(event);
            if done {
                break;
            }
        }

        let phase_change = seen
            .iter()
            .find_map(|event| match event {
                SessionEvent::PhaseChanged { state } => Some(*state),
                _ => None,
            })
            .expect("phase change event");
        assert_eq!(phase_change.phase, Some(SessionPhase::Break));
        assert_eq!(phase_change.remaining_seconds, 1);

        let recorded = metrics.snapshot();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].metric_type, MetricType::FocusSession);
        assert_eq!(recorded[0].value, MetricValue::Duration { seconds: 2 });
        assert!(runner.state().expect("state").is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_work_records_nothing() {
        let metrics = Arc::new(InMemoryMetricStore::default());
        let runner = runner(&metrics);
        let mut events = runner.subscribe();

        runner.start(SessionType::Focus).expect("start");
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(runner.state().expect("state").remaining_seconds, 1);

        runner.cancel().expect("cancel");
        assert!(runner.state().expect("state").is_idle());
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(metrics.snapshot().is_empty());
        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event);
        }
        assert!(kinds.iter().any(|event| matches!(event, SessionEvent::Cancelled { .. })));
        assert!(!kinds.iter().any(|event| matches!(event, SessionEvent::Completed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_countdown_until_resume() {
        let metrics = Arc::new(InMemoryMetricStore::default());
        let runner = runner(&metrics);
        let mut events = runner.subscribe();

        runner.start(SessionType::Meditation).expect("start");
        assert!(runner.pause().expect("pause").paused);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runner.state().expect("state").remaining_seconds, 3);
        assert!(metrics.snapshot().is_empty());

        assert!(!runner.resume().expect("resume").paused);
        let (completion, recorded) = next_completion(&mut events).await;
        assert!(recorded);
        assert_eq!(completion.metric_type(), MetricType::MeditationSession);
        assert_eq!(completion.credited_seconds, 3);
        assert_eq!(metrics.snapshot().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_retires_the_previous_ticker() {
        let metrics = Arc::new(InMemoryMetricStore::default());
        let runner = runner(&metrics);
        let mut events = runner.subscribe();

        runner.start(SessionType::Meditation).expect("first start");
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        runner.start(SessionType::Focus).expect("second start");

        let (completion, _) = next_completion(&mut events).await;
        assert_eq!(completion.session_type, SessionType::Focus);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(metrics.snapshot().len(), 1);
        assert_eq!(metrics.snapshot()[0].metric_type, MetricType::FocusSession);
    }

    #[tokio::test]
    async fn idle_controls_are_noops() {
        let metrics = Arc::new(InMemoryMetricStore::default());
        let runner = runner(&metrics);
        assert_eq!(runner.pause().expect("pause"), SessionState::IDLE);
        assert_eq!(runner.resume().expect("resume"), SessionState::IDLE);
        assert_eq!(runner.cancel().expect("cancel"), SessionState::IDLE);
    }

    struct UnavailableMetrics;

    #[async_trait]
    impl MetricSink for UnavailableMetrics {
        async fn record(&self, _event: MetricEvent) -> Result<(), InfraError> {
            Err(InfraError::store("metrics backend offline"))
        }

        async fn list_for_owner(
            &self,
            _owner: &str,
            _limit: Option<usize>,
        ) -> Result<Vec<MetricEvent>, InfraError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_metric_write_still_returns_to_idle() {
        let runner = SessionRunner::new(
            "alice",
            Arc::new(UnavailableMetrics),
            SessionDurations::from_seconds(1, 1, 1),
            Duration::from_secs(1),
        );
        let mut events = runner.subscribe();
        runner.start(SessionType::Meditation).expect("start");
        let (_, recorded) = next_completion(&mut events).await;
        assert!(!recorded);
        assert!(runner.state().expect("state").is_idle());
    }

    #[test]
    fn start_outside_a_runtime_fails_and_stays_idle() {
        let metrics = Arc::new(InMemoryMetricStore::default());
        let runner = runner(&metrics);
        let mut events = runner.subscribe();

        assert!(matches!(
            runner.start(SessionType::Focus),
            Err(InfraError::Store(_))
        ));
        assert!(runner.state().expect("state").is_idle());
        assert!(events.try_recv().is_err());
    }

    /// Holds each completion write until `release` is notified.
    #[derive(Default)]
    struct GatedMetrics {
        entered: Notify,
        release: Notify,
        recorded: Mutex<Vec<MetricEvent>>,
    }

    #[async_trait]
    impl MetricSink for GatedMetrics {
        async fn record(&self, event: MetricEvent) -> Result<(), InfraError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.recorded.lock().expect("recorded lock").push(event);
            Ok(())
        }

        async fn list_for_owner(
            &self,
            _owner: &str,
            _limit: Option<usize>,
        ) -> Result<Vec<MetricEvent>, InfraError> {
            Ok(self.recorded.lock().expect("recorded lock").clone())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_completion_write_counts_the_session_once() {
        let metrics = Arc::new(GatedMetrics::default());
        let runner = SessionRunner::new(
            "alice",
            Arc::clone(&metrics),
            SessionDurations::from_seconds(1, 1, 1),
            Duration::from_secs(1),
        );
        let mut events = runner.subscribe();

        runner.start(SessionType::Meditation).expect("start");
        metrics.entered.notified().await;
        assert_eq!(runner.cancel().expect("cancel"), SessionState::IDLE);
        assert!(runner.state().expect("state").is_idle());
        metrics.release.notify_one();

        let mut seen = Vec::new();
        loop {
            let event = events.recv().await.expect("event");
            let done = matches!(event, SessionEvent::Completed { .. });
            seen.push(event);
            if done {
                break;
            }
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }

        let completed = seen
            .iter()
            .filter(|event| matches!(event, SessionEvent::Completed { recorded: true, .. }))
            .count();
        assert_eq!(completed, 1);
        assert!(!seen.iter().any(|event| matches!(event, SessionEvent::Cancelled { .. })));
        assert_eq!(metrics.recorded.lock().expect("recorded lock").len(), 1);
        assert_eq!(runner.state().expect("state"), SessionState::IDLE);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_metric_uses_the_injected_clock() {
        let stamp = DateTime::parse_from_rfc3339("2026-02-16T09:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc);
        let metrics = Arc::new(InMemoryMetricStore::default());
        let runner = runner(&metrics).with_now_provider(Arc::new(move || stamp));
        let mut events = runner.subscribe();

        runner.start(SessionType::Meditation).expect("start");
        next_completion(&mut events).await;
        assert_eq!(metrics.snapshot()[0].created_at, stamp);
    }
}
