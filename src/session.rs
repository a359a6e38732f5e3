//! The form session: one task that owns the [`FormState`].
//!
//! User events, debounce signals and finished lookups all arrive on channels
//! and are handled one at a time by the session task, so the state never needs
//! a lock. Lookups run in their own tasks and report back; once the session is
//! closed their results have nowhere to go and are dropped.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::debounce::{DEFAULT_QUIET_PERIOD, DebounceScheduler, Stabilized};
use crate::error::SessionClosed;
use crate::lookup::LocalityLookup;
use crate::postal_code;
use crate::resolve::{self, Resolution, ResolutionEngine};
use crate::state::{FieldChange, FormState};
use crate::types::{Field, FormEvent};

/// Configuration for FormSession
#[derive(Debug, Clone)]
pub struct FormConfig {
    /// How long a field must stay unchanged before it is looked up
    pub quiet_period: Duration,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            quiet_period: DEFAULT_QUIET_PERIOD,
        }
    }
}

impl FormConfig {
    /// Read `PLZ_DEBOUNCE_MS`, falling back to one second
    pub fn from_env() -> Self {
        Self {
            quiet_period: env::var("PLZ_DEBOUNCE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_QUIET_PERIOD),
        }
    }
}

enum Command {
    Event {
        event: FormEvent,
        reply: Option<oneshot::Sender<FormState>>,
    },
    Close,
}

/// Everything the session task owns
struct FormCore {
    state: FormState,
    scheduler: DebounceScheduler,
    engine: ResolutionEngine,
    resolutions: mpsc::UnboundedSender<Resolution>,
}

impl FormCore {
    fn handle_event(&mut self, event: FormEvent) {
        match event {
            FormEvent::CityEdited(value) => self.edit(Field::City, value),
            FormEvent::PostalCodeEdited(value) => {
                self.edit(Field::PostalCode, postal_code::clamp(&value))
            }
            FormEvent::CandidateSelected(code) => {
                resolve::confirm_candidate(&mut self.state, &code);
                self.scheduler.cancel_all();
            }
        }
    }

    fn edit(&mut self, field: Field, value: String) {
        let change = self.state.apply(FieldChange::manual(field, value));
        self.forward(change);
    }

    fn forward(&mut self, change: FieldChange) {
        self.scheduler
            .on_field_changed(change.field, &change.value, change.origin);
    }

    fn handle_stabilized(&mut self, signal: Stabilized) {
        if !self.scheduler.accept(&signal) {
            tracing::debug!("Dropping superseded {} signal", signal.field);
            return;
        }
        self.state.settle(signal.field);

        let engine = self.engine.clone();
        let resolutions = self.resolutions.clone();
        tokio::spawn(async move {
            if let Some(resolution) = engine.resolve(signal.field, signal.value).await {
                // Receiver gone means the session was closed mid-lookup
                let _ = resolutions.send(resolution);
            }
        });
    }

    fn handle_resolution(&mut self, resolution: Resolution) {
        if let Some(change) = resolution.apply(&mut self.state) {
            self.forward(change);
        }
    }
}

async fn run(
    mut core: FormCore,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut signals: mpsc::UnboundedReceiver<Stabilized>,
    mut resolutions: mpsc::UnboundedReceiver<Resolution>,
    published: watch::Sender<FormState>,
) {
    loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(Command::Event { event, reply }) => {
                    core.handle_event(event);
                    if let Some(reply) = reply {
                        let _ = reply.send(core.state.clone());
                    }
                }
                Some(Command::Close) | None => break,
            },
            Some(signal) = signals.recv() => core.handle_stabilized(signal),
            Some(resolution) = resolutions.recv() => core.handle_resolution(resolution),
        }

        published.send_if_modified(|current| {
            if *current == core.state {
                return false;
            }
            current.clone_from(&core.state);
            true
        });
    }

    core.scheduler.cancel_all();
    tracing::debug!("Form session closed");
}

/// A running form session
pub struct FormSession {
    handle: FormHandle,
    task: JoinHandle<()>,
}

impl FormSession {
    /// Start a session with an empty form
    pub fn spawn(lookup: Arc<dyn LocalityLookup>, config: FormConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (resolution_tx, resolution_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(FormState::new());

        let core = FormCore {
            state: FormState::new(),
            scheduler: DebounceScheduler::new(config.quiet_period, signal_tx),
            engine: ResolutionEngine::new(lookup),
            resolutions: resolution_tx,
        };
        let task = tokio::spawn(run(core, command_rx, signal_rx, resolution_rx, state_tx));

        Self {
            handle: FormHandle {
                commands: command_tx,
                state: state_rx,
            },
            task,
        }
    }

    pub fn handle(&self) -> FormHandle {
        self.handle.clone()
    }

    /// Dispose the session, cancelling pending timers.
    /// This method consumes self to prevent use after close.
    pub async fn close(self) -> Result<()> {
        let _ = self.handle.commands.send(Command::Close);
        self.task.await.context("Form session task panicked")?;
        Ok(())
    }
}

/// Cheap, clonable access to a running session
#[derive(Clone)]
pub struct FormHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<FormState>,
}

impl FormHandle {
    /// Forward an event without waiting for it to be handled
    pub fn send(&self, event: FormEvent) -> Result<(), SessionClosed> {
        self.commands
            .send(Command::Event { event, reply: None })
            .map_err(|_| SessionClosed)
    }

    /// Forward an event and return the form as it is right after handling it
    pub async fn dispatch(&self, event: FormEvent) -> Result<FormState, SessionClosed> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Event {
                event,
                reply: Some(reply_tx),
            })
            .map_err(|_| SessionClosed)?;
        reply_rx.await.map_err(|_| SessionClosed)
    }

    pub fn city_edited(&self, value: impl Into<String>) -> Result<(), SessionClosed> {
        self.send(FormEvent::CityEdited(value.into()))
    }

    pub fn postal_code_edited(&self, value: impl Into<String>) -> Result<(), SessionClosed> {
        self.send(FormEvent::PostalCodeEdited(value.into()))
    }

    pub fn candidate_selected(&self, code: impl Into<String>) -> Result<(), SessionClosed> {
        self.send(FormEvent::CandidateSelected(code.into()))
    }

    /// Latest published state
    pub fn snapshot(&self) -> FormState {
        self.state.borrow().clone()
    }

    /// Receiver that is notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<FormState> {
        self.state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::error::LookupError;
    use crate::lookup::StaticLookup;
    use crate::types::{Locality, Origin};

    const SETTLE: Duration = Duration::from_millis(1100);

    fn sample_session() -> (Arc<StaticLookup>, FormSession) {
        let lookup = Arc::new(StaticLookup::sample());
        let session = FormSession::spawn(lookup.clone(), FormConfig::default());
        (lookup, session)
    }

    /// Core driven by hand, for inspecting the scheduler directly
    fn detached_core(
        lookup: Arc<dyn LocalityLookup>,
    ) -> (FormCore, mpsc::UnboundedReceiver<Stabilized>) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (resolution_tx, _resolution_rx) = mpsc::unbounded_channel();
        let core = FormCore {
            state: FormState::new(),
            scheduler: DebounceScheduler::new(DEFAULT_QUIET_PERIOD, signal_tx),
            engine: ResolutionEngine::new(lookup),
            resolutions: resolution_tx,
        };
        (core, signal_rx)
    }

    struct UnavailableLookup;

    #[async_trait]
    impl LocalityLookup for UnavailableLookup {
        async fn lookup_by_name(&self, _name: &str) -> Result<Vec<Locality>, LookupError> {
            Err(LookupError::Status {
                status: 503,
                body: String::new(),
            })
        }

        async fn lookup_by_postal_code(&self, _code: &str) -> Result<Vec<Locality>, LookupError> {
            Err(LookupError::Status {
                status: 503,
                body: String::new(),
            })
        }
    }

    /// Answers after a long delay
    struct SlowLookup(StaticLookup);

    #[async_trait]
    impl LocalityLookup for SlowLookup {
        async fn lookup_by_name(&self, name: &str) -> Result<Vec<Locality>, LookupError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.0.lookup_by_name(name).await
        }

        async fn lookup_by_postal_code(&self, code: &str) -> Result<Vec<Locality>, LookupError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.0.lookup_by_postal_code(code).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_city_fills_postal_code() {
        let lookup = Arc::new(StaticLookup::new(vec![
            Locality::new("Berlin", "10115"),
            Locality::new("Berlingerode", "37327"),
        ]));
        let session = FormSession::spawn(lookup.clone(), FormConfig::default());
        let form = session.handle();

        let state = form
            .dispatch(FormEvent::CityEdited("Berlin".into()))
            .await
            .unwrap();
        assert_eq!(state.postal_code, "");

        tokio::time::sleep(SETTLE).await;
        let state = form.snapshot();
        assert_eq!(state.postal_code, "10115");
        assert_eq!(state.postal_code_origin, Origin::System);
        assert_eq!(state.error_message(), "");
        assert!(state.postal_code_candidates.is_empty());

        // The system-filled PLZ must not bounce back into a PLZ lookup
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(lookup.queries(), vec![(Field::City, "Berlin".to_string())]);

        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_update_arms_no_reverse_timer() {
        let (mut core, mut signals) = detached_core(Arc::new(StaticLookup::sample()));
        core.handle_event(FormEvent::CityEdited("Berlin".into()));
        assert!(core.scheduler.is_armed(Field::City));

        tokio::time::sleep(SETTLE).await;
        let signal = signals.recv().await.unwrap();
        core.handle_stabilized(signal);
        assert!(!core.scheduler.is_armed(Field::City));

        let resolution = core
            .engine
            .resolve(Field::City, "Berlin".to_string())
            .await
            .unwrap();
        core.handle_resolution(resolution);

        assert_eq!(core.state.postal_code, "10115");
        assert!(!core.scheduler.is_armed(Field::PostalCode));
        assert!(!core.scheduler.is_armed(Field::City));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_edits_cause_one_lookup() {
        let (lookup, session) = sample_session();
        let form = session.handle();

        for value in ["Ber", "Berl", "Berli", "Berlin"] {
            form.city_edited(value).unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(lookup.queries(), vec![(Field::City, "Berlin".to_string())]);
        assert_eq!(form.snapshot().postal_code, "10115");
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_postal_code_fills_city() {
        let (_lookup, session) = sample_session();
        let form = session.handle();

        form.postal_code_edited("80331").unwrap();
        tokio::time::sleep(SETTLE).await;

        let state = form.snapshot();
        assert_eq!(state.city, "München");
        assert_eq!(state.city_origin, Origin::System);
        assert_eq!(state.postal_code_origin, Origin::Manual);
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_postal_code() {
        let (_lookup, session) = sample_session();
        let form = session.handle();

        form.city_edited("Ul").unwrap();
        form.postal_code_edited("54321").unwrap();
        tokio::time::sleep(SETTLE).await;

        let state = form.snapshot();
        assert_eq!(state.error_message(), "PLZ not found.");
        assert_eq!(state.city, "Ul");
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ambiguous_city_then_selection() {
        let (lookup, session) = sample_session();
        let form = session.handle();

        form.city_edited("Schönberg").unwrap();
        tokio::time::sleep(SETTLE).await;

        let state = form.snapshot();
        let codes: Vec<&str> = state
            .postal_code_candidates
            .iter()
            .map(|l| l.postal_code.as_str())
            .collect();
        assert_eq!(codes, vec!["23923", "18233", "94513"]);
        assert_eq!(state.postal_code, "");

        let state = form
            .dispatch(FormEvent::CandidateSelected("18233".into()))
            .await
            .unwrap();
        assert_eq!(state.postal_code, "18233");
        assert_eq!(state.city, "Schönberg");
        assert!(state.postal_code_candidates.is_empty());
        assert_eq!(state.city_origin, Origin::Manual);
        assert_eq!(state.postal_code_origin, Origin::Manual);

        // Selection bypasses debouncing entirely
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(lookup.queries().len(), 1);
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_edits_after_selection_arm_timers() {
        let (mut core, mut signals) = detached_core(Arc::new(StaticLookup::sample()));
        core.handle_event(FormEvent::CityEdited("Schönberg".into()));
        tokio::time::sleep(SETTLE).await;
        core.handle_stabilized(signals.recv().await.unwrap());
        let resolution = core
            .engine
            .resolve(Field::City, "Schönberg".to_string())
            .await
            .unwrap();
        core.handle_resolution(resolution);
        core.handle_event(FormEvent::CandidateSelected("23923".into()));
        assert!(!core.scheduler.is_armed(Field::City));
        assert!(!core.scheduler.is_armed(Field::PostalCode));

        core.handle_event(FormEvent::PostalCodeEdited("18233".into()));
        assert!(core.scheduler.is_armed(Field::PostalCode));
        core.handle_event(FormEvent::CityEdited("Schönberg".into()));
        assert!(core.scheduler.is_armed(Field::City));
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_clears_candidates() {
        let (_lookup, session) = sample_session();
        let form = session.handle();

        form.city_edited("Schönberg").unwrap();
        tokio::time::sleep(SETTLE).await;
        assert_eq!(form.snapshot().postal_code_candidates.len(), 3);

        let state = form
            .dispatch(FormEvent::PostalCodeEdited("2".into()))
            .await
            .unwrap();
        assert!(state.postal_code_candidates.is_empty());

        // A selection from the closed list still sets the code but not the city
        let state = form
            .dispatch(FormEvent::CandidateSelected("23923".into()))
            .await
            .unwrap();
        assert_eq!(state.postal_code, "23923");
        assert_eq!(state.city, "Schönberg");
        assert_eq!(state.postal_code_origin, Origin::Manual);
        tokio::time::sleep(SETTLE).await;
        assert_eq!(form.snapshot().postal_code, "23923");
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_postal_code_is_not_overwritten() {
        let (_lookup, session) = sample_session();
        let form = session.handle();

        form.postal_code_edited("101").unwrap();
        form.city_edited("Berlin").unwrap();
        tokio::time::sleep(SETTLE).await;

        let state = form.snapshot();
        assert_eq!(state.postal_code, "101");
        assert_eq!(state.error, None);
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_postal_code_input_is_clamped() {
        let (lookup, session) = sample_session();
        let form = session.handle();

        let state = form
            .dispatch(FormEvent::PostalCodeEdited("8907312".into()))
            .await
            .unwrap();
        assert_eq!(state.postal_code, "89073");

        tokio::time::sleep(SETTLE).await;
        assert_eq!(lookup.queries(), vec![(Field::PostalCode, "89073".to_string())]);
        assert_eq!(form.snapshot().city, "Ulm");
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_failure_is_reported_not_retried() {
        let session = FormSession::spawn(Arc::new(UnavailableLookup), FormConfig::default());
        let form = session.handle();

        form.postal_code_edited("10115").unwrap();
        tokio::time::sleep(SETTLE).await;
        let state = form.snapshot();
        assert_eq!(state.error_message(), "Error fetching PLZ data.");
        assert_eq!(state.city, "");

        form.city_edited("Berlin").unwrap();
        tokio::time::sleep(SETTLE).await;
        let state = form.snapshot();
        assert_eq!(state.error_message(), "Error fetching city data.");
        assert_eq!(state.postal_code, "10115");
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_lookup_clears_stale_error() {
        let (_lookup, session) = sample_session();
        let form = session.handle();

        form.city_edited("Atlantis").unwrap();
        tokio::time::sleep(SETTLE).await;
        assert_eq!(form.snapshot().error_message(), "City not found.");

        form.city_edited("Hamburg").unwrap();
        tokio::time::sleep(SETTLE).await;
        let state = form.snapshot();
        assert_eq!(state.error, None);
        assert_eq!(state.postal_code, "20095");
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_result_respects_new_typing() {
        let lookup = Arc::new(SlowLookup(StaticLookup::sample()));
        let session = FormSession::spawn(lookup, FormConfig::default());
        let form = session.handle();

        form.postal_code_edited("20095").unwrap();
        tokio::time::sleep(SETTLE).await;
        // Lookup is in flight; the user starts typing a city meanwhile
        form.city_edited("Ha").unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        let state = form.snapshot();
        assert_eq!(state.city, "Ha");
        assert_eq!(state.error, None);
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_result_fills_cleared_city() {
        let lookup = Arc::new(SlowLookup(StaticLookup::sample()));
        let session = FormSession::spawn(lookup, FormConfig::default());
        let form = session.handle();

        form.postal_code_edited("20095").unwrap();
        tokio::time::sleep(SETTLE).await;
        form.city_edited("Ha").unwrap();
        form.city_edited("").unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(form.snapshot().city, "Hamburg");
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_discards_in_flight_lookup() {
        let lookup = Arc::new(SlowLookup(StaticLookup::sample()));
        let session = FormSession::spawn(lookup, FormConfig::default());
        let form = session.handle();

        form.city_edited("Berlin").unwrap();
        tokio::time::sleep(SETTLE).await;
        session.close().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(form.snapshot().postal_code, "");
        assert_eq!(form.city_edited("Bonn"), Err(SessionClosed));
        assert_eq!(
            form.dispatch(FormEvent::CityEdited("Bonn".into())).await,
            Err(SessionClosed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_timer() {
        let (lookup, session) = sample_session();
        let form = session.handle();

        form.city_edited("Berlin").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        session.close().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(lookup.queries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_changes() {
        let (_lookup, session) = sample_session();
        let form = session.handle();
        let mut updates = form.subscribe();

        form.city_edited("Ulm").unwrap();
        updates.changed().await.unwrap();
        assert_eq!(updates.borrow_and_update().city, "Ulm");

        let state = updates
            .wait_for(|state| !state.postal_code.is_empty())
            .await
            .unwrap();
        assert_eq!(state.postal_code, "89073");
        drop(state);
        session.close().await.unwrap();
    }
}
