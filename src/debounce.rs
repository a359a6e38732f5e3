//! Per-field debouncing of manual input.
//!
//! Each field owns at most one armed timer. Re-editing the field drops the
//! old timer (aborting its task) before arming a new one, and every signal
//! carries the generation of the timer that produced it so a signal that was
//! already queued when its timer got superseded can still be recognised and
//! dropped by [`DebounceScheduler::accept`].

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::postal_code;
use crate::types::{Field, Origin};

/// Quiet period before a field's input counts as settled
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_secs(1);

/// A field's input stayed unchanged for a whole quiet period
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stabilized {
    pub field: Field,
    /// Value captured when the timer was armed
    pub value: String,
    generation: u64,
}

/// An armed timer; dropping it aborts the sleeping task
struct DebounceTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct DebounceScheduler {
    quiet_period: Duration,
    signals: mpsc::UnboundedSender<Stabilized>,
    city: Option<DebounceTimer>,
    postal_code: Option<DebounceTimer>,
    next_generation: u64,
}

impl DebounceScheduler {
    pub fn new(quiet_period: Duration, signals: mpsc::UnboundedSender<Stabilized>) -> Self {
        Self {
            quiet_period,
            signals,
            city: None,
            postal_code: None,
            next_generation: 0,
        }
    }

    fn slot_mut(&mut self, field: Field) -> &mut Option<DebounceTimer> {
        match field {
            Field::City => &mut self.city,
            Field::PostalCode => &mut self.postal_code,
        }
    }

    /// React to a field change. Returns whether a timer was armed.
    ///
    /// System writes are swallowed without touching any timer.
    pub fn on_field_changed(&mut self, field: Field, value: &str, origin: Origin) -> bool {
        if origin == Origin::System {
            tracing::debug!("Ignoring system update of {}", field);
            return false;
        }

        self.cancel(field);
        if !postal_code::triggers_lookup(field, value) {
            return false;
        }

        self.arm(field, value.to_string());
        true
    }

    fn arm(&mut self, field: Field, value: String) {
        self.next_generation += 1;
        let generation = self.next_generation;
        tracing::debug!("Arming {} timer #{} for {:?}", field, generation, value);

        let signal = Stabilized {
            field,
            value,
            generation,
        };
        let signals = self.signals.clone();
        let quiet_period = self.quiet_period;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(quiet_period).await;
            // Receiver gone means the session was disposed
            let _ = signals.send(signal);
        });

        *self.slot_mut(field) = Some(DebounceTimer { generation, handle });
    }

    /// Whether `field` has a timer that has not been accepted or cancelled
    pub fn is_armed(&self, field: Field) -> bool {
        match field {
            Field::City => self.city.is_some(),
            Field::PostalCode => self.postal_code.is_some(),
        }
    }

    /// Claim a signal. Returns false if its timer has since been superseded.
    pub fn accept(&mut self, signal: &Stabilized) -> bool {
        let slot = self.slot_mut(signal.field);
        if slot
            .as_ref()
            .is_some_and(|timer| timer.generation == signal.generation)
        {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn cancel(&mut self, field: Field) {
        if self.slot_mut(field).take().is_some() {
            tracing::debug!("Cancelled pending {} timer", field);
        }
    }

    pub fn cancel_all(&mut self) {
        self.cancel(Field::City);
        self.cancel(Field::PostalCode);
    }
}
