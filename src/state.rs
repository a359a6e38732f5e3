//! The form's single mutable value and the mutations applied to it.

use serde::{Serialize, Serializer};

use crate::error::ResolutionError;
use crate::types::{Field, Locality, Origin};

/// Current contents of the city/PLZ form.
///
/// Serializes with camelCase keys; `error` is rendered as its message.
/// Mid-edit bookkeeping is internal and not part of the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormState {
    pub city: String,
    pub postal_code: String,
    /// Non-empty only while a multi-match city waits for the user's pick
    pub postal_code_candidates: Vec<Locality>,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<ResolutionError>,
    pub city_origin: Origin,
    pub postal_code_origin: Origin,
    #[serde(skip)]
    city_editing: bool,
    #[serde(skip)]
    postal_code_editing: bool,
}

/// A write of one field's value together with who made it.
///
/// Passed into [`FormState::apply`] and handed back as the change event the
/// debounce scheduler consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: Field,
    pub value: String,
    pub origin: Origin,
}

impl FieldChange {
    pub fn manual(field: Field, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
            origin: Origin::Manual,
        }
    }

    pub fn system(field: Field, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
            origin: Origin::System,
        }
    }
}

impl FormState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Error line as shown to the user, empty when there is none
    pub fn error_message(&self) -> String {
        self.error.map(|e| e.to_string()).unwrap_or_default()
    }

    /// Whether the user has typed into `field` and that input has not settled yet.
    ///
    /// Lookup results never overwrite a field that is mid-edit.
    pub fn is_mid_edit(&self, field: Field) -> bool {
        match field {
            Field::City => self.city_editing,
            Field::PostalCode => self.postal_code_editing,
        }
    }

    /// Replace one field's value and origin.
    ///
    /// A manual write also drops any pending postal code choice.
    pub fn apply(&mut self, change: FieldChange) -> FieldChange {
        let editing = change.origin == Origin::Manual && !change.value.is_empty();
        let (value, origin, mid_edit) = match change.field {
            Field::City => (
                &mut self.city,
                &mut self.city_origin,
                &mut self.city_editing,
            ),
            Field::PostalCode => (
                &mut self.postal_code,
                &mut self.postal_code_origin,
                &mut self.postal_code_editing,
            ),
        };
        value.clone_from(&change.value);
        *origin = change.origin;
        *mid_edit = editing;

        if change.origin == Origin::Manual {
            self.postal_code_candidates.clear();
        }
        change
    }

    /// Mark the field's input as settled once its debounce period has elapsed
    pub fn settle(&mut self, field: Field) {
        match field {
            Field::City => self.city_editing = false,
            Field::PostalCode => self.postal_code_editing = false,
        }
    }

    /// Re-open both fields after the user confirmed a candidate
    pub(crate) fn reset_origins(&mut self) {
        self.city_origin = Origin::Manual;
        self.postal_code_origin = Origin::Manual;
        self.city_editing = false;
        self.postal_code_editing = false;
    }
}

fn serialize_error<S: Serializer>(
    error: &Option<ResolutionError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.collect_str(e),
        None => serializer.serialize_none(),
    }
}
