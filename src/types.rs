use serde::{Deserialize, Serialize};
use std::fmt;

/// A German locality as returned by the lookup service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Locality {
    pub name: String,
    pub postal_code: String,
}

impl Locality {
    pub fn new(name: impl Into<String>, postal_code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            postal_code: postal_code.into(),
        }
    }
}

/// One of the two synchronized form fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    City,
    PostalCode,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::City => write!(f, "city"),
            Self::PostalCode => write!(f, "postal_code"),
        }
    }
}

/// Who wrote the current value of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Origin {
    /// Typed by the user (or re-opened for typing after a confirmed selection)
    #[default]
    Manual,
    /// Derived from a lookup result
    System,
}

/// Events forwarded by a renderer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum FormEvent {
    CityEdited(String),
    PostalCodeEdited(String),
    CandidateSelected(String),
}
