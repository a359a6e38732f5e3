//! Error types for lookups and form resolution.
//!
//! Lookup failures never leave the session: the resolution engine folds them
//! into a [`ResolutionError`], whose `Display` text is what the form shows.

use thiserror::Error;

/// A failed call to the locality lookup service.
#[derive(Error, Debug)]
pub enum LookupError {
    /// The request could not be sent or the response body could not be read.
    #[error("Lookup request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("Lookup service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body was not a list of localities.
    #[error("Failed to parse lookup response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A user-visible resolution failure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("City not found.")]
    CityNotFound,

    #[error("Error fetching city data.")]
    CityLookupFailed,

    #[error("PLZ not found.")]
    PostalCodeNotFound,

    #[error("Error fetching PLZ data.")]
    PostalCodeLookupFailed,
}

/// The form session has been disposed and accepts no more events.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Form session is closed")]
pub struct SessionClosed;
