//! Resolution of one field from the other.
//!
//! Resolving is split in two halves: [`ResolutionEngine::resolve`] performs the
//! lookup and may run anywhere, while [`Resolution::apply`] and
//! [`confirm_candidate`] are pure transitions on [`FormState`] that only the
//! session task calls.

use std::sync::Arc;

use crate::error::{LookupError, ResolutionError};
use crate::lookup::LocalityLookup;
use crate::postal_code;
use crate::state::{FieldChange, FormState};
use crate::types::{Field, Locality};

/// Finished lookup waiting to be applied to the form
#[derive(Debug)]
pub enum Resolution {
    City {
        query: String,
        outcome: Result<Vec<Locality>, LookupError>,
    },
    PostalCode {
        query: String,
        outcome: Result<Vec<Locality>, LookupError>,
    },
}

impl Resolution {
    /// Fold the lookup result into the form.
    ///
    /// Returns the system write to the opposite field, if one was made.
    pub fn apply(self, state: &mut FormState) -> Option<FieldChange> {
        match self {
            Self::City { query, outcome } => resolve_city_to_postal(state, &query, outcome),
            Self::PostalCode { query, outcome } => resolve_postal_to_city(state, &query, outcome),
        }
    }
}

#[derive(Clone)]
pub struct ResolutionEngine {
    lookup: Arc<dyn LocalityLookup>,
}

impl ResolutionEngine {
    pub fn new(lookup: Arc<dyn LocalityLookup>) -> Self {
        Self { lookup }
    }

    /// Look up the counterpart of a settled field value.
    ///
    /// Returns `None` for postal codes that are not exactly five characters.
    pub async fn resolve(&self, field: Field, query: String) -> Option<Resolution> {
        match field {
            Field::City => {
                let outcome = self.lookup.lookup_by_name(&query).await;
                Some(Resolution::City { query, outcome })
            }
            Field::PostalCode => {
                if !postal_code::is_complete(&query) {
                    tracing::debug!("Skipping lookup for incomplete PLZ {:?}", query);
                    return None;
                }
                let outcome = self.lookup.lookup_by_postal_code(&query).await;
                Some(Resolution::PostalCode { query, outcome })
            }
        }
    }
}

/// Keep only localities whose name equals `city`, ignoring case
pub fn exact_matches(city: &str, localities: Vec<Locality>) -> Vec<Locality> {
    let wanted = city.to_lowercase();
    localities
        .into_iter()
        .filter(|l| l.name.to_lowercase() == wanted)
        .collect()
}

pub fn resolve_city_to_postal(
    state: &mut FormState,
    city: &str,
    outcome: Result<Vec<Locality>, LookupError>,
) -> Option<FieldChange> {
    let localities = match outcome {
        Ok(localities) => localities,
        Err(e) => {
            tracing::warn!("City lookup for {:?} failed: {}", city, e);
            state.error = Some(ResolutionError::CityLookupFailed);
            state.postal_code_candidates.clear();
            return None;
        }
    };

    let mut matches = exact_matches(city, localities);
    match matches.len() {
        0 => {
            tracing::info!("No locality named {:?}", city);
            state.error = Some(ResolutionError::CityNotFound);
            state.postal_code_candidates.clear();
            None
        }
        1 => {
            state.error = None;
            state.postal_code_candidates.clear();
            let locality = matches.remove(0);
            if state.is_mid_edit(Field::PostalCode) {
                tracing::info!(
                    "{:?} resolves to {}, keeping the PLZ being typed",
                    city,
                    locality.postal_code
                );
                return None;
            }
            tracing::info!("{:?} resolves to PLZ {}", city, locality.postal_code);
            Some(state.apply(FieldChange::system(
                Field::PostalCode,
                locality.postal_code,
            )))
        }
        n => {
            tracing::info!("{:?} has {} postal codes, awaiting selection", city, n);
            state.error = None;
            state.postal_code_candidates = matches;
            None
        }
    }
}

/// Postal codes can belong to several localities; the first one wins.
pub fn resolve_postal_to_city(
    state: &mut FormState,
    code: &str,
    outcome: Result<Vec<Locality>, LookupError>,
) -> Option<FieldChange> {
    if !postal_code::is_complete(code) {
        return None;
    }

    let localities = match outcome {
        Ok(localities) => localities,
        Err(e) => {
            tracing::warn!("PLZ lookup for {:?} failed: {}", code, e);
            state.error = Some(ResolutionError::PostalCodeLookupFailed);
            return None;
        }
    };

    let Some(first) = localities.into_iter().next() else {
        tracing::info!("No locality with PLZ {:?}", code);
        state.error = Some(ResolutionError::PostalCodeNotFound);
        return None;
    };

    state.error = None;
    if state.is_mid_edit(Field::City) {
        tracing::info!("PLZ {} resolves to {:?}, keeping the city being typed", code, first.name);
        return None;
    }
    tracing::info!("PLZ {} resolves to {:?}", code, first.name);
    Some(state.apply(FieldChange::system(Field::City, first.name)))
}

/// Take the user's pick from the candidate list.
///
/// The picked code always lands in the postal code field and closes the list.
/// Returns whether it matched a candidate, in which case the city is filled
/// from that candidate too.
pub fn confirm_candidate(state: &mut FormState, code: &str) -> bool {
    let selected = state
        .postal_code_candidates
        .iter()
        .find(|l| l.postal_code == code)
        .cloned();

    state.postal_code = code.to_string();
    let matched = match selected {
        Some(locality) => {
            tracing::info!("Selected {} {:?}", locality.postal_code, locality.name);
            state.city = locality.name;
            true
        }
        None => {
            tracing::warn!("Selected {:?} is not a current candidate, city left as is", code);
            false
        }
    };
    state.postal_code_candidates.clear();
    state.error = None;
    state.reset_origins();
    matched
}
