//! Locality lookup trait and an in-memory implementation.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::LookupError;
use crate::types::{Field, Locality};

/// A source of German localities.
///
/// Implementations may return partial name matches; the resolution engine
/// narrows them down itself.
#[async_trait]
pub trait LocalityLookup: Send + Sync {
    /// Localities whose name matches `name`
    async fn lookup_by_name(&self, name: &str) -> Result<Vec<Locality>, LookupError>;

    /// Localities using `code` as postal code
    async fn lookup_by_postal_code(&self, code: &str) -> Result<Vec<Locality>, LookupError>;
}

/// Lookup over a fixed list of localities.
///
/// Name queries match case-insensitive substrings, like the remote service.
/// Every query is recorded and can be read back with [`StaticLookup::queries`].
#[derive(Debug, Default)]
pub struct StaticLookup {
    localities: Vec<Locality>,
    queries: Mutex<Vec<(Field, String)>>,
}

impl StaticLookup {
    pub fn new(localities: Vec<Locality>) -> Self {
        Self {
            localities,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// A handful of real localities, enough to try the form offline
    pub fn sample() -> Self {
        Self::new(vec![
            Locality::new("Berlin", "10115"),
            Locality::new("Hamburg", "20095"),
            Locality::new("München", "80331"),
            Locality::new("Ulm", "89073"),
            Locality::new("Schönberg", "23923"),
            Locality::new("Schönberg", "18233"),
            Locality::new("Schönberg (Holstein)", "24217"),
            Locality::new("Schönberg", "94513"),
        ])
    }

    /// Queries received so far, oldest first
    pub fn queries(&self) -> Vec<(Field, String)> {
        self.queries
            .lock()
            .map(|queries| queries.clone())
            .unwrap_or_default()
    }

    fn record(&self, field: Field, query: &str) {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push((field, query.to_string()));
        }
    }
}

#[async_trait]
impl LocalityLookup for StaticLookup {
    async fn lookup_by_name(&self, name: &str) -> Result<Vec<Locality>, LookupError> {
        self.record(Field::City, name);
        let needle = name.to_lowercase();
        Ok(self
            .localities
            .iter()
            .filter(|l| l.name.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    async fn lookup_by_postal_code(&self, code: &str) -> Result<Vec<Locality>, LookupError> {
        self.record(Field::PostalCode, code);
        Ok(self
            .localities
            .iter()
            .filter(|l| l.postal_code == code)
            .cloned()
            .collect())
    }
}
