pub mod client;
pub mod debounce;
pub mod error;
pub mod lookup;
pub mod postal_code;
pub mod resolve;
pub mod session;
pub mod state;
pub mod types;

pub use client::{OpenPlzClient, OpenPlzConfig};
pub use error::{LookupError, ResolutionError, SessionClosed};
pub use lookup::{LocalityLookup, StaticLookup};
pub use session::{FormConfig, FormHandle, FormSession};
pub use state::FormState;
pub use types::{Field, FormEvent, Locality, Origin};
