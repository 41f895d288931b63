pub mod executor;
pub mod logging;
pub mod model;
pub mod patch;
pub mod traits;

// Re-export common types for convenience
pub use executor::*;
pub use model::*;
pub use patch::{Collaborators, PatchError, PatchOutcome, PatchRequest};
pub use traits::*;
