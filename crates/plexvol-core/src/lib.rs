pub mod config;
pub mod error;
pub mod types;

pub use error::{PlexError, PlexResult};
pub use types::validate_id;
