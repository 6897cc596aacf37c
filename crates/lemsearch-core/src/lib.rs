pub mod config;
pub mod error;
pub mod lexeme;
pub mod types;

pub use config::LemConfig;
pub use error::{LemError, Result};
pub use lexeme::RawLexeme;
pub use types::*;
