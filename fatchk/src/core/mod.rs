// === Sub-modules ===
pub mod checker;
pub mod errors;
pub mod macros;
pub mod meta;
pub mod utils;

// === Error types ===
pub use errors::*;
