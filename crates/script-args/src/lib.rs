//! Parser for script argument strings.
//!
//! Turns `key=value` lists such as `width=512, title="scan 3", normalize=true`
//! into a typed map, and renders typed maps back into that syntax.

pub mod error;
pub mod parser;
pub mod render;

pub use error::{ArgsError, Result};
pub use render::{render_arguments, render_item};

/// Typed arguments keyed by name.
pub type Arguments = serde_json::Map<String, serde_json::Value>;

/// Parse an argument string into a typed map.
///
/// Empty or whitespace-only input yields an empty map. When a key repeats,
/// the last value wins.
pub fn parse(input: &str) -> Result<Arguments> {
    parser::Parser::new(input).parse_arguments()
}
