//! Structured Output Parsing
//!
//! Robust parsing of sub-agent tool output with fuzzy repair and validation.
//!
//! # Features
//!
//! - **Fuzzy JSON parsing**: Handles markdown fences, trailing commas, etc.
//! - **Graceful degradation**: Falls back to raw output on failure
//!
//! # Example
//!
//! ```rust,ignore
//! use delegation_core::parsing::{JsonParser, OutputParser};
//!
//! let parser = JsonParser::new();
//! let result = parser.parse("```json\n{\"key\": \"value\",}\n```")?;
//! assert_eq!(result["key"], "value");
//! ```

mod json;
mod parser;

pub use json::JsonParser;
pub use parser::{OutputParser, ParseError, ParseResult};
