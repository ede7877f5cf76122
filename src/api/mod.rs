//! Detection service client helpers.

/// Anti-forgery token lookup.
pub mod csrf;
/// Multipart detection request and response parsing.
pub mod detect;
