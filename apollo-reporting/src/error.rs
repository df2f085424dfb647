//! Reporting errors.

use displaydoc::Display;
use thiserror::Error;

/// Raised while constructing the reporting feature. Fatal to enabling
/// reporting, never raised per request.
#[derive(Debug, Display, Error)]
pub enum ConfigurationError {
    /// API key must be supplied via options or the ENGINE_API_KEY environment variable
    MissingApiKey,
}
