use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    /// The shared library could not be loaded.
    #[error("failed to load plugin {path}: {reason}")]
    Load { path: String, reason: String },

    /// A required entry point is not exported.
    #[error("plugin {path} does not export `{symbol}`: {reason}")]
    MissingSymbol {
        path: String,
        symbol: &'static str,
        reason: String,
    },

    /// An argument cannot cross the C boundary (e.g. interior NUL byte).
    #[error("invalid plugin argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },
}
