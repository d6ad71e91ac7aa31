use thiserror::Error;

#[derive(Debug, Error)]
pub enum DynQueryError {
    /// A numeric descriptor field did not parse as a base-10 integer
    #[error("invalid numeric value for '{key}': '{value}'")]
    Format { key: &'static str, value: String },

    /// A requested path head does not resolve on the source shape
    #[error("'{shape}' does not have a field definition for '{field}'")]
    UnknownField { shape: String, field: String },

    /// A field was requested both in full and through its sub-fields
    #[error("'{shape}' cannot select full field '{field}' and also some of its sub-fields")]
    ConflictingSelection { shape: String, field: String },

    /// A declared aggregate-expression field is malformed
    #[error("invalid aggregate declaration '{name}': {reason}")]
    InvalidAggregateDeclaration { name: String, reason: String },

    /// No operator with a matching callable shape is registered
    #[error("no operator '{operator}' with a matching shape in namespace '{namespace}'")]
    UnsupportedOperatorShape { namespace: String, operator: String },

    /// Failure surfaced from evaluation or from an underlying driver
    #[error("execution error: {0}")]
    Execution(String),

    /// A materialization was cancelled through its cancel token
    #[error("materialization cancelled")]
    Cancelled,
}

/// Result type for query building and materialization
pub type Result<T> = std::result::Result<T, DynQueryError>;
