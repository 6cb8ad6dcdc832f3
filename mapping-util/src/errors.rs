/// Error taxonomy for the projection core.
///
/// All public operations return `anyhow::Result`, so these variants travel
/// inside `anyhow::Error`; callers that need to branch on the kind can
/// `err.downcast_ref::<MappingError>()`.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("no overlapping features between reference and target schemas")]
    SchemaMismatch,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("unknown or wrong-type attribute column: {0}")]
    UnknownAttribute(Box<str>),

    #[error("covariance is numerically singular; retry without CORAL")]
    NumericalInstability,
}

impl MappingError {
    pub fn invalid_parameter(msg: impl Into<String>) -> anyhow::Error {
        MappingError::InvalidParameter(msg.into()).into()
    }
}
