use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("Identifier is empty")]
    Empty,

    #[error("Identifier too long: {0} bytes")]
    TooLong(usize),

    #[error("Identifier contains a reserved character: {0:?}")]
    InvalidCharacter(String),

    #[error("Identifier uses the reserved direct-chat prefix: {0:?}")]
    ReservedPrefix(String),

    #[error("Direct chat id is not in canonical order: {0:?}")]
    NonCanonical(String),
}
