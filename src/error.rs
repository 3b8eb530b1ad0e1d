use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// No unused identifier of this kind could be produced.
    #[error("identifier space exhausted for {kind}")]
    IdentifierSpaceExhausted { kind: &'static str },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
