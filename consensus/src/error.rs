use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("active elections container is stopped")]
    Stopped,

    #[error("active elections container is full ({0} elections)")]
    Full(usize),

    #[error("block {0} is already confirmed")]
    AlreadyConfirmed(String),

    #[error("an election for root {0} already exists")]
    ElectionExists(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
