#[derive(Debug, thiserror::Error)]
pub enum NetstateError {
    #[error("byte key needs {needed} bytes but the scratch buffer has {available}")]
    KeyBufferTooSmall { needed: usize, available: usize },
    #[error("malformed byte key of {len} bytes")]
    MalformedKey { len: usize },
}
