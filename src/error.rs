use thiserror::Error;

#[derive(Error, Debug)]
pub enum CopyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// The block arena has no free blocks left. Never happens for a
    /// correctly sized arena (`n_blocks == RQ_CAP + WQ_CAP`); surfaced as
    /// an error rather than a panic only because allocation is fallible
    /// at the type level.
    #[error("block arena exhausted")]
    Exhausted,
    /// A FIFO or the kernel ring had no room for another in-flight request.
    /// Never happens for correctly sized capacities.
    #[error("request ring full")]
    Full,
    /// A submitted request failed permanently (not `EAGAIN`, not a short
    /// read/write). The copy aborts; `source` carries the kernel's errno.
    #[error("I/O request failed: {0}")]
    Fatal(#[source] std::io::Error),
}
