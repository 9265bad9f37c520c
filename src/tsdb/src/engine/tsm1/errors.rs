use std::io;

/// Error identities drive the compaction control flow: the rollover
/// signals (`MaxFileExceeded`, `MaxBlocksExceeded`, `NoValues`) are
/// consumed inside `write_new_files` and never reach callers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The current TSM file reached the size cap; finish it and open the
    /// next sequence.
    #[error("max file exceeded")]
    MaxFileExceeded,

    /// A key reached the per-file block cap of the index.
    #[error("max blocks exceeded")]
    MaxBlocksExceeded,

    /// The iterator produced nothing; the partial file is deleted.
    #[error("no values written")]
    NoValues,

    #[error("snapshots disabled")]
    SnapshotsDisabled,

    #[error("compactions disabled")]
    CompactionsDisabled,

    /// The compactor was disabled while a write was running.
    #[error("compaction aborted")]
    CompactionAborted,

    /// The target file already exists, so another compaction owns it.
    #[error("compaction in progress: {0}")]
    CompactionInProgress(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
