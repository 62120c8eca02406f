// ============================================================
// Layer 3 — Reader Errors
// ============================================================
// Every fatal condition the packing core can hit.
//
// Two families live here:
//   - configuration / data consistency errors (abort the run)
//   - caller-contract errors (the training loop misused the reader)
//
// Running out of utterances is NOT an error. It is reported
// as a plain `false` from the refill and minibatch calls, and
// an empty utterance is skipped without ever surfacing.

use thiserror::Error;

/// Result alias used throughout the domain and data layers
pub type ReaderResult<T> = std::result::Result<T, ReaderError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReaderError {
    #[error("stream '{stream}' has inconsistent number of frames: expected {expected}, found {found}")]
    InconsistentFrameCount {
        stream:   String,
        expected: usize,
        found:    usize,
    },

    #[error("label index {label} in stream '{stream}' is out of range (dimension {dim})")]
    LabelOutOfRange {
        stream: String,
        label:  usize,
        dim:    usize,
    },

    #[error("stream '{stream}' delivered {found}-dimensional frames but is registered with dim {expected}")]
    StreamDimMismatch {
        stream:   String,
        expected: usize,
        found:    usize,
    },

    #[error("frame mode reads exactly one channel, {0} were requested")]
    TooManyChannelsInFrameMode(usize),

    #[error("the number of parallel channels cannot be less than 1")]
    ZeroChannels,

    #[error("truncation length / minibatch size must be greater than zero")]
    ZeroMinibatchSize,

    #[error("minibatch requested for stream '{0}' which is not registered with the reader")]
    UnknownStream(String),

    #[error("feature stream '{0}' is registered with the reader but was not requested")]
    MissingFeatureStream(String),

    #[error("get_minibatch called before start_loop")]
    LoopNotStarted,

    #[error("partition {subset} is out of range for {num_subsets} partitions")]
    InvalidPartition {
        subset:      usize,
        num_subsets: usize,
    },

    #[error("{channels} parallel channels cannot be distributed over {num_subsets} partitions")]
    InsufficientChannels {
        channels:    usize,
        num_subsets: usize,
    },

    #[error("distributed reading is only supported for training or testing")]
    DistributedWrite,

    #[error("invalid reader configuration: {0}")]
    Config(String),

    #[error("invalid label-to-target mapping: {0}")]
    LabelMapping(String),
}
