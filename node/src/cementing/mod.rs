//! Cementing: persisting confirmation heights for confirmed blocks.

pub mod batch_write_size;
pub mod bounded;
pub mod processor;

pub use batch_write_size::BatchWriteSize;
pub use bounded::{
    truncate_after, CementCallbacks, ConfirmationHeightBounded, WriteDetails, BATCH_READ_SIZE,
    MAX_ITEMS,
};
pub use processor::{AlreadyCementedObserver, BlockCementedObserver, ConfirmationHeightProcessor};
