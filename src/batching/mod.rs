pub mod accumulator;
pub mod sink;
pub mod types;

pub use accumulator::BatchAccumulator;
pub use sink::{BatchSink, ChannelSink, LogSink};
pub use types::{Batch, BatchEntry, BatchPayload};
