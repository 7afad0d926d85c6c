//! Wire protocol shared by master, workers and clients
//!
//! Framing lives in [`frame`], primitive field encoding in [`payload`] and the
//! command set with its typed payloads in [`messages`].

pub mod frame;
pub mod messages;
pub mod payload;

pub use frame::{read_frame, write_frame, Frame, FrameError, MAX_PAYLOAD_LEN};
pub use messages::{
    Command, IterationVector, LinearResult, PartialResult, PoolState, Progress, ResultReady,
    StartRequest, TaskAssignment,
};
pub use payload::{PayloadError, PayloadReader, PayloadWriter};
