//! Event stream reading: SSE framing, abort signals and the cancellable reader.

pub mod decoder;
pub mod encoder;
pub mod reader;
pub mod signal;

pub use decoder::SseDecoder;
pub use encoder::{encode_comment, FrameEncoder};
pub use reader::{decode_event_stream, EventStream};
pub use signal::{AbortReason, AbortSignal};
