//! Recording and replay: the ordered record writer and the file-backed
//! replay source.

pub mod replay;
pub mod writer;

pub use replay::{
    FileReplaySource, RecordedInteraction, RecordedResponse, parse_record_text,
    INBOUND_MARKER, OUTBOUND_MARKER,
};
pub use writer::OrderedRecordWriter;
