//! DSD helpers for producers feeding the pipeline

pub mod filler;

pub use filler::{DsdChunkWriter, DsdFiller, DsdPaddingWriter, DSD_CHUNK_BYTES, OUTPUT_BUFFER_BYTES};
