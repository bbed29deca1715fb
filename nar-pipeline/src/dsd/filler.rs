//! Reshaping raw DSD into fixed-size output blocks
//!
//! Producers feeding DSD into the pipeline often need to pad or interleave
//! the bytes they receive before the renderer can use them. [`DsdFiller`]
//! takes arbitrary-length input, cuts it into whole input blocks, passes
//! every 4-byte chunk through a [`DsdChunkWriter`] and hands the writer back
//! its output in spans that are always a whole number of output blocks.

use crate::msg::DSD_SILENCE_BYTE;
use tracing::trace;

/// Bytes in one DSD interleave unit
pub const DSD_CHUNK_BYTES: usize = 4;

/// Upper bound on a single output span
pub const OUTPUT_BUFFER_BYTES: usize = 9216;

/// Client side of a [`DsdFiller`]
pub trait DsdChunkWriter {
    /// Transform one input chunk of [`DSD_CHUNK_BYTES`], appending to `dest`
    fn write_chunk(&mut self, src: &[u8], dest: &mut Vec<u8>);

    /// Receive transformed data; `data.len()` is a multiple of the output block size
    fn output(&mut self, data: &[u8]);
}

/// Accumulates DSD and emits it in whole output blocks
pub struct DsdFiller<W: DsdChunkWriter> {
    block_bytes_input: usize,
    block_bytes_output: usize,
    output_capacity: usize,
    output: Vec<u8>,
    pending: Vec<u8>,
    writer: W,
}

impl<W: DsdChunkWriter> DsdFiller<W> {
    /// # Panics
    ///
    /// Panics if `block_bytes_input` is not a non-zero multiple of
    /// [`DSD_CHUNK_BYTES`], or if `block_bytes_output` is zero or larger
    /// than [`OUTPUT_BUFFER_BYTES`].
    pub fn new(block_bytes_input: usize, block_bytes_output: usize, writer: W) -> Self {
        assert!(
            block_bytes_input > 0 && block_bytes_input % DSD_CHUNK_BYTES == 0,
            "DSD input block of {} bytes is not a multiple of {}",
            block_bytes_input,
            DSD_CHUNK_BYTES
        );
        assert!(
            block_bytes_output > 0 && block_bytes_output <= OUTPUT_BUFFER_BYTES,
            "DSD output block of {} bytes out of range",
            block_bytes_output
        );
        let output_capacity = OUTPUT_BUFFER_BYTES - OUTPUT_BUFFER_BYTES % block_bytes_output;
        Self {
            block_bytes_input,
            block_bytes_output,
            output_capacity,
            output: Vec::with_capacity(output_capacity),
            pending: Vec::with_capacity(block_bytes_input),
            writer,
        }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Bytes held back waiting to complete an input block
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    pub fn push(&mut self, data: &[u8]) {
        if self.pending.len() + data.len() < self.block_bytes_input {
            self.pending.extend_from_slice(data);
            return;
        }
        let mut data = data;
        if !self.pending.is_empty() {
            let needed = self.block_bytes_input - self.pending.len();
            self.pending.extend_from_slice(&data[..needed]);
            data = &data[needed..];
            let block = std::mem::take(&mut self.pending);
            self.write_blocks(&block);
            self.pending = block;
            self.pending.clear();
        }
        let whole = data.len() - data.len() % self.block_bytes_input;
        self.write_blocks(&data[..whole]);
        self.pending.extend_from_slice(&data[whole..]);
    }

    /// Emit any complete output still buffered
    pub fn flush(&mut self) {
        if !self.output.is_empty() {
            self.writer.output(&self.output);
            self.output.clear();
        }
    }

    /// Pad a partial input block with DSD silence, then flush
    pub fn drain(&mut self) {
        if !self.pending.is_empty() {
            trace!(
                "DsdFiller: padding {} of {} bytes",
                self.block_bytes_input - self.pending.len(),
                self.block_bytes_input
            );
            self.pending.resize(self.block_bytes_input, DSD_SILENCE_BYTE);
            let block = std::mem::take(&mut self.pending);
            self.write_blocks(&block);
            self.pending = block;
            self.pending.clear();
        }
        self.flush();
    }

    /// Discard pending input and buffered output
    pub fn reset(&mut self) {
        self.pending.clear();
        self.output.clear();
    }

    fn write_blocks(&mut self, data: &[u8]) {
        debug_assert!(data.len() % self.block_bytes_input == 0);
        for block in data.chunks_exact(self.block_bytes_input) {
            let before = self.output.len();
            for chunk in block.chunks_exact(DSD_CHUNK_BYTES) {
                self.writer.write_chunk(chunk, &mut self.output);
            }
            assert_eq!(
                self.output.len() - before,
                self.block_bytes_output,
                "DSD chunk writer produced a block of the wrong size"
            );
            if self.output.len() >= self.output_capacity {
                self.writer.output(&self.output);
                self.output.clear();
            }
        }
    }
}

/// Writer that pads each 2-byte half of a chunk with zero bytes
///
/// Used for renderers that expect DSD samples inside wider words. The
/// transformed data is collected until taken with [`Self::take_output`].
#[derive(Debug, Default)]
pub struct DsdPaddingWriter {
    padding_bytes: usize,
    spans: Vec<Vec<u8>>,
}

impl DsdPaddingWriter {
    /// `padding_bytes` zero bytes are added per chunk, split evenly before each half
    pub fn new(padding_bytes: usize) -> Self {
        assert!(padding_bytes % 2 == 0, "DSD padding must be even");
        Self {
            padding_bytes,
            spans: Vec::new(),
        }
    }

    /// Output block size produced from `block_bytes_input`
    pub fn output_block_bytes(&self, block_bytes_input: usize) -> usize {
        block_bytes_input / DSD_CHUNK_BYTES * (DSD_CHUNK_BYTES + self.padding_bytes)
    }

    pub fn take_output(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.spans)
    }
}

impl DsdChunkWriter for DsdPaddingWriter {
    fn write_chunk(&mut self, src: &[u8], dest: &mut Vec<u8>) {
        let half = self.padding_bytes / 2;
        dest.extend(std::iter::repeat(0).take(half));
        dest.extend_from_slice(&src[..2]);
        dest.extend(std::iter::repeat(0).take(half));
        dest.extend_from_slice(&src[2..4]);
    }

    fn output(&mut self, data: &[u8]) {
        self.spans.push(data.to_vec());
    }
}
