//! DSD from the block filler through the assembled pipeline

mod helpers;

use helpers::*;
use nar_pipeline::dsd::{DsdFiller, DsdPaddingWriter, DSD_CHUNK_BYTES};
use nar_pipeline::msg::{
    DecodedStreamInfo, Msg, MsgFactory, MsgPlayable, PipelineElementDownstream, DSD_SILENCE_BYTE,
};
use nar_pipeline::{Pipeline, PipelineConfig, PipelineHooks, PipelineInput};
use std::sync::Arc;

const DSD64: u32 = 2_822_400;
const CHANNELS: u32 = 2;
/// 5ms of stereo DSD64
const RAW_CHUNK_BYTES: usize = 3528;
const IDLE_BYTE: u8 = 0x55;

fn push_spans(
    input: &mut PipelineInput,
    factory: &MsgFactory,
    filler: &mut DsdFiller<DsdPaddingWriter>,
) -> usize {
    let mut bytes = 0;
    for span in filler.writer_mut().take_output() {
        bytes += span.len();
        let audio = factory.create_audio_dsd(
            &span,
            CHANNELS,
            DSD64,
            (DSD_CHUNK_BYTES * 8) as u32,
            0,
        );
        input.push(Msg::AudioDsd(audio));
    }
    bytes
}

fn render(playable: &MsgPlayable) -> Vec<u8> {
    let mut out = Vec::new();
    playable.read(&mut out);
    out
}

#[test]
fn test_filled_dsd_renders_after_ramp() {
    let mut config = PipelineConfig::default();
    config.ramp.short_ms = 10;
    config.reservoir_msgs = 512;
    let animator = Arc::new(TestAnimator::new(10 * 56_448));
    let clock = Arc::new(FakeClock::new(0, 1_000_000));
    let pipeline = Pipeline::new(&config, animator, clock, PipelineHooks::default()).unwrap();
    let factory = Arc::clone(pipeline.factory());
    let (mut input, mut output, _controls) = pipeline.into_parts();

    input.push(short_ramp_mode(&factory));
    input.push(factory.create_decoded_stream(DecodedStreamInfo::dsd(1, DSD64, CHANNELS)));

    let mut filler = DsdFiller::new(DSD_CHUNK_BYTES, DSD_CHUNK_BYTES, DsdPaddingWriter::new(0));
    let mut pushed = 0;
    for _ in 0..20 {
        filler.push(&[IDLE_BYTE; RAW_CHUNK_BYTES]);
        filler.flush();
        pushed += push_spans(&mut input, &factory, &mut filler);
    }
    // Half an interleave unit left over; drain pads it
    filler.push(&[IDLE_BYTE; 2]);
    filler.drain();
    pushed += push_spans(&mut input, &factory, &mut filler);
    assert_eq!(pushed, 20 * RAW_CHUNK_BYTES + DSD_CHUNK_BYTES);
    input.push(factory.create_quit());

    let msgs = pull_until_quit(&mut output);
    let audio: Vec<&MsgPlayable> = msgs
        .iter()
        .filter_map(|msg| match msg {
            Msg::Playable(playable) => Some(playable),
            _ => None,
        })
        .collect();
    assert!(audio.iter().all(|p| p.bytes() % DSD_CHUNK_BYTES == 0));

    // DSD always ramps; a ramped fragment cannot be scaled so plays as silence
    let first = render(audio[0]);
    assert!(!audio[0].ramp().is_unity());
    assert!(first.iter().all(|&b| b == DSD_SILENCE_BYTE));

    let last = render(audio.last().unwrap());
    let tail = &last[last.len() - DSD_CHUNK_BYTES..];
    assert_eq!(tail, &[IDLE_BYTE, IDLE_BYTE, DSD_SILENCE_BYTE, DSD_SILENCE_BYTE]);

    let unramped: usize = audio
        .iter()
        .filter(|p| p.ramp().is_unity())
        .map(|p| p.bytes())
        .sum();
    assert!(unramped > 0);
    assert!(unramped < pushed);
}

#[test]
fn test_dsd_above_renderer_limit_is_flushed() {
    let config = PipelineConfig::default();
    let animator = Arc::new(TestAnimator::new(10 * 56_448));
    let clock = Arc::new(FakeClock::new(0, 1_000_000));
    let pipeline = Pipeline::new(&config, animator, clock, PipelineHooks::default()).unwrap();
    let factory = Arc::clone(pipeline.factory());
    let (mut input, _output, _controls) = pipeline.into_parts();

    // DSD256 exceeds the test renderer's DSD128 limit
    input.push(factory.create_decoded_stream(DecodedStreamInfo::dsd(1, 4 * DSD64, CHANNELS)));
    assert!(input.is_flushing());
}
