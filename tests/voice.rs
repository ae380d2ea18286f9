//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use std::io::Cursor;
use std::time::Duration;

use base64::Engine as _;
use tokio::sync::{mpsc, watch};

use voxlink::realtime::{ClientMessage, TurnEvent, decode_events};
use voxlink::voice::{
    AudioDevices, AudioSource, CaptureConfig, CapturePipeline, PlaybackScheduler, SAMPLE_RATE,
    Timeline, codec, duration_to_samples, samples_to_wav,
};

mod common;

/// Generate sine wave audio samples
fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

#[test]
fn test_silence_frame_round_trips() {
    let pcm = codec::encode(&[0.0; 480]);
    assert_eq!(pcm.len(), 960);
    assert_eq!(codec::decode(&pcm), vec![0.0; 480]);
}

#[test]
fn test_full_scale_rails() {
    assert_eq!(codec::encode(&[1.0, -1.0]), vec![0xFF, 0x7F, 0x00, 0x80]);
    assert_eq!(codec::decode(&[0xFF, 0x7F, 0x00, 0x80]), vec![1.0, -1.0]);
}

#[test]
fn test_round_trip_within_one_step() {
    let samples = generate_sine_samples(440.0, 0.1, 0.9);
    let decoded = codec::decode(&codec::encode(&samples));

    assert_eq!(decoded.len(), samples.len());
    for (a, b) in samples.iter().zip(&decoded) {
        assert!((a - b).abs() <= 1.0 / 32768.0, "{a} vs {b}");
    }
}

#[test]
fn test_pipeline_gain_survives_the_wire() {
    let mut pipeline = CapturePipeline::new(CaptureConfig {
        gain: 0.5,
        ..CaptureConfig::default()
    });
    let samples = generate_sine_samples(220.0, 0.04, 0.8);
    let frames = pipeline.push(&samples);

    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].sequence, 0);
    assert_eq!(frames[1].sequence, 1);

    // Frame → envelope → remote side's view of the audio
    let json = ClientMessage::append(&frames[1]).to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    let pcm = base64::engine::general_purpose::STANDARD
        .decode(value["audio"].as_str().unwrap())
        .unwrap();
    let decoded = codec::decode(&pcm);

    for (original, received) in samples[480..].iter().zip(&decoded) {
        assert!((original * 0.5 - received).abs() <= 1.0 / 32768.0);
    }
}

#[test]
fn test_inbound_delta_decodes_to_samples() {
    let tone = generate_sine_samples(440.0, 0.02, 0.5);
    let delta = base64::engine::general_purpose::STANDARD.encode(codec::encode(&tone));
    let text = format!(r#"{{"type":"response.audio.delta","delta":"{delta}"}}"#);

    let events = decode_events(&text).unwrap();
    let [TurnEvent::OutputAudioDelta(pcm)] = events.as_slice() else {
        panic!("expected one delta, got {events:?}");
    };
    assert_eq!(codec::decode(pcm).len(), tone.len());
}

#[test]
fn test_scheduled_segments_render_without_gaps() {
    let mut scheduler = PlaybackScheduler::default();
    let mut timeline = Timeline::new();

    // Three chunks of one ramp, arriving as separate deltas
    let ramp: Vec<f32> = (0..3_000).map(|i| (i as f32 + 1.0) / 4_000.0).collect();
    for chunk in ramp.chunks(1_000) {
        let segment = scheduler.schedule(chunk.len(), Duration::ZERO).unwrap();
        timeline.insert(duration_to_samples(segment.start, SAMPLE_RATE), chunk.to_vec());
    }

    // Render in device-sized blocks, stereo
    let lead = duration_to_samples(Duration::from_millis(50), SAMPLE_RATE) as usize;
    let mut rendered = Vec::new();
    let mut block = vec![0.0f32; 512];
    while rendered.len() < lead + ramp.len() + 100 {
        timeline.render(&mut block, 2);
        rendered.extend(block.chunks(2).map(|frame| frame[0]));
    }

    assert!(rendered[..lead].iter().all(|&s| s == 0.0));
    assert_eq!(&rendered[lead..lead + ramp.len()], ramp.as_slice());
    assert!(rendered[lead + ramp.len()..].iter().all(|&s| s == 0.0));
    assert_eq!(timeline.pending(), 0);
}

#[test]
fn test_samples_to_wav() {
    let original_samples = generate_sine_samples(440.0, 0.5, 0.5);
    let wav_bytes = samples_to_wav(&original_samples, SAMPLE_RATE).unwrap();

    // RIFF header
    assert_eq!(&wav_bytes[0..4], b"RIFF");
    assert_eq!(&wav_bytes[8..12], b"WAVE");

    let mut reader = hound::WavReader::new(Cursor::new(wav_bytes)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.bits_per_sample, 16);

    let read_samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(read_samples.len(), original_samples.len());
    assert_eq!(read_samples[100], codec::encode_sample(original_samples[100]));
}

#[tokio::test(start_paused = true)]
async fn test_capture_task_emits_frames_then_returns_source() {
    let devices = common::FakeDevices::new();
    devices.speak(&[0.25; 1_200]);
    let source = devices.open_input(SAMPLE_RATE).unwrap();

    let (frame_tx, mut frame_rx) = mpsc::channel(8);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let pipeline = CapturePipeline::new(CaptureConfig::default());
    let handle = tokio::spawn(pipeline.run(source, frame_tx, cancel_rx));

    let first = frame_rx.recv().await.unwrap();
    let second = frame_rx.recv().await.unwrap();
    assert_eq!((first.sequence, second.sequence), (0, 1));
    assert_eq!(first.sample_count(), 480);

    // 240 samples stay buffered until more audio arrives
    cancel_tx.send(true).unwrap();
    let (mut source, result) = handle.await.unwrap();
    assert!(result.is_ok());
    assert!(!source.is_released());

    source.release();
    assert_eq!(devices.log.inputs_released(), 1);
}
