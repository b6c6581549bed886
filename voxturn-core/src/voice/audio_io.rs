//! Audio capture plumbing and format conversion.
//!
//! Conversion helpers and the frame queue are always available. Microphone
//! capture through cpal requires the `voice` feature.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::warn;

use super::types::AudioFrame;
use crate::error::VoiceError;

/// Sample format conversion and WAV encoding.
pub mod audio_convert {
    use super::*;

    /// Convert f32 samples (-1.0..1.0) to i16 samples.
    pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
        samples
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect()
    }

    pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
        samples.iter().map(|&s| s as f32 / i16::MAX as f32).collect()
    }

    /// Linear-interpolation resampling.
    pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
        if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
            return samples.to_vec();
        }
        let ratio = from_rate as f64 / to_rate as f64;
        let out_len = ((samples.len() as f64) / ratio).ceil() as usize;
        let mut out = Vec::with_capacity(out_len);
        for i in 0..out_len {
            let src_pos = i as f64 * ratio;
            let idx = src_pos as usize;
            let frac = (src_pos - idx as f64) as f32;
            if idx + 1 < samples.len() {
                out.push(samples[idx] * (1.0 - frac) + samples[idx + 1] * frac);
            } else if idx < samples.len() {
                out.push(samples[idx]);
            }
        }
        out
    }

    /// Average interleaved channels down to mono.
    pub fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
        if channels <= 1 {
            return samples.to_vec();
        }
        samples
            .chunks(channels)
            .map(|group| group.iter().sum::<f32>() / group.len() as f32)
            .collect()
    }

    /// Encode mono samples as 16-bit PCM WAV.
    pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, VoiceError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer =
                hound::WavWriter::new(&mut cursor, spec).map_err(|e| wav_error("write", e))?;
            for sample in f32_to_i16(samples) {
                writer
                    .write_sample(sample)
                    .map_err(|e| wav_error("sample write", e))?;
            }
            writer.finalize().map_err(|e| wav_error("finalize", e))?;
        }
        Ok(cursor.into_inner())
    }

    /// Decode WAV bytes into mono samples and their sample rate.
    pub fn decode_wav(data: &[u8]) -> Result<(Vec<f32>, u32), VoiceError> {
        let mut reader = hound::WavReader::new(std::io::Cursor::new(data))
            .map_err(|e| wav_error("read", e))?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int => {
                let max_val = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max_val))
                    .collect::<Result<Vec<f32>, _>>()
                    .map_err(|e| wav_error("sample read", e))?
            }
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<Vec<f32>, _>>()
                .map_err(|e| wav_error("float sample read", e))?,
        };

        Ok((downmix(&samples, spec.channels as usize), spec.sample_rate))
    }

    fn wav_error(stage: &str, e: hound::Error) -> VoiceError {
        VoiceError::UnsupportedFormat {
            format: format!("WAV {stage} error: {e}"),
        }
    }
}

/// Re-chunks arbitrary sample buffers into fixed-size frames.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    frame_samples: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(frame_samples: usize, sample_rate: u32) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            sample_rate,
            pending: Vec::with_capacity(frame_samples),
        }
    }

    /// Append samples and return every complete frame now available.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);
        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_samples {
            let rest = self.pending.split_off(self.frame_samples);
            let full = std::mem::replace(&mut self.pending, rest);
            frames.push(AudioFrame::new(full, self.sample_rate));
        }
        frames
    }

    /// Emit the partial frame, if any.
    pub fn flush(&mut self) -> Option<AudioFrame> {
        if self.pending.is_empty() {
            return None;
        }
        Some(AudioFrame::new(
            std::mem::take(&mut self.pending),
            self.sample_rate,
        ))
    }

    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }
}

/// Producer half of the bounded frame queue.
///
/// Capture runs on a realtime thread and must never block, so a full queue
/// drops the frame and counts it.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<AudioFrame>,
    dropped: Arc<AtomicU64>,
}

impl FrameSender {
    /// Offer a frame. Returns `false` if it was dropped.
    pub fn offer(&self, frame: AudioFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped, "Frame queue full, dropping audio frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Wait for queue space. For offline sources that may apply backpressure.
    pub async fn send(&self, frame: AudioFrame) -> Result<(), VoiceError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| VoiceError::PipelineError {
                message: "frame queue closed".into(),
            })
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Create the bounded queue between capture and the voice loop.
pub fn frame_channel(capacity: usize) -> (FrameSender, mpsc::Receiver<AudioFrame>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        FrameSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

/// Split a WAV file into frames at `sample_rate`, padding the final frame
/// with silence.
pub fn frames_from_wav(
    data: &[u8],
    frame_samples: usize,
    sample_rate: u32,
) -> Result<Vec<AudioFrame>, VoiceError> {
    let (samples, source_rate) = audio_convert::decode_wav(data)?;
    let samples = audio_convert::resample(&samples, source_rate, sample_rate);
    let mut assembler = FrameAssembler::new(frame_samples, sample_rate);
    let mut frames = assembler.push(&samples);
    if let Some(mut last) = assembler.flush() {
        last.samples.resize(frame_samples.max(1), 0.0);
        frames.push(last);
    }
    Ok(frames)
}

/// Converts raw device callbacks into frames on the queue.
#[derive(Debug)]
pub struct CaptureSink {
    channels: usize,
    device_rate: u32,
    target_rate: u32,
    assembler: FrameAssembler,
    sender: FrameSender,
}

impl CaptureSink {
    pub fn new(
        channels: usize,
        device_rate: u32,
        target_rate: u32,
        frame_samples: usize,
        sender: FrameSender,
    ) -> Self {
        Self {
            channels,
            device_rate,
            target_rate,
            assembler: FrameAssembler::new(frame_samples, target_rate),
            sender,
        }
    }

    /// Accept one interleaved callback buffer.
    pub fn accept(&mut self, interleaved: &[f32]) {
        let mono = audio_convert::downmix(interleaved, self.channels);
        let mono = audio_convert::resample(&mono, self.device_rate, self.target_rate);
        for frame in self.assembler.push(&mono) {
            self.sender.offer(frame);
        }
    }
}

#[cfg(feature = "voice")]
pub use capture::MicrophoneCapture;

#[cfg(feature = "voice")]
mod capture {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{FromSample, Sample, SizedSample};
    use tracing::{error, info};

    use super::{CaptureSink, FrameSender};
    use crate::config::AudioConfig;
    use crate::error::VoiceError;

    /// A running microphone stream. Capture stops when this is dropped.
    pub struct MicrophoneCapture {
        _stream: cpal::Stream,
        device_name: String,
    }

    impl MicrophoneCapture {
        pub fn start(config: &AudioConfig, sender: FrameSender) -> Result<Self, VoiceError> {
            let host = cpal::default_host();
            let device = match &config.input_device {
                Some(wanted) => host
                    .input_devices()
                    .map_err(device_error)?
                    .find(|d| d.name().map(|n| &n == wanted).unwrap_or(false))
                    .ok_or_else(|| VoiceError::AudioDevice {
                        message: format!("input device '{wanted}' not found"),
                    })?,
                None => host
                    .default_input_device()
                    .ok_or_else(|| VoiceError::AudioDevice {
                        message: "no default input device".into(),
                    })?,
            };
            let device_name = device.name().unwrap_or_else(|_| "unknown".into());
            let supported = device.default_input_config().map_err(device_error)?;
            let sink = CaptureSink::new(
                supported.channels() as usize,
                supported.sample_rate().0,
                config.sample_rate,
                config.frame_samples(),
                sender,
            );

            let stream_config: cpal::StreamConfig = supported.config();
            let stream = match supported.sample_format() {
                cpal::SampleFormat::F32 => build::<f32>(&device, &stream_config, sink)?,
                cpal::SampleFormat::I16 => build::<i16>(&device, &stream_config, sink)?,
                cpal::SampleFormat::U16 => build::<u16>(&device, &stream_config, sink)?,
                other => {
                    return Err(VoiceError::UnsupportedFormat {
                        format: format!("{other:?}"),
                    });
                }
            };
            stream.play().map_err(device_error)?;

            info!(
                device = %device_name,
                device_rate = stream_config.sample_rate.0,
                channels = stream_config.channels,
                "Microphone capture started"
            );
            Ok(Self {
                _stream: stream,
                device_name,
            })
        }

        pub fn device_name(&self) -> &str {
            &self.device_name
        }
    }

    fn build<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut sink: CaptureSink,
    ) -> Result<cpal::Stream, VoiceError>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    let samples: Vec<f32> = data.iter().map(|s| s.to_sample::<f32>()).collect();
                    sink.accept(&samples);
                },
                |err| error!(error = %err, "Audio input stream error"),
                None,
            )
            .map_err(device_error)
    }

    fn device_error(e: impl std::fmt::Display) -> VoiceError {
        VoiceError::AudioDevice {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::audio_convert::*;
    use super::*;

    #[test]
    fn test_f32_to_i16_conversion() {
        let i16s = f32_to_i16(&[0.0, 1.0, -1.0, 2.0]);
        assert_eq!(i16s[0], 0);
        assert_eq!(i16s[1], i16::MAX);
        assert_eq!(i16s[2], -i16::MAX);
        assert_eq!(i16s[3], i16::MAX);
    }

    #[test]
    fn test_downmix() {
        let stereo = vec![0.4, 0.6, 0.2, 0.8, -0.5, 0.5];
        let mono = downmix(&stereo, 2);
        assert_eq!(mono.len(), 3);
        assert!((mono[0] - 0.5).abs() < 0.001);
        assert!(mono[2].abs() < 0.001);
        assert_eq!(downmix(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn test_resample_downsample() {
        let samples: Vec<f32> = (0..480).map(|i| i as f32 / 480.0).collect();
        let resampled = resample(&samples, 48_000, 16_000);
        assert_eq!(resampled.len(), 160);
        assert!((resampled[1] - samples[3]).abs() < 1e-6);
    }

    #[test]
    fn test_wav_roundtrip() {
        let original = vec![0.0, 0.25, 0.5, -0.5, 1.0];
        let bytes = encode_wav(&original, 16_000).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");

        let (decoded, rate) = decode_wav(&bytes).unwrap();
        assert_eq!(rate, 16_000);
        assert_eq!(decoded.len(), original.len());
        for (a, b) in original.iter().zip(decoded.iter()) {
            assert!((a - b).abs() < 0.001, "expected {a}, got {b}");
        }
    }

    #[test]
    fn test_decode_garbage_is_error() {
        assert!(matches!(
            decode_wav(b"not a wav"),
            Err(VoiceError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_frame_assembler() {
        let mut assembler = FrameAssembler::new(4, 16_000);
        assert!(assembler.push(&[0.1, 0.2, 0.3]).is_empty());
        let frames = assembler.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].samples, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(frames[1].samples, vec![0.5, 0.6, 0.7, 0.8]);
        assert_eq!(assembler.pending_samples(), 1);
        assert_eq!(assembler.flush().unwrap().samples, vec![0.9]);
        assert!(assembler.flush().is_none());
    }

    #[tokio::test]
    async fn test_full_queue_drops_frames() {
        let (sender, mut rx) = frame_channel(2);
        assert!(sender.offer(AudioFrame::silence(16_000, 1)));
        assert!(sender.offer(AudioFrame::silence(16_000, 1)));
        assert!(!sender.offer(AudioFrame::silence(16_000, 1)));
        assert_eq!(sender.dropped(), 1);

        assert!(rx.recv().await.is_some());
        assert!(sender.offer(AudioFrame::silence(16_000, 1)));
    }

    #[tokio::test]
    async fn test_capture_sink_downmixes_into_frames() {
        let (sender, mut rx) = frame_channel(8);
        let mut sink = CaptureSink::new(2, 16_000, 16_000, 2, sender);
        sink.accept(&[0.2, 0.4, 0.6, 0.8, 1.0, 1.0]);
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.samples.len(), 2);
        assert!((frame.samples[0] - 0.3).abs() < 1e-6);
        assert!((frame.samples[1] - 0.7).abs() < 1e-6);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_frames_from_wav_pads_last_frame() {
        let bytes = encode_wav(&[0.5; 10], 16_000).unwrap();
        let frames = frames_from_wav(&bytes, 4, 16_000).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].samples.len(), 4);
        assert_eq!(frames[2].samples[3], 0.0);
    }
}
