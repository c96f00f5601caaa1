//! Recorded audio and ambient-noise calibration
//!
//! A [`Recording`] is the full canonical WAV of one message. Before it is
//! sent anywhere, the first half second is used to estimate the ambient
//! energy level, the same way desktop speech recognizers adapt their energy
//! threshold to the room.

use std::io::Cursor;
use std::path::Path;

use crate::{Error, Result};

/// Starting energy threshold (RMS of 16-bit samples)
pub const DEFAULT_ENERGY_THRESHOLD: f32 = 300.0;

/// Seconds of audio used for ambient-noise calibration
pub const CALIBRATION_SECS: f32 = 0.5;

/// Threshold damping per second of audio
const DYNAMIC_ENERGY_DAMPING: f32 = 0.15;

/// Multiplier applied to ambient energy to get the target threshold
const DYNAMIC_ENERGY_RATIO: f32 = 1.5;

/// Frames per analysis buffer
const CHUNK_FRAMES: usize = 1024;

/// Result of an ambient-noise calibration pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Adjusted energy threshold
    pub energy_threshold: f32,
}

impl Calibration {
    /// Energy a buffer must exceed to count as voice activity
    ///
    /// Never above the default threshold, so speech that starts inside the
    /// calibration window does not hide itself.
    #[must_use]
    pub fn activity_gate(&self) -> f32 {
        self.energy_threshold.min(DEFAULT_ENERGY_THRESHOLD)
    }
}

/// A complete mono 16-bit recording
#[derive(Debug, Clone)]
pub struct Recording {
    wav: Vec<u8>,
    samples: Vec<i16>,
    sample_rate: u32,
}

impl Recording {
    /// Parse WAV bytes
    ///
    /// Multi-channel audio is averaged down to mono.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not 16-bit integer PCM WAV
    pub fn from_wav(wav: Vec<u8>) -> Result<Self> {
        let mut reader = hound::WavReader::new(Cursor::new(&wav))
            .map_err(|e| Error::Audio(format!("invalid WAV: {e}")))?;
        let spec = reader.spec();

        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(Error::Audio(format!(
                "expected 16-bit PCM, got {:?} {}-bit",
                spec.sample_format, spec.bits_per_sample
            )));
        }

        let interleaved = reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Audio(format!("invalid WAV data: {e}")))?;

        let channels = usize::from(spec.channels.max(1));
        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks_exact(channels)
                .map(|frame| {
                    let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
                    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                    let avg = (sum / channels as i32) as i16;
                    avg
                })
                .collect()
        };

        Ok(Self {
            wav,
            samples,
            sample_rate: spec.sample_rate,
        })
    }

    /// Read a WAV file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not 16-bit PCM WAV
    pub async fn open(path: &Path) -> Result<Self> {
        let wav = tokio::fs::read(path).await?;
        Self::from_wav(wav)
    }

    /// Original WAV bytes
    #[must_use]
    pub fn wav(&self) -> &[u8] {
        &self.wav
    }

    /// Mono samples
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Length in seconds
    #[must_use]
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let secs = self.samples.len() as f32 / self.sample_rate as f32;
        secs
    }

    /// Raw little-endian PCM (no header)
    #[must_use]
    pub fn pcm_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Adjust the energy threshold to the first `duration` seconds
    #[must_use]
    pub fn calibrate(&self, duration: f32) -> Calibration {
        let mut threshold = DEFAULT_ENERGY_THRESHOLD;
        if self.sample_rate == 0 {
            return Calibration {
                energy_threshold: threshold,
            };
        }

        #[allow(clippy::cast_precision_loss)]
        let seconds_per_buffer = CHUNK_FRAMES as f32 / self.sample_rate as f32;
        let damping = DYNAMIC_ENERGY_DAMPING.powf(seconds_per_buffer);

        let mut elapsed = 0.0;
        for chunk in self.samples.chunks(CHUNK_FRAMES) {
            elapsed += seconds_per_buffer;
            if elapsed > duration {
                break;
            }
            let target = rms(chunk) * DYNAMIC_ENERGY_RATIO;
            threshold = threshold.mul_add(damping, target * (1.0 - damping));
        }

        tracing::debug!(energy_threshold = threshold, "ambient noise calibration done");
        Calibration {
            energy_threshold: threshold,
        }
    }

    /// Whether any buffer rises above the calibrated activity gate
    #[must_use]
    pub fn has_voice_activity(&self, calibration: &Calibration) -> bool {
        let gate = calibration.activity_gate();
        self.samples.chunks(CHUNK_FRAMES).any(|chunk| rms(chunk) > gate)
    }
}

/// Root mean square of 16-bit samples
fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    let value = (sum / samples.len() as f64).sqrt() as f32;
    value
}
