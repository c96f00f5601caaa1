//! Audio normalization to canonical PCM WAV
//!
//! Inbound audio arrives in whatever container the chat client produced.
//! Speech backends want one thing: mono 16-bit PCM at a known rate. Decoding
//! is done natively with Symphonia; when that fails and `ffmpeg` is
//! installed, it is used as a fallback (Telegram voice notes are Ogg/Opus,
//! which Symphonia does not decode).

use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tempfile::NamedTempFile;

use super::artifact::{AudioEncoding, Stage, TempArtifact, TempStore};
use crate::error::PipelineFailure;
use crate::{Error, Result};

/// Canonical sample rate for speech recognition
pub const SAMPLE_RATE: u32 = 16000;

/// Frames fed to the resampler per call
const RESAMPLE_CHUNK: usize = 1024;

/// Decoded mono audio
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate of `samples`
    pub sample_rate: u32,
}

/// Re-encodes arbitrary audio files into canonical WAV artifacts
#[derive(Debug, Clone)]
pub struct AudioNormalizer {
    store: TempStore,
    sample_rate: u32,
    ffmpeg: Option<PathBuf>,
}

impl AudioNormalizer {
    /// Create a normalizer writing into `store`
    ///
    /// Looks up `ffmpeg` on `PATH` for the fallback path.
    #[must_use]
    pub fn new(store: TempStore, sample_rate: u32) -> Self {
        let ffmpeg = which::which("ffmpeg").ok();
        if ffmpeg.is_none() {
            tracing::debug!("ffmpeg not found, only natively decodable formats are supported");
        }

        Self {
            store,
            sample_rate,
            ffmpeg,
        }
    }

    /// Override the ffmpeg binary (`None` disables the fallback)
    #[must_use]
    pub fn with_ffmpeg(mut self, ffmpeg: Option<PathBuf>) -> Self {
        self.ffmpeg = ffmpeg;
        self
    }

    /// Output sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Normalize `input` into a new WAV artifact
    ///
    /// The input file is left alone. On failure no output file exists.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineFailure::ConversionFailed`] if the input cannot be
    /// decoded or the output cannot be written
    pub async fn normalize(&self, input: &Path) -> std::result::Result<TempArtifact, PipelineFailure> {
        match self.try_normalize(input).await {
            Ok(artifact) => {
                tracing::info!(
                    input = %input.display(),
                    output = %artifact.path().display(),
                    "converted audio to WAV"
                );
                Ok(artifact)
            }
            Err(e) => {
                tracing::error!(input = %input.display(), error = %e, "failed to convert audio to WAV");
                Err(PipelineFailure::ConversionFailed)
            }
        }
    }

    async fn try_normalize(&self, input: &Path) -> Result<TempArtifact> {
        let size = tokio::fs::metadata(input).await?.len();
        if size == 0 {
            return Err(Error::Audio("input file is empty".to_string()));
        }

        let staging = self.store.staging_file(AudioEncoding::PcmWav)?;
        let source = input.to_path_buf();
        let rate = self.sample_rate;

        let (staging, native) = tokio::task::spawn_blocking(move || {
            let mut staging = staging;
            let result = decode_file(&source)
                .and_then(|audio| resample(audio, rate))
                .and_then(|audio| write_pcm_wav(staging.as_file_mut(), &audio.samples, rate));
            (staging, result)
        })
        .await
        .map_err(|e| Error::Audio(format!("decoder task failed: {e}")))?;

        match (native, &self.ffmpeg) {
            (Ok(()), _) => {}
            (Err(native_err), Some(ffmpeg)) => {
                tracing::debug!(error = %native_err, "native decode failed, trying ffmpeg");
                transcode_with_ffmpeg(ffmpeg, input, &staging, rate).await?;
            }
            (Err(native_err), None) => return Err(native_err),
        }

        self.store.promote(staging, AudioEncoding::PcmWav, Stage::Normalize)
    }
}

/// Decode any Symphonia-supported file to mono samples
///
/// # Errors
///
/// Returns error if the container or codec is not recognized, or no audio
/// samples could be decoded
pub fn decode_file(path: &Path) -> Result<DecodedAudio> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::Audio(format!("unrecognized container: {e}")))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::Audio("no supported audio track".to_string()))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Audio(format!("unsupported codec: {e}")))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(Error::Audio(format!("demux error: {e}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!(error = e, "skipping corrupt packet");
                continue;
            }
            Err(e) => return Err(Error::Audio(format!("decode error: {e}"))),
        };

        let spec = *decoded.spec();
        sample_rate.get_or_insert(spec.rate);

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        downmix_into(&mut samples, buffer.samples(), spec.channels.count());
    }

    let sample_rate =
        sample_rate.ok_or_else(|| Error::Audio("unknown sample rate".to_string()))?;
    if samples.is_empty() {
        return Err(Error::Audio("no audio samples decoded".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Average interleaved frames down to one channel
fn downmix_into(out: &mut Vec<f32>, interleaved: &[f32], channels: usize) {
    if channels <= 1 {
        out.extend_from_slice(interleaved);
        return;
    }

    #[allow(clippy::cast_precision_loss)]
    let scale = 1.0 / channels as f32;
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale),
    );
}

/// Convert `audio` to `target_rate`
///
/// # Errors
///
/// Returns error if the resampler cannot be built or fails
pub fn resample(audio: DecodedAudio, target_rate: u32) -> Result<DecodedAudio> {
    if audio.sample_rate == target_rate || audio.samples.is_empty() {
        return Ok(audio);
    }

    let ratio = f64::from(target_rate) / f64::from(audio.sample_rate);
    let mut resampler =
        FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, RESAMPLE_CHUNK, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let input = &audio.samples;
    let mut output = Vec::new();
    let mut pos = 0;

    while input.len() - pos >= resampler.input_frames_next() {
        let frames = resampler.input_frames_next();
        let chunk = resampler
            .process(&[&input[pos..pos + frames]], None)
            .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;
        output.extend_from_slice(&chunk[0]);
        pos += frames;
    }

    if pos < input.len() {
        let tail = resampler
            .process_partial(Some(&[&input[pos..]]), None)
            .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;
        output.extend_from_slice(&tail[0]);
    }

    // Push the samples still buffered in the filter delay line
    let flushed = resampler
        .process_partial(None::<&[&[f32]]>, None)
        .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;
    output.extend_from_slice(&flushed[0]);

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let expected = (input.len() as f64 * ratio).ceil() as usize;
    let delay = resampler.output_delay().min(output.len());
    output.drain(..delay);
    output.truncate(expected);

    Ok(DecodedAudio {
        samples: output,
        sample_rate: target_rate,
    })
}

/// Write mono samples as 16-bit PCM WAV
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn write_pcm_wav<W: Write + Seek>(writer: W, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::new(writer, spec).map_err(|e| Error::Audio(e.to_string()))?;
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        writer
            .write_sample(sample_i16)
            .map_err(|e| Error::Audio(e.to_string()))?;
    }
    writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;

    Ok(())
}

/// Encode mono samples as in-memory WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    write_pcm_wav(&mut cursor, samples, sample_rate)?;
    Ok(cursor.into_inner())
}

/// Transcode with ffmpeg straight into the staging file
///
/// The child is killed if the returned future is dropped.
async fn transcode_with_ffmpeg(
    ffmpeg: &Path,
    input: &Path,
    staging: &NamedTempFile,
    sample_rate: u32,
) -> Result<()> {
    let output = tokio::process::Command::new(ffmpeg)
        .args(["-nostdin", "-hide_banner", "-loglevel", "error", "-y", "-i"])
        .arg(input)
        .args(["-vn", "-ac", "1", "-ar"])
        .arg(sample_rate.to_string())
        .args(["-c:a", "pcm_s16le", "-f", "wav"])
        .arg(staging.path())
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Audio(format!(
            "ffmpeg exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let reader = hound::WavReader::open(staging.path())
        .map_err(|e| Error::Audio(format!("ffmpeg produced invalid WAV: {e}")))?;
    if reader.duration() == 0 {
        return Err(Error::Audio("ffmpeg produced no audio samples".to_string()));
    }

    Ok(())
}
