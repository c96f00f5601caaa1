//! Shared test utilities: fake backends, a mock channel and WAV fixtures

#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use voice_relay::channels::{Attachment, Channel, OutgoingMessage};
use voice_relay::llm::{ConversationTurn, TextResponder};
use voice_relay::voice::{
    AudioNormalizer, Recording, SpeechRecognizer, SpeechSynthesizer, SpeechToText, TempStore,
    TextToSpeech, VoicePipeline,
};
use voice_relay::{Error, Result};

/// Sample rate of generated fixtures
pub const FIXTURE_RATE: u32 = 16_000;

/// Bytes the fake synthesizer returns
pub const FAKE_MP3: &[u8] = b"ID3\x04\x00fake-mp3-payload";

/// Sine tone, loud enough to pass the voice activity gate
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn tone(rate: u32, secs: f32) -> Vec<f32> {
    let count = (rate as f32 * secs) as usize;
    (0..count)
        .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin())
        .collect()
}

/// Digital silence
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn silence(rate: u32, secs: f32) -> Vec<f32> {
    vec![0.0; (rate as f32 * secs) as usize]
}

/// Encode mono samples as 16-bit WAV, duplicated across `channels`
#[allow(clippy::cast_possible_truncation)]
pub fn wav_bytes(samples: &[f32], rate: u32, channels: u16) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
        for sample in samples {
            let value = (sample * f32::from(i16::MAX)) as i16;
            for _ in 0..channels {
                writer.write_sample(value).expect("write sample");
            }
        }
        writer.finalize().expect("finalize wav");
    }
    cursor.into_inner()
}

/// Write `bytes` to `dir/name` and return the path
pub fn write_fixture(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("write fixture");
    path
}

/// Every file currently in `dir`
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok().map(|e| e.path())).collect())
        .unwrap_or_default()
}

/// How the fake recognizer answers
#[derive(Clone)]
pub enum Recognition {
    Transcript(String),
    NoSpeech,
    Unavailable,
    /// Never answers
    Stall,
}

/// Recognizer returning a canned answer
pub struct FakeRecognizer {
    answer: Recognition,
    pub calls: AtomicUsize,
}

impl FakeRecognizer {
    pub fn new(answer: Recognition) -> Arc<Self> {
        Arc::new(Self {
            answer,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn hearing(text: &str) -> Arc<Self> {
        Self::new(Recognition::Transcript(text.to_string()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechRecognizer for FakeRecognizer {
    async fn recognize(&self, recording: &Recording) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(recording.sample_rate(), FIXTURE_RATE, "recognizer got non-canonical audio");

        match &self.answer {
            Recognition::Transcript(text) => Ok(Some(text.clone())),
            Recognition::NoSpeech => Ok(None),
            Recognition::Unavailable => Err(Error::Stt("HTTP 503".to_string())),
            Recognition::Stall => std::future::pending().await,
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Synthesizer returning fixed bytes
pub struct FakeSynthesizer {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl FakeSynthesizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, _text: &str, _language: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Tts("HTTP 500".to_string()));
        }
        Ok(FAKE_MP3.to_vec())
    }

    fn supports_language(&self, language: &str) -> bool {
        language != "xx"
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Responder with a canned reply that records what it was asked
pub struct FakeResponder {
    reply: Option<String>,
    fail: bool,
    pub prompts: std::sync::Mutex<Vec<String>>,
    pub conversations: std::sync::Mutex<Vec<Vec<ConversationTurn>>>,
}

impl FakeResponder {
    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(reply.to_string()),
            fail: false,
            prompts: std::sync::Mutex::default(),
            conversations: std::sync::Mutex::default(),
        })
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            fail: false,
            prompts: std::sync::Mutex::default(),
            conversations: std::sync::Mutex::default(),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            fail: true,
            prompts: std::sync::Mutex::default(),
            conversations: std::sync::Mutex::default(),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn conversations(&self) -> Vec<Vec<ConversationTurn>> {
        self.conversations.lock().unwrap().clone()
    }

    fn answer(&self) -> Result<Option<String>> {
        if self.fail {
            return Err(Error::Llm("HTTP 429".to_string()));
        }
        Ok(self.reply.clone())
    }
}

#[async_trait]
impl TextResponder for FakeResponder {
    async fn respond(&self, prompt: &str) -> Result<Option<String>> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.answer()
    }

    async fn respond_to_conversation(&self, turns: &[ConversationTurn]) -> Result<Option<String>> {
        self.conversations.lock().unwrap().push(turns.to_vec());
        self.answer()
    }
}

/// Build a pipeline writing into `dir` with ffmpeg disabled
pub fn pipeline(
    dir: &Path,
    recognizer: Arc<FakeRecognizer>,
    responder: Arc<FakeResponder>,
    synthesizer: Arc<FakeSynthesizer>,
) -> VoicePipeline {
    let store = TempStore::new(dir);
    let normalizer = AudioNormalizer::new(store.clone(), FIXTURE_RATE).with_ffmpeg(None);
    let stt = SpeechToText::new(recognizer);
    let tts = TextToSpeech::new(synthesizer, store.clone());
    VoicePipeline::new(store, normalizer, stt, responder, tts)
}

/// A voice message upload observed by the mock channel
#[derive(Debug, Clone)]
pub struct SentVoice {
    pub channel_id: String,
    pub path: PathBuf,
    pub existed: bool,
    pub bytes: Vec<u8>,
    pub duration_secs: Option<u32>,
    pub reply_to: Option<String>,
}

/// Mock channel recording everything sent through it
#[derive(Clone, Default)]
pub struct MockChannel {
    pub sent: Arc<Mutex<Vec<OutgoingMessage>>>,
    pub voices: Arc<Mutex<Vec<SentVoice>>>,
    pub download: Option<Vec<u8>>,
    pub typing: Arc<AtomicUsize>,
    pub recording: Arc<AtomicUsize>,
}

impl MockChannel {
    /// Channel whose downloads return `bytes`
    pub fn serving(bytes: Vec<u8>) -> Self {
        Self {
            download: Some(bytes),
            ..Self::default()
        }
    }

    pub async fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().await.iter().map(|m| m.content.clone()).collect()
    }

    pub async fn sent_voices(&self) -> Vec<SentVoice> {
        self.voices.lock().await.clone()
    }
}

#[async_trait]
impl Channel for MockChannel {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn send(&self, message: OutgoingMessage) -> Result<()> {
        self.sent.lock().await.push(message);
        Ok(())
    }

    async fn send_voice(
        &self,
        channel_id: &str,
        audio: &Path,
        duration_secs: Option<u32>,
        reply_to: Option<&str>,
    ) -> Result<()> {
        let bytes = std::fs::read(audio).unwrap_or_default();
        self.voices.lock().await.push(SentVoice {
            channel_id: channel_id.to_string(),
            path: audio.to_path_buf(),
            existed: audio.exists(),
            bytes,
            duration_secs,
            reply_to: reply_to.map(ToString::to_string),
        });
        Ok(())
    }

    async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>> {
        self.download
            .clone()
            .ok_or_else(|| Error::Channel(format!("file {} not found", attachment.file_id)))
    }

    async fn send_typing(&self, _channel_id: &str) -> Result<()> {
        self.typing.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_recording(&self, _channel_id: &str) -> Result<()> {
        self.recording.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
