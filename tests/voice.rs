//! Voice pipeline integration tests
//!
//! Runs every stage against fake backends; no network or audio hardware

use std::path::{Path, PathBuf};
use std::time::Duration;

use voice_relay::llm::{ConversationTurn, Role};
use voice_relay::voice::{
    AudioEncoding, AudioNormalizer, PipelineState, SpeechToText, TempStore, TextToSpeech,
    remove_artifact,
};
use voice_relay::PipelineFailure;

mod common;
use common::{
    FAKE_MP3, FIXTURE_RATE, FakeRecognizer, FakeResponder, FakeSynthesizer, Recognition, files_in,
    pipeline, silence, tone, wav_bytes, write_fixture,
};

fn normalizer(store: &TempStore) -> AudioNormalizer {
    AudioNormalizer::new(store.clone(), FIXTURE_RATE).with_ffmpeg(None)
}

/// Executable shell script standing in for ffmpeg
///
/// The output path is always the last argument.
#[cfg(unix)]
fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("ffmpeg");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[tokio::test]
async fn test_supported_wav_variants_transcribe() {
    let inputs = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let store = TempStore::new(work.path());
    let recognizer = FakeRecognizer::hearing("hello");
    let stt = SpeechToText::new(recognizer.clone());

    let variants = [
        ("mono-8k.wav", wav_bytes(&tone(8_000, 1.0), 8_000, 1)),
        ("mono-16k.wav", wav_bytes(&tone(16_000, 1.0), 16_000, 1)),
        ("stereo-44k.wav", wav_bytes(&tone(44_100, 1.0), 44_100, 2)),
        ("mono-48k.wav", wav_bytes(&tone(48_000, 1.0), 48_000, 1)),
    ];

    for (name, bytes) in variants {
        let input = write_fixture(inputs.path(), name, &bytes);
        let wav = normalizer(&store).normalize(&input).await.unwrap();
        assert_eq!(wav.encoding(), AudioEncoding::PcmWav);

        assert_eq!(stt.transcribe(wav).await.unwrap(), "hello", "{name}");
        assert!(input.exists(), "normalizer must not touch its input");
    }

    assert_eq!(recognizer.calls(), 4);
    assert!(files_in(work.path()).is_empty());
}

#[tokio::test]
async fn test_corrupt_and_empty_inputs_fail_conversion() {
    let inputs = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let store = TempStore::new(work.path());

    let empty = write_fixture(inputs.path(), "empty.ogg", b"");
    let garbage = write_fixture(inputs.path(), "garbage.wav", b"RIFF\x00\x00not really a wave file");
    let missing = inputs.path().join("missing.mp3");

    for input in [empty, garbage, missing] {
        let err = normalizer(&store).normalize(&input).await.unwrap_err();
        assert_eq!(err, PipelineFailure::ConversionFailed);
    }

    assert!(files_in(work.path()).is_empty());
}

#[tokio::test]
async fn test_silence_is_no_speech() {
    let inputs = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let store = TempStore::new(work.path());
    let input = write_fixture(
        inputs.path(),
        "quiet.wav",
        &wav_bytes(&silence(FIXTURE_RATE, 2.0), FIXTURE_RATE, 1),
    );

    // Gated: the backend is never asked
    let recognizer = FakeRecognizer::new(Recognition::Unavailable);
    let stt = SpeechToText::new(recognizer.clone()).with_silence_gate(true);
    let wav = normalizer(&store).normalize(&input).await.unwrap();
    assert_eq!(stt.transcribe(wav).await.unwrap_err(), PipelineFailure::NoSpeechDetected);
    assert_eq!(recognizer.calls(), 0);

    // Default: the backend hears nothing
    let recognizer = FakeRecognizer::new(Recognition::NoSpeech);
    let stt = SpeechToText::new(recognizer.clone());
    let wav = normalizer(&store).normalize(&input).await.unwrap();
    assert_eq!(stt.transcribe(wav).await.unwrap_err(), PipelineFailure::NoSpeechDetected);
    assert_eq!(recognizer.calls(), 1);

    assert!(files_in(work.path()).is_empty());
}

#[tokio::test]
async fn test_backend_error_is_service_unavailable() {
    let inputs = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let store = TempStore::new(work.path());
    let input = write_fixture(
        inputs.path(),
        "speech.wav",
        &wav_bytes(&tone(FIXTURE_RATE, 1.0), FIXTURE_RATE, 1),
    );

    let stt = SpeechToText::new(FakeRecognizer::new(Recognition::Unavailable));
    let wav = normalizer(&store).normalize(&input).await.unwrap();
    assert_eq!(stt.transcribe(wav).await.unwrap_err(), PipelineFailure::ServiceUnavailable);
    assert!(files_in(work.path()).is_empty());
}

#[tokio::test]
async fn test_tts_failures() {
    let work = tempfile::tempdir().unwrap();
    let store = TempStore::new(work.path());
    let synthesizer = FakeSynthesizer::new();
    let tts = TextToSpeech::new(synthesizer.clone(), store.clone());

    assert_eq!(tts.speak("", None).await.unwrap_err(), PipelineFailure::SynthesisFailed);
    assert_eq!(tts.speak("   \n", None).await.unwrap_err(), PipelineFailure::SynthesisFailed);
    assert_eq!(tts.speak("hi", Some("xx")).await.unwrap_err(), PipelineFailure::SynthesisFailed);
    assert_eq!(synthesizer.calls(), 0);

    let broken = TextToSpeech::new(FakeSynthesizer::failing(), store);
    assert_eq!(broken.speak("hi", None).await.unwrap_err(), PipelineFailure::SynthesisFailed);

    assert!(files_in(work.path()).is_empty());
}

#[tokio::test]
async fn test_tts_creates_one_mp3() {
    let work = tempfile::tempdir().unwrap();
    let tts = TextToSpeech::new(FakeSynthesizer::new(), TempStore::new(work.path()));

    let speech = tts.speak("hello there", Some("en")).await.unwrap();
    assert_eq!(speech.audio.encoding(), AudioEncoding::Mp3);
    assert_eq!(speech.audio.path().extension().unwrap(), "mp3");
    assert_eq!(std::fs::read(speech.audio.path()).unwrap(), FAKE_MP3);
    assert_eq!(files_in(work.path()).len(), 1);

    drop(speech);
    assert!(files_in(work.path()).is_empty());
}

#[test]
fn test_remove_artifact_twice() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path(), "reply.mp3", FAKE_MP3);

    assert!(remove_artifact(&path).unwrap());
    assert!(!remove_artifact(&path).unwrap());
}

#[tokio::test]
async fn test_scenario_hello_delivered() {
    let work = tempfile::tempdir().unwrap();
    let synthesizer = FakeSynthesizer::new();
    let responder = FakeResponder::replying("hello there");
    let pipeline = pipeline(
        work.path(),
        FakeRecognizer::hearing("hello"),
        responder.clone(),
        synthesizer.clone(),
    );

    let audio = wav_bytes(&tone(FIXTURE_RATE, 1.0), FIXTURE_RATE, 1);
    let outcome = pipeline.process_bytes(&audio, AudioEncoding::PcmWav, &[]).await;

    assert_eq!(outcome.run.state(), PipelineState::Delivered);
    assert_eq!(
        outcome.run.history(),
        &[
            PipelineState::Received,
            PipelineState::Normalizing,
            PipelineState::Transcribing,
            PipelineState::Generating,
            PipelineState::Synthesizing,
            PipelineState::Delivered,
        ]
    );

    let reply = outcome.result.unwrap();
    assert_eq!(reply.transcript, "hello");
    assert_eq!(reply.reply, "hello there");
    assert_eq!(responder.prompts(), ["hello"]);
    assert_eq!(synthesizer.calls(), 1);

    // Only the synthesized reply is left, and the caller owns it
    let remaining = files_in(work.path());
    assert_eq!(remaining, [reply.speech.audio.path().to_path_buf()]);
    assert!(!std::fs::read(&remaining[0]).unwrap().is_empty());

    drop(reply);
    assert!(files_in(work.path()).is_empty());
}

#[tokio::test]
async fn test_scenario_text_document_fails_conversion() {
    let work = tempfile::tempdir().unwrap();
    let recognizer = FakeRecognizer::hearing("hello");
    let synthesizer = FakeSynthesizer::new();
    let pipeline = pipeline(
        work.path(),
        recognizer.clone(),
        FakeResponder::replying("unused"),
        synthesizer.clone(),
    );

    let document = b"Meeting notes\n- buy milk\n- call Bob\n";
    let outcome = pipeline
        .process_bytes(document, AudioEncoding::from_mime("audio/ogg"), &[])
        .await;

    assert_eq!(outcome.result.unwrap_err(), PipelineFailure::ConversionFailed);
    assert_eq!(
        outcome.run.state(),
        PipelineState::Failed(PipelineFailure::ConversionFailed)
    );
    assert!(!outcome.run.visited(PipelineState::Transcribing));
    assert_eq!(recognizer.calls(), 0);
    assert_eq!(synthesizer.calls(), 0);
    assert!(files_in(work.path()).is_empty());
}

#[tokio::test]
async fn test_scenario_empty_generation_skips_synthesis() {
    let work = tempfile::tempdir().unwrap();
    let synthesizer = FakeSynthesizer::new();
    let pipeline = pipeline(
        work.path(),
        FakeRecognizer::hearing("hello"),
        FakeResponder::empty(),
        synthesizer.clone(),
    );

    let audio = wav_bytes(&tone(FIXTURE_RATE, 1.0), FIXTURE_RATE, 1);
    let outcome = pipeline.process_bytes(&audio, AudioEncoding::PcmWav, &[]).await;

    let reason = outcome.result.unwrap_err();
    assert_eq!(reason, PipelineFailure::GenerationFailed);
    assert_ne!(reason, PipelineFailure::NoSpeechDetected);
    assert_ne!(reason, PipelineFailure::ServiceUnavailable);
    assert!(outcome.run.visited(PipelineState::Generating));
    assert!(!outcome.run.visited(PipelineState::Synthesizing));
    assert_eq!(synthesizer.calls(), 0);
    assert!(files_in(work.path()).is_empty());
}

#[tokio::test]
async fn test_generation_error_is_generation_failed() {
    let work = tempfile::tempdir().unwrap();
    let pipeline = pipeline(
        work.path(),
        FakeRecognizer::hearing("hello"),
        FakeResponder::failing(),
        FakeSynthesizer::new(),
    );

    let audio = wav_bytes(&tone(FIXTURE_RATE, 1.0), FIXTURE_RATE, 1);
    let outcome = pipeline.process_bytes(&audio, AudioEncoding::PcmWav, &[]).await;

    assert_eq!(outcome.result.unwrap_err(), PipelineFailure::GenerationFailed);
    assert!(files_in(work.path()).is_empty());
}

#[tokio::test]
async fn test_synthesis_failure_cleans_up() {
    let work = tempfile::tempdir().unwrap();
    let pipeline = pipeline(
        work.path(),
        FakeRecognizer::hearing("hello"),
        FakeResponder::replying("hello there"),
        FakeSynthesizer::failing(),
    );

    let audio = wav_bytes(&tone(FIXTURE_RATE, 1.0), FIXTURE_RATE, 1);
    let outcome = pipeline.process_bytes(&audio, AudioEncoding::PcmWav, &[]).await;

    assert_eq!(
        outcome.run.state(),
        PipelineState::Failed(PipelineFailure::SynthesisFailed)
    );
    assert!(files_in(work.path()).is_empty());
}

#[tokio::test]
async fn test_history_is_sent_as_conversation() {
    let work = tempfile::tempdir().unwrap();
    let responder = FakeResponder::replying("Paris, still");
    let pipeline = pipeline(
        work.path(),
        FakeRecognizer::hearing("and now?"),
        responder.clone(),
        FakeSynthesizer::new(),
    );

    let history = [
        ConversationTurn::new(Role::User, "capital of France?"),
        ConversationTurn::new(Role::Assistant, "Paris"),
    ];
    let audio = wav_bytes(&tone(FIXTURE_RATE, 1.0), FIXTURE_RATE, 1);
    let outcome = pipeline.process_bytes(&audio, AudioEncoding::PcmWav, &history).await;
    assert_eq!(outcome.result.unwrap().reply, "Paris, still");

    assert!(responder.prompts().is_empty());
    let conversations = responder.conversations();
    assert_eq!(conversations.len(), 1);
    let turns = &conversations[0];
    assert_eq!(turns.len(), 3);
    assert_eq!(turns[2].role(), Role::User);
    assert_eq!(turns[2].content(), "and now?");
}

#[tokio::test]
async fn test_process_file_keeps_caller_input() {
    let inputs = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let input = write_fixture(
        inputs.path(),
        "question.wav",
        &wav_bytes(&tone(22_050, 1.0), 22_050, 2),
    );
    let pipeline = pipeline(
        work.path(),
        FakeRecognizer::hearing("hello"),
        FakeResponder::replying("hi"),
        FakeSynthesizer::new(),
    );

    let outcome = pipeline.process_file(&input, &[]).await;
    let reply = outcome.result.unwrap();

    assert!(input.exists());
    assert_eq!(files_in(work.path()).len(), 1);
    drop(reply);
    assert!(files_in(work.path()).is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_ffmpeg_failures_fail_conversion() {
    let inputs = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let store = TempStore::new(work.path());
    let input = write_fixture(inputs.path(), "voice.oga", b"OggS but not really");

    // Non-zero exit, a zero exit that writes nothing, and no binary at all
    for ffmpeg in ["/bin/false", "/bin/true", "/nonexistent/ffmpeg"] {
        let normalizer = normalizer(&store).with_ffmpeg(Some(PathBuf::from(ffmpeg)));
        let err = normalizer.normalize(&input).await.unwrap_err();
        assert_eq!(err, PipelineFailure::ConversionFailed, "{ffmpeg}");
        assert!(files_in(work.path()).is_empty(), "{ffmpeg} left files behind");
    }

    assert!(input.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_ffmpeg_fallback_output_is_transcribed() {
    let inputs = tempfile::tempdir().unwrap();
    let tools = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let store = TempStore::new(work.path());

    let decoded = write_fixture(
        tools.path(),
        "decoded.wav",
        &wav_bytes(&tone(FIXTURE_RATE, 1.0), FIXTURE_RATE, 1),
    );
    let ffmpeg = fake_ffmpeg(
        tools.path(),
        &format!("for last; do :; done\ncp '{}' \"$last\"", decoded.display()),
    );
    let input = write_fixture(inputs.path(), "voice.oga", b"OggS opus frames");

    let normalizer = normalizer(&store).with_ffmpeg(Some(ffmpeg));
    let wav = normalizer.normalize(&input).await.unwrap();
    assert_eq!(wav.encoding(), AudioEncoding::PcmWav);
    assert_eq!(files_in(work.path()), [wav.path().to_path_buf()]);

    let recognizer = FakeRecognizer::hearing("hello");
    let stt = SpeechToText::new(recognizer.clone());
    assert_eq!(stt.transcribe(wav).await.unwrap(), "hello");
    assert_eq!(recognizer.calls(), 1);

    assert!(input.exists());
    assert!(files_in(work.path()).is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_cancelled_ffmpeg_is_killed() {
    let inputs = tempfile::tempdir().unwrap();
    let tools = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let store = TempStore::new(work.path());

    let started = tools.path().join("started");
    let finished = tools.path().join("finished");
    let ffmpeg = fake_ffmpeg(
        tools.path(),
        &format!(
            "touch '{}'\nsleep 1\ntouch '{}'",
            started.display(),
            finished.display()
        ),
    );
    let input = write_fixture(inputs.path(), "voice.oga", b"OggS opus frames");
    let normalizer = normalizer(&store).with_ffmpeg(Some(ffmpeg));

    let mut conversion = Box::pin(normalizer.normalize(&input));
    tokio::select! {
        _ = &mut conversion => panic!("conversion finished before it was cancelled"),
        () = until(|| started.exists()) => {}
    }
    drop(conversion);
    assert!(files_in(work.path()).is_empty());

    // A surviving child would create the marker once its sleep ends
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!finished.exists());
}

#[tokio::test]
async fn test_cancelled_run_leaves_no_files() {
    let work = tempfile::tempdir().unwrap();
    let recognizer = FakeRecognizer::new(Recognition::Stall);
    let synthesizer = FakeSynthesizer::new();
    let pipeline = pipeline(
        work.path(),
        recognizer.clone(),
        FakeResponder::replying("unused"),
        synthesizer.clone(),
    );

    let audio = wav_bytes(&tone(FIXTURE_RATE, 1.0), FIXTURE_RATE, 1);
    let mut run = Box::pin(pipeline.process_bytes(&audio, AudioEncoding::PcmWav, &[]));
    tokio::select! {
        _ = &mut run => panic!("pipeline finished while the recognizer stalled"),
        () = until(|| recognizer.calls() == 1) => {}
    }

    // Stalled mid-transcription with the normalized audio on disk
    assert!(!files_in(work.path()).is_empty());

    let cancelled = tokio::time::timeout(Duration::from_millis(100), &mut run).await;
    assert!(cancelled.is_err());
    drop(run);

    assert_eq!(synthesizer.calls(), 0);
    assert!(files_in(work.path()).is_empty());
}

/// Poll `done` until it holds, giving up after ten seconds
async fn until(done: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(10), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition never held");
}
