use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use voice_relay::daemon::{
    build_pipeline, build_recognizer, build_responder, build_store, build_synthesizer,
};
use voice_relay::voice::{AudioNormalizer, SpeechToText, TempArtifact, TextToSpeech};
use voice_relay::{Config, Daemon};

/// voice-relay - Telegram bot relaying text and voice messages to Gemini
#[derive(Parser)]
#[command(name = "voice-relay", version, about)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, env = "VOICE_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the Telegram bot (default)
    Run,
    /// Transcribe an audio file
    Transcribe {
        /// Audio file in any supported format
        file: PathBuf,
    },
    /// Synthesize speech for a piece of text
    Speak {
        /// Text to speak
        text: String,
        /// Language code (e.g. "en", "de")
        #[arg(short, long)]
        lang: Option<String>,
        /// Where to write the MP3 (defaults to a file in the temp dir)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Send a single prompt to Gemini
    Ask {
        /// Prompt text
        text: String,
    },
    /// Run the full voice pipeline over an audio file
    Voice {
        /// Audio file in any supported format
        file: PathBuf,
        /// Reply language code
        #[arg(short, long)]
        lang: Option<String>,
        /// Where to write the spoken reply
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voice_relay=info",
        1 => "info,voice_relay=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            tracing::info!("starting voice-relay");
            Daemon::new(config).run().await?;
            Ok(())
        }
        Command::Transcribe { file } => transcribe(&config, &file).await,
        Command::Speak { text, lang, out } => speak(&config, &text, lang.as_deref(), out).await,
        Command::Ask { text } => ask(&config, &text).await,
        Command::Voice { file, lang, out } => voice(&config, &file, lang, out).await,
    }
}

/// Normalize and transcribe one file
async fn transcribe(config: &Config, file: &Path) -> anyhow::Result<()> {
    let store = build_store(config);
    let mut normalizer = AudioNormalizer::new(store, config.audio.sample_rate);
    if !config.audio.ffmpeg {
        normalizer = normalizer.with_ffmpeg(None);
    }
    let stt = SpeechToText::new(build_recognizer(config)?).with_silence_gate(config.stt.silence_gate);

    let wav = normalizer.normalize(file).await?;
    let transcript = stt.transcribe(wav).await?;

    println!("{transcript}");
    Ok(())
}

/// Synthesize `text` and save the MP3
async fn speak(
    config: &Config,
    text: &str,
    lang: Option<&str>,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let tts = TextToSpeech::new(build_synthesizer(config)?, build_store(config))
        .with_default_language(config.tts.language.clone());

    let speech = tts.speak(text, lang).await?;
    let path = save(speech.audio, out)?;

    match speech.duration_secs {
        Some(secs) => println!("{} ({secs}s)", path.display()),
        None => println!("{}", path.display()),
    }
    Ok(())
}

/// Ask Gemini a single question
async fn ask(config: &Config, text: &str) -> anyhow::Result<()> {
    let responder = build_responder(config)?;

    match responder.respond(text).await? {
        Some(reply) => println!("{reply}"),
        None => anyhow::bail!("Gemini returned an empty response"),
    }
    Ok(())
}

/// Run the whole voice pipeline on a local file
async fn voice(
    config: &Config,
    file: &Path,
    lang: Option<String>,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let responder = build_responder(config)?;
    let pipeline = build_pipeline(config, responder)?.with_language(lang);

    let outcome = pipeline.process_file(file, &[]).await;
    tracing::debug!(trace = ?outcome.run.history(), "pipeline finished");
    let reply = outcome.result?;

    println!("🎤 {}", reply.transcript);
    println!("🤖 {}", reply.reply);
    println!("🔊 {}", save(reply.speech.audio, out)?.display());
    Ok(())
}

/// Copy an artifact to `out`, or keep it in place when no target is given
fn save(audio: TempArtifact, out: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let Some(out) = out else {
        return Ok(audio.keep());
    };

    std::fs::copy(audio.path(), &out)?;
    Ok(out)
}
