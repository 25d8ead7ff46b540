use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use voice_chatter::client::play_reply;
use voice_chatter::voice::{
    AudioCaptureSource, MicrophoneCapture, PlaybackSink, SAMPLE_RATE, SpeakerPlayback,
    WavFileSink, f32_to_i16, i16_to_f32, pcm_to_wav, record_for, samples_to_pcm,
};
use voice_chatter::{
    ApiServerBuilder, ClientConfig, HttpVoiceClient, ServerConfig, Services, VoiceClient,
};

/// Chatter - real-time voice chat with a cloud conversational agent
#[derive(Parser)]
#[command(name = "chatter", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Load client settings from a dotenv file
    #[arg(long, global = true)]
    env: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the backend server
    Serve {
        /// TOML config file (defaults to the user config directory)
        #[arg(short, long, env = "CHATTER_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Push-to-talk over the streaming connection
    Talk {
        /// Run a single exchange and exit
        #[arg(long)]
        once: bool,
        /// Write replies to this WAV file instead of playing them
        #[arg(long)]
        save_reply: Option<PathBuf>,
    },
    /// Record a fixed-length utterance and send it over HTTP
    Record {
        /// Write the reply to this WAV file instead of playing it
        #[arg(long)]
        save_reply: Option<PathBuf>,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,voice_chatter=info",
        1 => "info,voice_chatter=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let env_file = cli.env.as_deref();
    match cli.command {
        Command::Serve { config } => serve(config).await,
        Command::Talk { once, save_reply } => {
            talk(&ClientConfig::load(env_file)?, once, save_reply).await
        }
        Command::Record { save_reply } => record(&ClientConfig::load(env_file)?, save_reply).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker(),
    }
}

/// Run the backend until interrupted
async fn serve(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = ServerConfig::load(config_path.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    let services = Services::from_config(&config)?;
    tracing::info!(
        port = config.port,
        backend = ?config.backend,
        "starting voice chatter server"
    );

    ApiServerBuilder::from_config(&config, services)
        .build()
        .run()
        .await?;

    Ok(())
}

/// Reply destination chosen by `--save-reply`
fn playback_sink(save_reply: Option<PathBuf>) -> anyhow::Result<Box<dyn PlaybackSink>> {
    Ok(match save_reply {
        Some(path) => Box::new(WavFileSink::new(path)),
        None => Box::new(SpeakerPlayback::new()?),
    })
}

/// Enter presses from one reader thread shared by every prompt
struct EnterKeys {
    presses: tokio::sync::mpsc::UnboundedReceiver<()>,
}

impl EnterKeys {
    fn stdin() -> Self {
        Self::spawn(std::io::BufReader::new(std::io::stdin()))
    }

    fn spawn(mut input: impl std::io::BufRead + Send + 'static) -> Self {
        let (tx, presses) = tokio::sync::mpsc::unbounded_channel();
        std::thread::spawn(move || {
            let mut line = String::new();
            loop {
                line.clear();
                match input.read_line(&mut line) {
                    Ok(n) if n > 0 => {
                        if tx.send(()).is_err() {
                            break;
                        }
                    }
                    _ => break,
                }
            }
        });
        Self { presses }
    }

    /// Next press; `false` once input is closed
    async fn pressed(&mut self) -> bool {
        self.presses.recv().await.is_some()
    }

    /// Drop presses made while nobody was prompting
    fn discard_pending(&mut self) {
        while self.presses.try_recv().is_ok() {}
    }
}

/// Push-to-talk loop over `/ws/voice`
#[allow(clippy::future_not_send)]
async fn talk(config: &ClientConfig, once: bool, save_reply: Option<PathBuf>) -> anyhow::Result<()> {
    let client = VoiceClient::from_config(config)?;
    let mut capture = MicrophoneCapture::new(config.sample_rate, config.chunk_ms)?;
    let mut sink = playback_sink(save_reply)?;
    let mut keys = EnterKeys::stdin();

    loop {
        keys.discard_pending();
        println!("Press Enter to start talking (Ctrl-D to quit)");
        if !keys.pressed().await {
            break;
        }
        println!("Listening... press Enter to stop");

        let stop = async {
            keys.pressed().await;
        };

        match client.talk_once(&mut capture, stop).await {
            Ok(exchange) => {
                tracing::debug!(frames = exchange.frames_sent, "exchange finished");
                match play_reply(exchange, sink.as_mut()) {
                    Ok(reply) => {
                        println!("You: {}", reply.transcript);
                        println!("Reply: {}", reply.response_text);
                    }
                    Err(e) => tracing::warn!(error = %e, "session ended without a reply"),
                }
            }
            Err(e) => tracing::error!(error = %e, "session failed"),
        }

        if once {
            break;
        }
    }

    Ok(())
}

/// Fixed-length recording over `/process-audio`
#[allow(clippy::future_not_send)]
async fn record(config: &ClientConfig, save_reply: Option<PathBuf>) -> anyhow::Result<()> {
    let client = HttpVoiceClient::from_config(config)?;
    let mut capture = MicrophoneCapture::new(config.sample_rate, config.chunk_ms)?;
    let mut sink = playback_sink(save_reply)?;

    println!("Recording for {} seconds...", config.record_seconds);
    let pcm = record_for(&mut capture, Duration::from_secs(config.record_seconds)).await?;
    if pcm.is_empty() {
        anyhow::bail!("no audio captured");
    }

    let wav = pcm_to_wav(&pcm, config.sample_rate)?;
    println!("Sending {} bytes...", wav.len());

    let reply = client.process(wav).await?;
    tracing::info!(bytes = reply.pcm.len(), "reply received");
    sink.play(&reply.pcm, reply.sample_rate)?;

    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = MicrophoneCapture::new(SAMPLE_RATE, voice_chatter::voice::CHUNK_MS)?;
    let (queue, mut receiver) = voice_chatter::stream::chunk_queue();
    capture.start(queue)?;

    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.tick().await;
    let mut samples: Vec<f32> = Vec::new();
    let mut elapsed = 0;

    while elapsed < duration {
        tokio::select! {
            _ = tick.tick() => {
                elapsed += 1;
                let energy = calculate_rms(&samples);
                let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let meter_len = (energy * 100.0).min(50.0) as usize;
                let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

                println!("[{elapsed:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]");
                samples.clear();
            }
            frame = receiver.recv() => match frame {
                Some(frame) => samples.extend(frame.samples().map(i16_to_f32)),
                None => break,
            },
        }
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");
    println!("  3. Try: alsamixer (to check capture levels)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let mut playback = SpeakerPlayback::new()?;

    let frequency = 440.0_f32;
    let num_samples = SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<i16> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            f32_to_i16((2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3)
        })
        .collect();

    println!("Playing {} samples at {SAMPLE_RATE} Hz...", samples.len());
    playback.play(&samples_to_pcm(&samples), SAMPLE_RATE)?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: aplay -l (to list devices)");
    println!("  2. Try: alsamixer (to check output levels)");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn each_line_is_one_press_until_eof() {
        let mut keys = EnterKeys::spawn(std::io::Cursor::new(b"\n\n".to_vec()));

        assert!(keys.pressed().await);
        assert!(keys.pressed().await);
        assert!(!keys.pressed().await);
    }

    #[tokio::test]
    async fn unused_stop_press_is_not_lost_to_a_dead_reader() {
        let mut keys = EnterKeys::spawn(std::io::Cursor::new(b"\n\n\n".to_vec()));

        // a stop that is dropped before it sees a press
        let stop = async {
            keys.pressed().await;
        };
        drop(stop);

        // the start prompt still gets every press
        assert!(keys.pressed().await);
        assert!(keys.pressed().await);
        assert!(keys.pressed().await);
        assert!(!keys.pressed().await);
    }

    #[tokio::test]
    async fn stale_presses_are_discarded() {
        let mut keys = EnterKeys::spawn(std::io::Cursor::new(b"\n\n".to_vec()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        keys.discard_pending();
        assert!(!keys.pressed().await);
    }
}
