mod timeline;

use crate::timeline::Timeline;
use anyhow::{Context, Result, bail};
use clap::Parser;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message};
use tracing_subscriber::fmt::time::ChronoLocal;
use voice_relay_audio::audio::{self, INPUT_SAMPLE_RATE};
use voice_relay_audio::playback::{MonotonicClock, PlaybackHandle, spawn_playback};
use voice_relay_audio::{AudioFormat, PlaybackScheduler, ScheduledFragment};
use voice_relay_core::{ClientCommand, RelayMessage, StartConfig};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Input audio is streamed in chunks of this length.
const INPUT_CHUNK_MS: u64 = 100;

#[derive(Parser)]
#[command(version, about = "Talks to a voice relay and records what the model says")]
struct Cli {
    /// Text turns to send, in order. Each waits for the model to finish replying.
    turns: Vec<String>,

    /// Relay WebSocket endpoint.
    #[arg(long, default_value = "ws://127.0.0.1:3001/ws")]
    url: String,

    /// A 16 kHz mono PCM16 WAV file streamed as microphone audio before the text turns.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Where the scheduled model audio is written.
    #[arg(short, long, default_value = "reply.wav")]
    output: PathBuf,

    #[arg(long)]
    system_prompt: Option<String>,

    #[arg(long, default_value = "sq")]
    language: String,

    #[arg(long)]
    voice: Option<String>,

    /// Seconds to wait for the relay before giving up on a reply.
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    #[arg(long, default_value = "INFO")]
    log_level: tracing::Level,
}

struct RelayConnection {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    playback: PlaybackHandle,
    timeout: Duration,
}

impl RelayConnection {
    async fn send(&mut self, command: &ClientCommand) -> Result<()> {
        let json = serde_json::to_string(command)?;
        self.write
            .send(Message::Text(json))
            .await
            .context("Failed to send command to relay")
    }

    async fn next_message(&mut self) -> Result<RelayMessage> {
        loop {
            let frame = tokio::time::timeout(self.timeout, self.read.next())
                .await
                .context("Timed out waiting for the relay")?;
            match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                    Ok(message) => return Ok(message),
                    Err(e) => tracing::warn!("Ignoring unrecognized relay message: {}", e),
                },
                Some(Ok(Message::Close(frame))) => bail!("Relay closed the connection: {:?}", frame),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("Failed to read from relay"),
                None => bail!("Relay connection ended"),
            }
        }
    }

    /// Reads messages until `done` matches one, routing audio to playback.
    async fn until(&mut self, done: impl Fn(&RelayMessage) -> bool) -> Result<()> {
        loop {
            let message = self.next_message().await?;
            match &message {
                RelayMessage::Audio { data, mime_type } => {
                    let pcm = audio::decode_bytes(data)
                        .with_context(|| format!("Relay sent undecodable {} audio", mime_type))?;
                    self.playback.enqueue(pcm)?;
                }
                RelayMessage::Response { content, .. } => println!("model: {}", content),
                RelayMessage::UserSpeaking { speaking } => tracing::info!("user speaking: {}", speaking),
                RelayMessage::AiSpeaking { speaking } => tracing::info!("model speaking: {}", speaking),
                RelayMessage::AiInterrupted => tracing::info!("model was interrupted"),
                RelayMessage::Error { message } => bail!("Relay reported an error: {}", message),
                RelayMessage::Ready | RelayMessage::TurnComplete => {}
            }
            if done(&message) {
                return Ok(());
            }
        }
    }

    async fn stream_wav(&mut self, path: &Path) -> Result<()> {
        let mut reader = hound::WavReader::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let spec = reader.spec();
        if spec.channels != 1 || spec.sample_rate != INPUT_SAMPLE_RATE || spec.bits_per_sample != 16 {
            bail!(
                "{} must be 16-bit mono at {} Hz, found {:?}",
                path.display(),
                INPUT_SAMPLE_RATE,
                spec
            );
        }
        let samples: Vec<i16> = reader.samples::<i16>().collect::<Result<_, _>>()?;

        let chunk_len = (INPUT_SAMPLE_RATE as u64 * INPUT_CHUNK_MS / 1000) as usize;
        let mut pace = tokio::time::interval(Duration::from_millis(INPUT_CHUNK_MS));
        for chunk in samples.chunks(chunk_len) {
            pace.tick().await;
            self.send(&ClientCommand::Audio {
                audio: audio::encode_i16(chunk),
            })
            .await?;
        }
        tracing::info!("Streamed {:.1}s of audio", samples.len() as f64 / INPUT_SAMPLE_RATE as f64);
        Ok(())
    }
}

/// Consumes scheduled fragments, waiting out each one in real time and
/// reporting its completion until `finished` fires.
async fn render(
    clock: MonotonicClock,
    mut scheduled: mpsc::UnboundedReceiver<ScheduledFragment>,
    playback: PlaybackHandle,
    mut finished: oneshot::Receiver<()>,
) -> Timeline {
    let mut timeline = Timeline::new(AudioFormat::upstream_output());
    let mut completions = Some(playback);

    loop {
        tokio::select! {
            fragment = scheduled.recv() => {
                let Some(fragment) = fragment else { break };
                timeline.place(&fragment);
                if let Some(playback) = &completions {
                    tokio::time::sleep_until(clock.instant_at(fragment.end).into()).await;
                    if let Err(e) = playback.fragment_ended(fragment.seq) {
                        tracing::debug!("{}", e);
                    }
                }
            }
            _ = &mut finished, if completions.is_some() => {
                // Dropping the last handle lets the playback task drain and stop.
                completions = None;
            }
        }
    }
    timeline
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    if cli.turns.is_empty() && cli.input.is_none() {
        bail!("Nothing to send: pass at least one text turn or --input");
    }

    let (ws, _) = connect_async(cli.url.as_str())
        .await
        .with_context(|| format!("Failed to connect to {}", cli.url))?;
    tracing::info!("Connected to {}", cli.url);
    let (write, read) = ws.split();

    let clock = MonotonicClock::new();
    let scheduler = PlaybackScheduler::new(clock, AudioFormat::upstream_output());
    let (playback, scheduled, playback_task) = spawn_playback(scheduler);
    let (finish_tx, finish_rx) = oneshot::channel();
    let renderer = tokio::spawn(render(clock, scheduled, playback.clone(), finish_rx));

    let mut relay = RelayConnection {
        write,
        read,
        playback,
        timeout: Duration::from_secs(cli.timeout),
    };

    relay
        .send(&ClientCommand::Start {
            config: StartConfig {
                system_prompt: cli.system_prompt.clone(),
                language: Some(cli.language.clone()),
                voice_hint: cli.voice.clone(),
                token: None,
            },
        })
        .await?;
    relay.until(|m| matches!(m, RelayMessage::Ready)).await?;
    tracing::info!("Session ready");

    if let Some(input) = &cli.input {
        relay.stream_wav(input).await?;
        relay.until(|m| matches!(m, RelayMessage::TurnComplete)).await?;
    }

    for turn in &cli.turns {
        println!("you: {}", turn);
        relay.send(&ClientCommand::Text { text: turn.clone() }).await?;
        relay.until(|m| matches!(m, RelayMessage::TurnComplete)).await?;
    }

    relay.send(&ClientCommand::Stop).await?;
    if let Err(e) = relay.write.close().await {
        tracing::debug!("Closing relay connection: {}", e);
    }

    drop(relay);
    let _ = finish_tx.send(());
    let scheduler = playback_task.await.context("Playback task failed")?;
    let timeline = renderer.await.context("Renderer task failed")?;
    tracing::info!(
        "Scheduled audio ends at {:.2}s on the render clock",
        scheduler.next_start_time()
    );

    timeline.write_wav(&cli.output)?;
    println!(
        "Wrote {:.2}s of audio to {}",
        timeline.duration(),
        cli.output.display()
    );
    Ok(())
}
