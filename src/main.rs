//! Lexia Copilot - command line front end
//!
//! `chat` runs the text loop on stdin, `voice` opens a live audio session
//! (needs the `pulse` feature) and `briefing` prints the catch-up summary.

#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use lexia_copilot::briefing::BriefingService;
use lexia_copilot::crm::{CrmService, InMemoryCrm};
use lexia_copilot::gemini::rest::RestModel;
use lexia_copilot::gemini::GenerativeModel;
use lexia_copilot::navigation::Router;
use lexia_copilot::{CopilotConfig, EventHub, Role, TextConversation, ToolExecutor, Transcript};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lexia-copilot", version, about = "CRM assistant backed by Gemini")]
struct Cli {
    /// Overrides GEMINI_API_KEY
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Save both audio directions of voice sessions as WAV files here
    #[arg(long, global = true)]
    recording_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Talk to the assistant in text, one message per line
    Chat,
    /// Open a live voice session on the default microphone and speakers
    Voice {
        /// Page the session starts from
        #[arg(long, default_value = "/")]
        location: String,
    },
    /// Summarize CRM activity since the last login
    Briefing {
        /// RFC 3339 timestamp of the previous login
        #[arg(long)]
        last_login: Option<String>,
        /// Also synthesize the briefing as speech
        #[arg(long)]
        speak: bool,
        /// Where the spoken briefing is written
        #[arg(long, default_value = "briefing.wav")]
        out: PathBuf,
    },
}

struct App {
    config: CopilotConfig,
    hub: EventHub,
    crm: Arc<dyn CrmService>,
    router: Arc<Router>,
    transcript: Transcript,
}

impl App {
    fn new(config: CopilotConfig) -> Self {
        let hub = EventHub::new();
        Self {
            router: Arc::new(Router::new(hub.clone())),
            crm: Arc::new(InMemoryCrm::seeded()),
            transcript: Transcript::new(),
            config,
            hub,
        }
    }

    fn executor(&self) -> ToolExecutor {
        ToolExecutor::new(
            self.crm.clone(),
            self.router.clone(),
            self.hub.clone(),
            self.transcript.clone(),
        )
        .with_notice_ttl(self.config.notice_ttl)
    }

    fn api_key(&self) -> Result<&str> {
        self.config
            .api_key
            .as_deref()
            .context("GEMINI_API_KEY is not set")
    }

    fn rest_model(&self) -> Result<Arc<dyn GenerativeModel>> {
        let model = RestModel::new(&self.config.rest_endpoint, self.api_key()?)?;
        Ok(Arc::new(model))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = CopilotConfig::from_env();
    if let Some(key) = cli.api_key {
        config.api_key = Some(key);
    }
    if let Some(dir) = cli.recording_dir {
        config.recording_dir = Some(dir);
    }
    let app = App::new(config);

    match cli.command {
        Command::Chat => chat(&app).await,
        Command::Voice { location } => voice(&app, &location).await,
        Command::Briefing {
            last_login,
            speak,
            out,
        } => briefing(&app, last_login.as_deref(), speak, out).await,
    }
}

async fn chat(app: &App) -> Result<()> {
    let mut conversation = TextConversation::new(app.rest_model()?, app.executor())
        .with_model_name(&app.config.text_model)
        .with_max_tool_rounds(app.config.max_tool_rounds);

    info!("Chat ready, type /reset to start over");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shown = 0;

    while let Some(line) = lines.next_line().await? {
        if line.trim() == "/reset" {
            conversation.reset();
            shown = 0;
            continue;
        }
        conversation.send(&line).await;

        for message in app.transcript.snapshot().into_iter().skip(shown) {
            match message.role {
                Role::User => {}
                Role::Tool => println!(
                    "  [{}] {}",
                    message.tool_name.unwrap_or_default(),
                    message.tool_args.unwrap_or_default()
                ),
                Role::Model if message.is_error => {
                    println!("! {}", message.text.unwrap_or_default())
                }
                Role::Model => println!("{}", message.text.unwrap_or_default()),
            }
        }
        shown = app.transcript.len();
    }
    Ok(())
}

#[cfg(feature = "pulse")]
async fn voice(app: &App, location: &str) -> Result<()> {
    use lexia_copilot::audio::pulse::PulseDevices;
    use lexia_copilot::gemini::live::GeminiLiveConnector;
    use lexia_copilot::navigation::Navigator;
    use lexia_copilot::ConversationSession;

    let url = format!("{}?key={}", app.config.live_endpoint, app.api_key()?);
    app.router.navigate(location);
    let mut session = ConversationSession::new(
        Arc::new(PulseDevices::new("lexia-copilot")),
        Arc::new(GeminiLiveConnector::new(url)),
        app.executor(),
        app.hub.clone(),
        app.config.live_session(),
    );

    session.connect(&app.router.current_path()).await?;
    info!("Listening, press Ctrl-C to stop");
    tokio::select! {
        _ = session.run() => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }
    session.disconnect().await;
    Ok(())
}

#[cfg(not(feature = "pulse"))]
async fn voice(_app: &App, _location: &str) -> Result<()> {
    bail!("voice sessions need an audio backend; rebuild with `--features pulse`")
}

async fn briefing(app: &App, last_login: Option<&str>, speak: bool, out: PathBuf) -> Result<()> {
    let last_login = last_login
        .map(|s| DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)))
        .transpose()
        .context("--last-login must be an RFC 3339 timestamp")?;

    // Without a key the heuristic summary is still useful
    let model = match app.config.api_key {
        Some(_) => Some(app.rest_model()?),
        None => None,
    };
    let service = BriefingService::new(app.crm.clone(), model)
        .with_models(&app.config.summary_model, &app.config.tts_model)
        .with_voice(&app.config.tts_voice);

    let report = service.generate(last_login, Utc::now()).await?;
    println!("{}", serde_json::to_string_pretty(&report.briefing)?);

    if speak {
        if app.config.api_key.is_none() {
            bail!("--speak needs GEMINI_API_KEY");
        }
        let samples = service
            .speak(&report.briefing.speech_script(report.context_mode))
            .await?;
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: app.config.output_sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&out, spec)?;
        for s in lexia_copilot::audio::pcm::to_i16(&samples) {
            writer.write_sample(s)?;
        }
        writer.finalize()?;
        info!("Spoken briefing written to {}", out.display());
    }
    Ok(())
}
