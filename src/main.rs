mod app;
mod config;
mod planner;
mod sim;
mod theme;
mod transcript;
mod ui;

use anyhow::Result;
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use app::App;
use config::{AppConfig, Backend, Pacing};
use sim::Platform;
use transcript::{Clock, SystemClock};

#[derive(Parser, Debug)]
#[command(name = "hackersim")]
#[command(version)]
#[command(about = "A terminal that plays out a simulated autonomous hacking session")]
struct Args {
    /// Where the hacker's next move comes from
    #[arg(short, long, value_enum)]
    backend: Option<Backend>,

    /// Target platform
    #[arg(short, long, value_enum)]
    platform: Option<Platform>,

    /// Model name for the remote backend
    #[arg(long)]
    model: Option<String>,

    /// Chat-completion endpoint for the remote backend
    #[arg(long)]
    api_url: Option<String>,

    /// Pacing multiplier (0.5 = twice as fast)
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Don't ring the bell after each command
    #[arg(long)]
    no_sound: bool,

    /// Show the API status log on startup
    #[arg(long)]
    debug_log: bool,

    /// Print N steps as JSON lines instead of running the TUI
    #[arg(short, long, value_name = "N")]
    transcript: Option<usize>,

    /// Print the effective config as TOML and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(platform) = self.platform {
            config.platform = platform;
        }
        if let Some(ref model) = self.model {
            config.remote.model = model.clone();
        }
        if let Some(ref url) = self.api_url {
            config.remote.api_url = url.clone();
        }
        if self.no_sound {
            config.sound = false;
        }
        if self.debug_log {
            config.show_debug_log = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let headless = args.transcript.is_some() || args.print_config;
    init_logging(headless);

    let mut config = AppConfig::load()?;
    args.apply(&mut config);

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let pacing = config.pacing.scaled(args.speed);

    if let Some(steps) = args.transcript {
        return run_transcript(config, steps).await;
    }

    // Run TUI
    run_tui(config, pacing).await
}

/// Log to stderr when headless, otherwise to a file so the screen stays clean
fn init_logging(headless: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hackersim=info"));
    let registry = tracing_subscriber::registry().with(filter);

    if headless {
        registry.with(tracing_subscriber::fmt::layer().with_writer(io::stderr)).init();
    } else if let Some(file) = open_log_file() {
        registry
            .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .init();
    } else {
        registry.init();
    }
}

fn open_log_file() -> Option<std::fs::File> {
    let dir = dirs::cache_dir()?.join("hackersim");
    std::fs::create_dir_all(&dir).ok()?;
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("hackersim.log"))
        .ok()
}

async fn run_tui(config: AppConfig, pacing: Pacing) -> Result<()> {
    ui::init_theme(theme::Theme::load(&config.theme));

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Create app state
    let mut app = App::new(config, pacing);
    tracing::info!("Session started with the {} planner", app.backend_name());

    // Main loop
    let result = run_app(&mut terminal, &mut app).await;
    app.shutdown();

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<()> {
    loop {
        terminal.draw(|f| ui::draw(f, app))?;

        if event::poll(Duration::from_millis(16))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('c') | KeyCode::Char('q')
                            if key.modifiers.contains(KeyModifiers::CONTROL) =>
                        {
                            return Ok(())
                        }
                        _ => {
                            // Handle key and catch any errors to prevent crashes
                            if let Err(e) = app.handle_key(key) {
                                app.status_message = Some(format!("Error: {}", e));
                                app.status_message_time = Some(Instant::now());
                            }
                        }
                    }
                }
            }
        }

        if let Err(e) = app.tick() {
            tracing::warn!("Tick failed: {}", e);
        }

        // Let the planner task make progress on this thread too
        tokio::task::yield_now().await;
    }
}

/// Headless run: one JSON line per finished step on stdout
async fn run_transcript(config: AppConfig, steps: usize) -> Result<()> {
    let (planner, _) = planner::build(&config);
    let mut clock = SystemClock;
    let mut engine = transcript::engine_for(&config, planner.as_ref(), clock.now());
    let mut stdout = io::stdout();

    transcript::run(&mut engine, planner.as_ref(), steps, &mut stdout, &mut clock).await
}
