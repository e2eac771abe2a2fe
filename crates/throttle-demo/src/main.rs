use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use throttle_core::{ManualScheduler, Throttle, ThrottleFile, ThrottleOptions, TrailingArgs};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info};

mod trace;

#[derive(Parser, Debug)]
#[command(name = "throttle-demo", version, about = "Feed a trigger stream through a throttled action")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, default_value = "./throttle.toml")]
    config: PathBuf,

    #[arg(long, global = true)]
    wait_ms: Option<u64>,

    #[arg(long, global = true)]
    no_leading: bool,

    #[arg(long, global = true)]
    no_trailing: bool,

    #[arg(long, global = true)]
    first_args: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the resolved settings to the config file.
    Init,
    /// Every stdin line is a trigger, timed by the wall clock.
    Live,
    /// Replay a recorded trace on a virtual clock.
    Replay {
        #[arg(long)]
        trace: PathBuf,

        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    fn options(&self) -> Result<ThrottleOptions> {
        Ok(self.file()?.options())
    }

    fn file(&self) -> Result<ThrottleFile> {
        let mut file = ThrottleFile::load(&self.config)?;
        if let Some(ms) = self.wait_ms {
            file.wait_ms = ms;
        }
        if self.no_leading {
            file.leading = false;
        }
        if self.no_trailing {
            file.trailing = false;
        }
        if self.first_args {
            file.trailing_args = TrailingArgs::First;
        }
        Ok(file)
    }
}

#[derive(Debug, Serialize)]
struct Fired {
    at_ms: u64,
    count: u64,
    text: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = cli.options()?;
    info!(
        wait_ms = options.wait.as_millis() as u64,
        leading = options.leading,
        trailing = options.trailing,
        "throttle configured"
    );

    match &cli.command {
        Commands::Init => {
            cli.file()?.save(&cli.config)?;
            println!("wrote {}", cli.config.display());
            Ok(())
        }
        Commands::Live => run_live(options).await,
        Commands::Replay { trace, json } => run_replay(options, trace, *json),
    }
}

async fn run_live(options: ThrottleOptions) -> Result<()> {
    let (count_tx, mut count_rx) = watch::channel(0u64);
    let throttle = Throttle::new(
        move |line: String| {
            let n = *count_tx.borrow() + 1;
            println!(
                "[{}] {} {}",
                Local::now().format("%H:%M:%S%.3f"),
                n,
                line.to_uppercase()
            );
            count_tx.send_replace(n);
            Ok(())
        },
        options,
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let decision = throttle.invoke(line)?;
        debug!(?decision, "trigger");
    }

    // A trailing call still armed at EOF bumps the count once it fires.
    let _ = count_rx.borrow_and_update();
    if throttle.is_pending() {
        count_rx.changed().await.context("throttle dropped")?;
    }
    info!(count = *count_rx.borrow(), "input closed");
    Ok(())
}

fn run_replay(options: ThrottleOptions, path: &Path, json: bool) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read trace {}", path.display()))?;
    let events = trace::parse_trace(&raw)?;

    let sched = ManualScheduler::new();
    let clock = sched.clone();
    let mut count = 0;
    let throttle = Throttle::with_scheduler(
        move |text: String| {
            count += 1;
            let fired = Fired {
                at_ms: clock.elapsed().as_millis() as u64,
                count,
                text: text.to_uppercase(),
            };
            if json {
                println!("{}", serde_json::to_string(&fired)?);
            } else {
                println!("t={} count={} {}", fired.at_ms, fired.count, fired.text);
            }
            Ok(())
        },
        options,
        sched.clone(),
    );

    for event in events {
        sched.advance_to(Duration::from_millis(event.at_ms))?;
        let decision = throttle.invoke(event.payload)?;
        debug!(at_ms = event.at_ms, ?decision, "replayed trigger");
    }
    // Let any trailing call still armed come due.
    sched.advance(options.wait)?;
    Ok(())
}
