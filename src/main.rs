use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use stopwatch::{EngineConfig, MinutesPolicy, MonotonicClock, StopwatchObserver, TimerState, TimingEngine};
use tracing_subscriber::filter::EnvFilter;

#[derive(Parser)]
#[command(name = "stopwatch", about = "Terminal stopwatch with lap splits")]
struct Cli {
    /// Tick interval in milliseconds
    #[arg(long, default_value = "10")]
    tick_ms: u64,

    /// Wrap minutes at 60 and carry whole hours
    #[arg(long)]
    wall_clock: bool,

    /// Minimum wall time between printed updates, in milliseconds
    #[arg(long, default_value = "100")]
    print_every_ms: u64,
}

const HELP: &str = "commands: s/enter = start/stop, l = lap (running) or reset (paused), p = laps, q = quit";

/// Prints ticks on a single line, throttled so the terminal keeps up.
struct Terminal {
    print_every: Duration,
    last_print: Mutex<Option<Instant>>,
}

impl StopwatchObserver for Terminal {
    fn on_tick(&self, minutes: &str, seconds: &str, hundredths: &str) {
        let Ok(mut last) = self.last_print.lock() else { return };
        if let Some(printed) = *last {
            if printed.elapsed() < self.print_every {
                return;
            }
        }
        *last = Some(Instant::now());
        print!("\r{minutes}:{seconds}.{hundredths}   ");
        io::stdout().flush().ok();
    }

    fn on_started(&self) {
        println!("\n[running] s: stop, l: lap");
    }

    fn on_stopped(&self) {
        println!("\n[paused] s: resume, l: reset");
    }

    fn on_reset(&self) {
        println!("00:00.00");
    }
}

fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();
}

fn print_laps(engine: &TimingEngine) {
    let list = engine.lap_list();
    let labels = engine.laps();
    if labels.is_empty() {
        println!("no laps");
        return;
    }
    // Most recent first
    for (i, label) in labels.iter().enumerate().rev() {
        let marker = if list.closed().count() < 2 {
            ""
        } else if list.fastest() == Some(i) {
            "  (fastest)"
        } else if list.slowest() == Some(i) {
            "  (slowest)"
        } else {
            ""
        };
        println!("Lap {:2}: {}{}", i + 1, label, marker);
    }
}

/// Returns false once the user asked to quit.
fn handle_command(engine: &TimingEngine, command: &str) -> bool {
    let result = match command {
        "" | "s" => match engine.state() {
            TimerState::Running => engine.stop(),
            TimerState::Idle | TimerState::Paused => engine.start(),
        },
        "l" => match engine.state() {
            TimerState::Running => engine.lap().map(|_| ()),
            TimerState::Paused => engine.reset(),
            TimerState::Idle => Ok(()),
        },
        "p" => {
            print_laps(engine);
            Ok(())
        }
        "q" => {
            if engine.is_running() {
                engine.stop().ok();
            }
            return false;
        }
        other => {
            println!("unknown command {other:?}; {HELP}");
            Ok(())
        }
    };
    if let Err(e) = result {
        tracing::warn!("{e}");
    }
    true
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let config = EngineConfig {
        tick_interval: Duration::from_millis(cli.tick_ms),
        minutes: if cli.wall_clock { MinutesPolicy::WallClock } else { MinutesPolicy::Unbounded },
    };
    let terminal = Arc::new(Terminal {
        print_every: Duration::from_millis(cli.print_every_ms),
        last_print: Mutex::new(None),
    });
    let engine = TimingEngine::new(&terminal, Arc::new(MonotonicClock::new()), config)
        .context("failed to create stopwatch engine")?;
    tracing::info!(tick_ms = cli.tick_ms, "stopwatch ready");

    println!("{HELP}");
    for line in io::stdin().lock().lines() {
        let line = line.context("failed to read from stdin")?;
        if !handle_command(&engine, line.trim()) {
            break;
        }
    }

    print_laps(&engine);
    println!("total {}", stopwatch::format_lap(engine.total_elapsed_ms(), engine.config().minutes));
    Ok(())
}
