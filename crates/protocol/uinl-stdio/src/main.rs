//! Line-delimited JSON host for the UINL engine.
//!
//! Live mode reads one application message per stdin line and ticks the
//! engine on the wall clock. After stdin closes it keeps ticking until no
//! delay, interval or animation remains. Replay mode reads scripted steps instead
//! (`{"receive": ..}`, `{"tick": ms}`, `{"event": {..}}`) and runs on virtual
//! time only. Outbound messages are written to stdout, one per line.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use uinl_core::{Config, Engine, Transport};

#[derive(Parser, Debug)]
#[command(name = "uinl-stdio", version, about = "Run a UINL session over stdin/stdout")]
struct Args {
    /// JSON engine configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Wall-clock tick period in milliseconds (live mode).
    #[arg(long, default_value_t = 16)]
    tick_ms: u64,

    /// Read scripted steps and advance time only on `tick` steps.
    #[arg(long)]
    replay: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ReplayStep {
    Receive(JsonValue),
    Tick(f64),
    Event {
        address: JsonValue,
        name: String,
        value: JsonValue,
    },
}

struct StdoutTransport {
    out: io::Stdout,
    closed: bool,
}

impl StdoutTransport {
    fn new() -> Self {
        Self {
            out: io::stdout(),
            closed: false,
        }
    }

    fn write_line(&mut self, message: &JsonValue) -> io::Result<()> {
        let mut lock = self.out.lock();
        serde_json::to_writer(&mut lock, message)?;
        lock.write_all(b"\n")?;
        lock.flush()
    }
}

impl Transport for StdoutTransport {
    fn send(&mut self, message: JsonValue) {
        if let Err(e) = self.write_line(&message) {
            error!("failed to write outbound message: {e}");
        }
    }

    fn close(&mut self) {
        info!("session closed by engine");
        self.closed = true;
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn parse_line(line: &str) -> Option<JsonValue> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("skipping malformed line: {e}");
            None
        }
    }
}

fn run_replay(engine: &mut Engine<StdoutTransport>) -> Result<()> {
    for (n, line) in io::stdin().lock().lines().enumerate() {
        let line = line.context("reading stdin")?;
        let Some(value) = parse_line(&line) else {
            continue;
        };
        let step: ReplayStep = match serde_json::from_value(value) {
            Ok(step) => step,
            Err(e) => bail!("line {}: not a replay step: {e}", n + 1),
        };
        match step {
            ReplayStep::Receive(message) => engine.receive(message),
            ReplayStep::Tick(ms) => engine.tick(ms),
            ReplayStep::Event {
                address,
                name,
                value,
            } => match engine.find(&address) {
                Some(node) => engine.user_event(node, &name, value),
                None => warn!("line {}: no node at {address}", n + 1),
            },
        }
        if engine.transport().closed {
            break;
        }
    }
    Ok(())
}

/// Nothing left that would change the document without new input.
fn settled<T: Transport>(engine: &Engine<T>) -> bool {
    !engine.scheduler().has_timers() && engine.animator().is_empty()
}

fn run_live(engine: &mut Engine<StdoutTransport>, tick: Duration) -> Result<()> {
    let (tx, rx) = mpsc::channel::<JsonValue>();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if let Some(value) = parse_line(&line) {
                if tx.send(value).is_err() {
                    break;
                }
            }
        }
        debug!("stdin closed");
    });

    let mut input = Some(rx);
    let mut last = Instant::now();
    loop {
        match input.as_ref().map(|rx| rx.recv_timeout(tick)) {
            Some(Ok(message)) => engine.receive(message),
            Some(Err(RecvTimeoutError::Timeout)) => {}
            Some(Err(RecvTimeoutError::Disconnected)) => {
                debug!("input closed; running remaining timers and animations");
                input = None;
            }
            None => {
                if settled(engine) {
                    break;
                }
                thread::sleep(tick);
            }
        }
        let now = Instant::now();
        let elapsed = now.duration_since(last);
        if elapsed >= tick {
            engine.tick(elapsed.as_secs_f64() * 1000.0);
            last = now;
        }
        if engine.transport().closed {
            break;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let args = Args::parse();
    let cfg = load_config(args.config.as_ref())?;
    if args.tick_ms == 0 {
        bail!("--tick-ms must be positive");
    }
    debug!("starting with {cfg:?}");

    let mut engine = Engine::new(cfg, StdoutTransport::new());
    info!("session {}", engine.session());
    if args.replay {
        run_replay(&mut engine)
    } else {
        run_live(&mut engine, Duration::from_millis(args.tick_ms))
    }
}
