//! emuwrap CLI - エミュレータのコンソールフロントエンド
//!
//! エミュレータを起動し、そのログを整形して表示します。
//! QEMU の場合はトリガーキーでモニタのコマンドラインを開けます。

mod console;
mod monitor;

use anyhow::{Context as _, Result};
use clap::Parser;
use emuwrap_core::config::{DEFAULT_POLL_TIMEOUT, DEFAULT_READ_SIZE};
use emuwrap_core::monitor::DEFAULT_PROMPT_SENTINEL;
use emuwrap_core::parse::parse_address;
use emuwrap_core::render::render_failure_report;
use emuwrap_core::{Formatter, LineReader, SessionConfig, SessionContext};
use emuwrap_target::{
    ControlChannel, Emulator, FdSource, LineSink, MonitorConfig, RestoreOnDrop, TerminalModes, Tty,
};
use nix::sys::signal::{signal, SigHandler, Signal};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// emuwrap - console front-end for OS emulators
#[derive(Parser)]
#[command(name = "emuwrap")]
#[command(version)]
#[command(about = "Colorizes emulator logs, resolves backtraces and opens the emulator monitor", long_about = None)]
struct Cli {
    /// Don't process lines; the emulator writes to the terminal directly
    #[arg(long)]
    raw: bool,

    /// Kernel binary used to resolve kernel addresses
    #[arg(long, env = "EMUWRAP_KERNEL", default_value = "system")]
    kernel: PathBuf,

    /// Prefix prepended to userspace binary paths
    #[arg(long, env = "EMUWRAP_SYSROOT", default_value = "mnt")]
    sysroot: String,

    /// Addresses at or above this (hex) belong to the kernel; below it to the active binary
    #[arg(long, env = "EMUWRAP_KERNEL_BASE", value_parser = parse_address)]
    kernel_base: Option<u64>,

    /// Substring in a userspace path meaning "no symbols available"
    #[arg(long, env = "EMUWRAP_NO_SYMBOLS_MARKER", default_value = "[")]
    no_symbols_marker: String,

    /// Program used to resolve addresses
    #[arg(long, env = "EMUWRAP_ADDR2LINE", default_value = "addr2line")]
    addr2line: PathBuf,

    /// Idle time in milliseconds before a partial line is shown
    #[arg(long, env = "EMUWRAP_POLL_MS", default_value_t = DEFAULT_POLL_TIMEOUT.as_millis() as u64)]
    poll_ms: u64,

    /// Base path of the monitor pipes (<base>.in / <base>.out)
    #[arg(long, env = "EMUWRAP_MONITOR_PIPE", default_value = "qemumon")]
    monitor_pipe: PathBuf,

    /// Key that opens the monitor command line
    #[arg(long, env = "EMUWRAP_TRIGGER", default_value_t = ':', value_parser = parse_trigger)]
    trigger: char,

    /// Prompt printed by the emulator monitor
    #[arg(long, env = "EMUWRAP_PROMPT", default_value = DEFAULT_PROMPT_SENTINEL)]
    prompt: String,

    /// Terminal device read for the trigger key
    #[arg(long, env = "EMUWRAP_TTY", default_value = "/dev/tty")]
    tty: PathBuf,

    /// Enable debug logging (overridden by EMUWRAP_LOG)
    #[arg(short, long)]
    verbose: bool,

    /// Emulator command line
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    emulator: Vec<String>,
}

impl Cli {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            kernel_binary: self.kernel.clone(),
            sysroot: self.sysroot.clone(),
            kernel_threshold: self.kernel_base,
            no_symbols_marker: self.no_symbols_marker.clone(),
            resolver: self.addr2line.clone(),
            poll_timeout: Duration::from_millis(self.poll_ms),
            read_size: DEFAULT_READ_SIZE,
        }
    }

    fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            pipe_base: self.monitor_pipe.clone(),
            trigger: self.trigger,
            prompt: self.prompt.clone(),
            tty: self.tty.clone(),
            poll_timeout: Duration::from_millis(self.poll_ms),
            read_size: DEFAULT_READ_SIZE,
        }
    }
}

fn parse_trigger(value: &str) -> Result<char> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii() => Ok(c),
        _ => Err(anyhow::anyhow!("trigger must be a single ASCII character")),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("EMUWRAP_LOG").unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut emulator = Emulator::spawn(&cli.emulator, cli.raw)?;
    info!("started {:?} emulator (pid {})", emulator.kind(), emulator.pid());

    let modes = open_terminal(&cli);
    let _restore = modes.as_ref().map(RestoreOnDrop::new);

    if emulator.kind().has_monitor() {
        match &modes {
            Some(modes) => start_monitor(&cli, modes)?,
            None => warn!("no terminal available, monitor disabled"),
        }
    }

    // Ctrl-C はエミュレータにだけ届ける
    unsafe { signal(Signal::SIGINT, SigHandler::SigIgn) }.context("Failed to ignore SIGINT")?;

    let config = cli.session_config();
    let mut ctx = SessionContext::with_addr2line(config.clone());
    let mut sink = LineSink::new(io::stdout());

    if let Some(output) = emulator.take_output() {
        let formatter = Formatter::new()?;
        let mut reader = LineReader::new(FdSource::new(output), config.poll_timeout, config.read_size);
        let processed = console::run_event_loop(&mut reader, &formatter, &mut ctx, &mut sink);
        debug!("processed {} lines", processed);
    }

    let status = emulator.wait()?;
    sink.finish();
    if !status.success() {
        println!("Emulator exited with {}", status);
    }

    for line in render_failure_report(ctx.failures()) {
        println!("{}", line);
    }

    Ok(())
}

/// 端末を開いてログ表示用のモードにする
fn open_terminal(cli: &Cli) -> Option<TerminalModes<Tty>> {
    let modes = Tty::open(&cli.tty).and_then(TerminalModes::capture);
    match modes {
        Ok(modes) => match modes.enter_quiet() {
            Ok(()) => Some(modes),
            Err(e) => {
                warn!("{:#}", e);
                None
            }
        },
        Err(e) => {
            warn!("{:#}", e);
            None
        }
    }
}

/// 制御チャネルとトリガーキーを待つスレッドを起動する
fn start_monitor(cli: &Cli, modes: &TerminalModes<Tty>) -> Result<()> {
    let config = cli.monitor_config();
    let tty = modes.control().try_clone()?;
    let monitor_modes = TerminalModes::with_original(tty, modes.original().clone());

    let channel = ControlChannel::spawn(config.clone())?;
    monitor::spawn_monitor(monitor_modes, channel, config.trigger)?;
    debug!("monitor ready on {}", config.pipe_base.display());
    Ok(())
}
