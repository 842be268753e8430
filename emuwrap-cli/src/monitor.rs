//! モニタのコマンドライン
//!
//! 端末からトリガーキーを待ち、押されたら端末を元のモードに戻してコマンドループを実行します。

use anyhow::Context as _;
use emuwrap_core::command;
use emuwrap_core::{ControlPort, Flow, MonitorShell};
use emuwrap_target::{ControlChannel, ModeControl, TerminalModes, Tty};
use rustyline::completion::Completer;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Editor, Helper};
use std::io::{self, Write};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// コマンドラインのプロンプト
pub const PROMPT: &str = "monitor> ";

/// 履歴ファイル名（ホームディレクトリ直下）
const HISTORY_FILE: &str = ".emuwrap_history";

/// コマンド名の補完
#[derive(Default)]
pub struct MonitorHelper;

impl Completer for MonitorHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        Ok(command::complete(line, pos))
    }
}

impl Hinter for MonitorHelper {
    type Hint = String;
}

impl Highlighter for MonitorHelper {}

impl Validator for MonitorHelper {}

impl Helper for MonitorHelper {}

/// 1行ずつコマンドを読む入力
pub trait CommandEditor {
    fn read_command(&mut self, prompt: &str) -> rustyline::Result<String>;

    /// 履歴に追加する
    fn remember(&mut self, line: &str);
}

impl<H: Helper> CommandEditor for Editor<H, DefaultHistory> {
    fn read_command(&mut self, prompt: &str) -> rustyline::Result<String> {
        self.readline(prompt)
    }

    fn remember(&mut self, line: &str) {
        if let Err(e) = self.add_history_entry(line) {
            debug!("monitor: failed to add history entry: {}", e);
        }
    }
}

/// `exit`、Ctrl-D、Ctrl-C のいずれかまでコマンドを実行する
///
/// コマンドの失敗は表示して続行します。
pub fn command_loop<P, E>(shell: &MonitorShell<P>, editor: &mut E, out: &mut dyn Write) -> anyhow::Result<()>
where
    P: ControlPort,
    E: CommandEditor,
{
    writeln!(out, " ")?;

    loop {
        match editor.read_command(PROMPT) {
            Ok(line) => {
                let line = line.trim();
                if !line.is_empty() {
                    editor.remember(line);
                }

                match shell.execute(line, out) {
                    Ok(Flow::Exit) => return Ok(()),
                    Ok(Flow::Continue) => {}
                    Err(e) => writeln!(out, "Error: {:#}", e)?,
                }
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                shell.close(out)?;
                return Ok(());
            }
            Err(e) => {
                shell.close(out)?;
                return Err(e).context("Failed to read command");
            }
        }
    }
}

/// 端末を元のモードに戻してコマンドループを実行する
///
/// ループをどのように抜けても、端末はログ表示用のモードに戻ります。
pub fn run_session<T, P, E>(
    modes: &TerminalModes<T>,
    shell: &MonitorShell<P>,
    editor: &mut E,
    out: &mut dyn Write,
) -> anyhow::Result<()>
where
    T: ModeControl,
    P: ControlPort,
    E: CommandEditor,
{
    let _scope = modes.cooked()?;
    command_loop(shell, editor, out)
}

/// トリガーキーを待つスレッドを起動する
pub fn spawn_monitor(
    modes: TerminalModes<Tty>,
    channel: ControlChannel,
    trigger: char,
) -> anyhow::Result<JoinHandle<()>> {
    let trigger_byte =
        u8::try_from(trigger).context("Trigger key must be a single-byte character")?;

    let handle = thread::Builder::new()
        .name("emuwrap-monitor".to_string())
        .spawn(move || {
            if let Err(e) = watch_trigger(&modes, channel, trigger, trigger_byte) {
                warn!("monitor stopped: {:#}", e);
            }
        })
        .context("Failed to start monitor thread")?;
    Ok(handle)
}

fn watch_trigger(
    modes: &TerminalModes<Tty>,
    channel: ControlChannel,
    trigger: char,
    trigger_byte: u8,
) -> anyhow::Result<()> {
    let shell = MonitorShell::new(channel, trigger);
    let mut editor = Editor::<MonitorHelper, DefaultHistory>::new()?;
    editor.set_helper(Some(MonitorHelper));

    let history = history_path();
    if let Some(path) = &history {
        if editor.load_history(path).is_err() {
            debug!("monitor: no history at {}", path.display());
        }
    }

    while let Some(key) = modes.control().read_key()? {
        if key != trigger_byte {
            continue;
        }

        let mut stdout = io::stdout();
        if let Err(e) = run_session(modes, &shell, &mut editor, &mut stdout) {
            warn!("command line failed: {:#}", e);
        }

        if let Some(path) = &history {
            if let Err(e) = editor.save_history(path) {
                debug!("monitor: failed to save history: {}", e);
            }
        }
    }

    debug!("monitor: terminal closed");
    shell.into_port().close();
    Ok(())
}

fn history_path() -> Option<PathBuf> {
    home::home_dir().map(|home| home.join(HISTORY_FILE))
}
