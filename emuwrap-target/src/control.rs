//! エミュレータのモニタへの制御チャネル
//!
//! QEMU の `-monitor pipe:<base>` が作る名前付きパイプ `<base>.in` / `<base>.out` を使います。
//! パイプのオープンと読み取りはブロックするため、専用のワーカースレッドで行い、
//! コマンドと応答はチャネルで受け渡します。

use crate::stream::FdSource;
use crate::Result;
use anyhow::{anyhow, Context as _};
use emuwrap_core::config::{DEFAULT_POLL_TIMEOUT, DEFAULT_READ_SIZE};
use emuwrap_core::monitor::{read_until_prompt, DEFAULT_PROMPT_SENTINEL};
use emuwrap_core::{ControlPort, LineReader};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// ワーカーから返る応答（エラーはメッセージとして運ぶ）
type Response = std::result::Result<Vec<String>, String>;

/// モニタの設定
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// 名前付きパイプのベースパス
    pub pipe_base: PathBuf,
    /// コマンドラインを開くキー
    pub trigger: char,
    /// エミュレータのプロンプト
    pub prompt: String,
    /// 操作端末のデバイス
    pub tty: PathBuf,
    pub poll_timeout: Duration,
    pub read_size: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            pipe_base: PathBuf::from("qemumon"),
            trigger: ':',
            prompt: DEFAULT_PROMPT_SENTINEL.to_string(),
            tty: PathBuf::from("/dev/tty"),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            read_size: DEFAULT_READ_SIZE,
        }
    }
}

impl MonitorConfig {
    /// コマンドを書き込むパイプ
    pub fn input_pipe(&self) -> PathBuf {
        with_suffix(&self.pipe_base, ".in")
    }

    /// 応答を読むパイプ
    pub fn output_pipe(&self) -> PathBuf {
        with_suffix(&self.pipe_base, ".out")
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut path = OsString::from(base.as_os_str());
    path.push(suffix);
    PathBuf::from(path)
}

/// 制御チャネル
pub struct ControlChannel {
    requests: Sender<String>,
    responses: Receiver<Response>,
    connected: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

impl ControlChannel {
    /// ワーカースレッドを起動する
    ///
    /// パイプへの接続はワーカー側で行うので、エミュレータがまだパイプを開いていなくても戻ります。
    pub fn spawn(config: MonitorConfig) -> Result<Self> {
        let (requests, request_rx) = mpsc::channel();
        let (response_tx, responses) = mpsc::channel();
        let connected = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&connected);
        let worker = thread::Builder::new()
            .name("emuwrap-control".to_string())
            .spawn(move || run_worker(config, request_rx, response_tx, flag))
            .context("Failed to start control channel thread")?;

        Ok(Self {
            requests,
            responses,
            connected,
            worker,
        })
    }

    /// エミュレータのプロンプトを受け取り、コマンドを受け付けられる状態か
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// チャネルを閉じる
    ///
    /// 接続済みならワーカーの終了を待ちます。未接続のワーカーはパイプのオープンで
    /// 止まっている可能性があるため、待たずに切り離します。
    pub fn close(self) {
        let Self {
            requests,
            connected,
            worker,
            ..
        } = self;
        drop(requests);

        if connected.load(Ordering::SeqCst) {
            if worker.join().is_err() {
                warn!("control channel thread panicked");
            }
        } else {
            debug!("control: detaching unconnected worker");
        }
    }
}

impl ControlPort for ControlChannel {
    fn execute_and_read(&self, command: &str) -> Result<Vec<String>> {
        self.requests
            .send(command.to_string())
            .map_err(|_| anyhow!("Control channel is closed"))?;

        let response = self
            .responses
            .recv()
            .map_err(|_| anyhow!("Control channel is closed"))?;
        response.map_err(|message| anyhow!(message))
    }
}

fn run_worker(
    config: MonitorConfig,
    requests: Receiver<String>,
    responses: Sender<Response>,
    connected: Arc<AtomicBool>,
) {
    let (mut input, mut reader) = match connect(&config) {
        Ok(pair) => pair,
        Err(e) => {
            warn!("control channel unavailable: {:#}", e);
            let message = format!("{:#}", e);
            for _ in requests {
                if responses.send(Err(message.clone())).is_err() {
                    break;
                }
            }
            return;
        }
    };
    connected.store(true, Ordering::SeqCst);
    debug!("control: connected to {}", config.pipe_base.display());

    for command in requests {
        let result = exchange(&mut input, &mut reader, &command, &config.prompt)
            .map_err(|e| format!("{:#}", e));
        if responses.send(result).is_err() {
            break;
        }
    }
    debug!("control: worker exiting");
}

/// パイプを開き、最初のプロンプトまで読み捨てる
fn connect(config: &MonitorConfig) -> Result<(File, LineReader<FdSource<File>>)> {
    let input_path = config.input_pipe();
    let input = OpenOptions::new()
        .write(true)
        .open(&input_path)
        .with_context(|| format!("Failed to open {}", input_path.display()))?;

    let output_path = config.output_pipe();
    let output = File::open(&output_path)
        .with_context(|| format!("Failed to open {}", output_path.display()))?;

    let mut reader = LineReader::new(FdSource::new(output), config.poll_timeout, config.read_size);
    let banner = read_until_prompt(&mut reader, &config.prompt)
        .context("Control channel closed before the first prompt")?;
    debug!("control: discarded {} banner lines", banner.len());

    Ok((input, reader))
}

fn exchange(
    input: &mut File,
    reader: &mut LineReader<FdSource<File>>,
    command: &str,
    prompt: &str,
) -> Result<Vec<String>> {
    debug!("control: sending {:?}", command);
    writeln!(input, "{}", command).context("Failed to write to control channel")?;
    input.flush()?;

    let lines = read_until_prompt(reader, prompt)
        .with_context(|| format!("No response to '{}'", command))?;
    Ok(lines)
}
