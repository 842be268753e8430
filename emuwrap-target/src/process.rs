//! エミュレータプロセスの制御

use crate::Result;
use anyhow::Context as _;
use std::io::{self, Read};
use std::os::fd::{AsFd, BorrowedFd};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use tracing::{debug, warn};

/// エミュレータの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulatorKind {
    /// QEMU（ログは標準出力、モニタあり）
    Qemu,
    /// 86Box（ログは標準エラー出力、モニタなし）
    Box86,
    /// その他（ログは標準出力、モニタなし）
    Generic,
}

/// ログを出力するストリーム
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl EmulatorKind {
    /// プログラム名から種類を判定する
    pub fn detect(program: &str) -> Self {
        if program.contains("qemu") {
            EmulatorKind::Qemu
        } else if program.contains("86Box") {
            EmulatorKind::Box86
        } else {
            EmulatorKind::Generic
        }
    }

    /// ログを出力するストリーム
    pub fn log_stream(self) -> LogStream {
        match self {
            EmulatorKind::Qemu | EmulatorKind::Generic => LogStream::Stdout,
            EmulatorKind::Box86 => LogStream::Stderr,
        }
    }

    /// 制御チャネル（モニタ）を持つか
    pub fn has_monitor(self) -> bool {
        matches!(self, EmulatorKind::Qemu)
    }
}

/// エミュレータのログ出力
pub enum EmulatorOutput {
    Stdout(ChildStdout),
    Stderr(ChildStderr),
}

impl Read for EmulatorOutput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            EmulatorOutput::Stdout(out) => out.read(buf),
            EmulatorOutput::Stderr(err) => err.read(buf),
        }
    }
}

impl AsFd for EmulatorOutput {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            EmulatorOutput::Stdout(out) => out.as_fd(),
            EmulatorOutput::Stderr(err) => err.as_fd(),
        }
    }
}

/// 実行中のエミュレータ
pub struct Emulator {
    child: Child,
    kind: EmulatorKind,
    output: Option<EmulatorOutput>,
}

impl Emulator {
    /// エミュレータを起動する
    ///
    /// `raw` が真の場合、ログのストリームは端末にそのまま出力され、取り出せません。
    /// エミュレータの標準入力は閉じておきます（端末はモニタが使うため）。
    pub fn spawn(args: &[String], raw: bool) -> Result<Self> {
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("No emulator command given"))?;

        let kind = EmulatorKind::detect(program);
        if kind == EmulatorKind::Generic {
            warn!("unknown emulator '{}', reading its log from stdout without a monitor", program);
        }

        let mut command = Command::new(program);
        command.args(rest).stdin(Stdio::null());

        if !raw {
            match kind.log_stream() {
                LogStream::Stdout => command.stdout(Stdio::piped()),
                LogStream::Stderr => command.stderr(Stdio::piped()),
            };
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to start emulator '{}'", program))?;
        debug!("spawned {:?} emulator with pid {}", kind, child.id());

        let output = if raw {
            None
        } else {
            match kind.log_stream() {
                LogStream::Stdout => child.stdout.take().map(EmulatorOutput::Stdout),
                LogStream::Stderr => child.stderr.take().map(EmulatorOutput::Stderr),
            }
        };

        Ok(Self { child, kind, output })
    }

    /// エミュレータの種類
    pub fn kind(&self) -> EmulatorKind {
        self.kind
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// ログ出力を取り出す（2回目以降は `None`）
    pub fn take_output(&mut self) -> Option<EmulatorOutput> {
        self.output.take()
    }

    /// エミュレータの終了を待つ
    pub fn wait(&mut self) -> Result<ExitStatus> {
        // 読まれないままのパイプが残っていると終了できないことがあるので先に閉じる
        self.output = None;
        let status = self.child.wait().context("Failed to wait for emulator")?;
        debug!("emulator exited with {}", status);
        Ok(status)
    }
}
