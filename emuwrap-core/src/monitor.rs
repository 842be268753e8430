//! モニタのコマンド処理
//!
//! 操作者が入力したコマンドを制御チャネルに送り、応答を表示します。
//! 制御チャネルの実体（名前付きパイプとそれを読むスレッド）は [`ControlPort`] の実装側が持ちます。

use crate::command::Command;
use crate::errors::StreamError;
use crate::line_buffer::{ChunkSource, LineReader};
use crate::parse::parse_address;
use crate::tlb::parse_tlb;
use crate::Result;
use anyhow::Context as _;
use std::io::{self, Write};

/// エミュレータが次のコマンドを受け付けるときのプロンプト
pub const DEFAULT_PROMPT_SENTINEL: &str = "(qemu)";

/// 制御チャネル
pub trait ControlPort {
    /// コマンドを送り、プロンプトが再び現れるまでの応答行を返す
    fn execute_and_read(&self, command: &str) -> Result<Vec<String>>;
}

/// プロンプトが現れるまで行を読む
///
/// プロンプトを含む行は応答に含めません。
pub fn read_until_prompt<S: ChunkSource>(
    reader: &mut LineReader<S>,
    sentinel: &str,
) -> std::result::Result<Vec<String>, StreamError> {
    let mut lines = Vec::new();
    loop {
        let line = reader.read_line()?;
        if line.contains(sentinel) {
            return Ok(lines);
        }
        lines.push(line);
    }
}

/// コマンドループの継続判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// モニタのコマンドを実行する
pub struct MonitorShell<P> {
    port: P,
    /// コマンドラインを開くキー（終了時の案内に使う）
    trigger: char,
}

impl<P: ControlPort> MonitorShell<P> {
    /// シェルを作成する
    pub fn new(port: P, trigger: char) -> Self {
        Self { port, trigger }
    }

    /// 1行分のコマンドを実行し、応答を `out` に書き出す
    pub fn execute(&self, line: &str, out: &mut dyn Write) -> Result<Flow> {
        let Some(command) = Command::parse(line) else {
            return Ok(Flow::Continue);
        };

        match command {
            Command::Exit => {
                self.close(out)?;
                return Ok(Flow::Exit);
            }
            Command::Help(topic) => {
                let request = match topic {
                    Some(topic) => format!("help {}", topic),
                    None => "help".to_string(),
                };
                self.forward(&request, out)?;
            }
            Command::Tlb(address) => self.print_tlb(address.as_deref(), out)?,
            Command::Raw(request) => self.forward(&request, out)?,
        }

        Ok(Flow::Continue)
    }

    /// コマンドラインを閉じる案内を表示する
    ///
    /// カーソルはその行に残し、後続のログ行が次の行から始まるようにします。
    pub fn close(&self, out: &mut dyn Write) -> io::Result<()> {
        write!(out, "Closing cmdline; enter \"{}\" to show it again", self.trigger)?;
        out.flush()
    }

    /// 制御チャネルへの参照を取得
    pub fn port(&self) -> &P {
        &self.port
    }

    /// 制御チャネルを取り出す
    pub fn into_port(self) -> P {
        self.port
    }

    fn forward(&self, request: &str, out: &mut dyn Write) -> Result<()> {
        for line in self.port.execute_and_read(request)? {
            writeln!(out, "{}", line)?;
        }
        Ok(())
    }

    fn print_tlb(&self, address: Option<&str>, out: &mut dyn Write) -> Result<()> {
        let filter = address
            .map(parse_address)
            .transpose()
            .context("tlb expects a hexadecimal address")?;

        let lines = self.port.execute_and_read("info tlb")?;
        for entry in parse_tlb(&lines, filter) {
            writeln!(out, "{}", entry)?;
        }
        Ok(())
    }
}
