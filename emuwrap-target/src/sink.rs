//! 整形済み行の出力先

use emuwrap_core::RenderedLine;
use std::io::{self, Write};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// 出力先が一時的に書き込めないときの待ち時間
const RETRY_DELAY: Duration = Duration::from_millis(1);

/// 整形済みの行を書き出す
///
/// 改行は行の先頭に置きます。カーソルは常に最後の行の末尾に残るため、
/// 継続行は前の行にそのまま連結されます。
pub struct LineSink<W: Write> {
    out: W,
}

impl<W: Write> LineSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// 1行を書き出してフラッシュする
    ///
    /// 書き込みに失敗しても呼び出し元には返さず、その行を捨てます。
    pub fn emit(&mut self, line: &RenderedLine) {
        let text = if line.continuation {
            line.text.clone()
        } else {
            format!("\n{}", line.text)
        };
        self.write_all(text.as_bytes());
    }

    /// セッションの最後に改行を出す
    pub fn finish(&mut self) {
        self.write_all(b"\n");
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_all(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            match self.out.write(data) {
                Ok(0) => {
                    debug!("sink: output closed, dropping {} bytes", data.len());
                    return;
                }
                Ok(n) => data = &data[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(RETRY_DELAY),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("sink: write failed: {}", e);
                    return;
                }
            }
        }

        if let Err(e) = self.out.flush() {
            debug!("sink: flush failed: {}", e);
        }
    }
}
