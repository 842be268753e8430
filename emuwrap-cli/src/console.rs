//! ログ表示のメインループ

use emuwrap_core::{ChunkSource, Formatter, LineReader, RenderedLine, SessionContext, StreamError};
use emuwrap_target::LineSink;
use std::io::Write;
use tracing::{debug, warn};

/// 連続してこの回数だけ読み取りに失敗したら諦める
const MAX_CONSECUTIVE_FAILURES: usize = 16;

/// ストリームの終端までログを読み、整形して出力する
///
/// 読み取りエラーはセッションに記録して続行します。
/// 戻り値は処理した行数です。
pub fn run_event_loop<S, W>(
    reader: &mut LineReader<S>,
    formatter: &Formatter,
    ctx: &mut SessionContext,
    sink: &mut LineSink<W>,
) -> usize
where
    S: ChunkSource,
    W: Write,
{
    let mut processed = 0;
    let mut failures = 0;

    loop {
        match reader.read_line() {
            Ok(line) => {
                failures = 0;
                processed += 1;
                for rendered in formatter.classify_and_render(&line, ctx) {
                    sink.emit(&rendered);
                }
            }
            Err(StreamError::Eof) => {
                debug!("console: end of stream after {} lines", processed);
                break;
            }
            Err(StreamError::Io(e)) => {
                let id = ctx.capture(anyhow::Error::new(e).context("Failed to read line"));
                sink.emit(&RenderedLine::line(format!(
                    ">> internal exception #{} encountered when reading line",
                    id
                )));

                failures += 1;
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    warn!("giving up after {} consecutive read failures", failures);
                    break;
                }
            }
        }
    }

    processed
}
