//! 行の整形
//!
//! 分類した行をセッションの状態に応じて装飾し、端末に出力する行に変換します。
//! 状態への副作用はフレーム番号とユーザー空間のバイナリの更新だけです。

use crate::classify::{LineClassifier, LineKind, LogRecord, RecordBody};
use crate::context::{CapturedFailure, SessionContext};
use crate::resolver::ResolvedFrame;
use crate::Result;
use anyhow::Context as _;
use std::path::Path;

/// ANSIエスケープシーケンス
pub mod color {
    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const BLUE: &str = "\x1b[34m";
    pub const MAGENTA: &str = "\x1b[35m";
    pub const GREY: &str = "\x1b[38;5;245m";
    pub const CLEAR: &str = "\x1b[0m";
}

/// ログレベルごとの色
const LEVEL_COLORS: [&str; 8] = [
    "",
    color::GREY,
    color::BLUE,
    color::BLUE,
    color::YELLOW,
    color::RED,
    color::RED,
    color::MAGENTA,
];

/// ログレベルに対応する色（未知のレベルは装飾なし）
pub fn level_color(level: u16) -> &'static str {
    LEVEL_COLORS
        .get(usize::from(level))
        .copied()
        .unwrap_or(color::CLEAR)
}

/// 文字列を色で囲む
pub fn color_wrap(text: &str, color: &str) -> String {
    format!("{}{}{}", color, text, color::CLEAR)
}

/// 出力する1行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedLine {
    pub text: String,
    /// 前の行に続けて出力する（改行しない）
    pub continuation: bool,
}

impl RenderedLine {
    /// 新しい行
    pub fn line(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            continuation: false,
        }
    }

    /// 前の行の続き
    pub fn continuation(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            continuation: true,
        }
    }
}

/// gdbのバックトレースと同じ形式のフレーム行
pub fn frame_line(number: usize, address: &str, frame: &ResolvedFrame) -> String {
    [
        format!("#{} ", number),
        color_wrap(address, color::BLUE),
        " in ".to_string(),
        color_wrap(&frame.function, color::YELLOW),
        " at ".to_string(),
        color_wrap(&frame.file, color::GREEN),
        format!(":{}", frame.line),
    ]
    .concat()
}

/// タイムスタンプのプレフィックス
fn timestamp_prefix(timestamp: Option<&str>) -> String {
    match timestamp {
        Some(ts) => format!("{}[{:>14}] {}", color::GREEN, ts, color::CLEAR),
        None => String::new(),
    }
}

/// 行を分類して整形する
pub struct Formatter {
    classifier: LineClassifier,
}

impl Formatter {
    /// 整形器を作成する
    pub fn new() -> Result<Self> {
        Ok(Self {
            classifier: LineClassifier::new()?,
        })
    }

    /// 行を分類し、出力する行に変換する
    ///
    /// 解決の失敗などはすべてここで捕捉され、呼び出し元には伝播しません。
    pub fn classify_and_render(&self, line: &str, ctx: &mut SessionContext) -> Vec<RenderedLine> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let kind = self.classifier.classify(line);

        if !matches!(kind, LineKind::Continuation(_)) {
            if let Some(name) = self.classifier.task_name(line) {
                let binary = ctx.config().userspace_binary(&format!("/bin/{}", name));
                ctx.set_active_binary(binary);
            }
        }

        match kind {
            LineKind::Continuation(rest) => vec![RenderedLine::continuation(rest)],
            LineKind::Record(record) => self.render_record(&record, ctx),
            LineKind::KernelFrame { timestamp, address } => {
                let binary = ctx.binary_for_kernel_frame(address);
                render_frames(timestamp, address, &binary, ctx)
            }
            LineKind::Passthrough(text) => vec![RenderedLine::line(text)],
        }
    }

    fn render_record(&self, record: &LogRecord<'_>, ctx: &mut SessionContext) -> Vec<RenderedLine> {
        if record.starts_backtrace {
            ctx.reset_frames();
        }

        let timestamp = Some(record.timestamp);

        match record.body {
            RecordBody::UserFrame { address, path } => {
                if ctx.config().lacks_symbols(path) {
                    let number = ctx.next_frame();
                    let text = frame_line(number, address, &ResolvedFrame::unknown());
                    return vec![RenderedLine::line(timestamp_prefix(timestamp) + &text)];
                }
                let binary = ctx.config().userspace_binary(path);
                render_frames(timestamp, address, &binary, ctx)
            }
            RecordBody::KernelFrame { address } => {
                let binary = ctx.binary_for_kernel_frame(address);
                render_frames(timestamp, address, &binary, ctx)
            }
            RecordBody::Text => vec![RenderedLine::line(format!(
                "{}[{:>14}] {}{}",
                color::GREEN,
                record.timestamp,
                level_color(record.level),
                record.content
            ))],
        }
    }
}

/// アドレスを解決してフレーム行に変換する
///
/// 失敗した場合は内部エラーとして捕捉し、通知の行と不明なフレームの行を返します。
fn render_frames(
    timestamp: Option<&str>,
    address: &str,
    binary: &Path,
    ctx: &mut SessionContext,
) -> Vec<RenderedLine> {
    let prefix = timestamp_prefix(timestamp);

    let resolved = ctx
        .resolve(binary, address)
        .with_context(|| format!("Failed to resolve {} in {}", address, binary.display()));

    match resolved {
        Ok(frames) => frames
            .iter()
            .map(|frame| {
                let number = ctx.next_frame();
                RenderedLine::line(format!("{}{}", prefix, frame_line(number, address, frame)))
            })
            .collect(),
        Err(err) => {
            let id = ctx.capture(err);
            let number = ctx.next_frame();
            vec![
                RenderedLine::line(format!(
                    ">> internal exception #{} encountered for {} at {}",
                    id,
                    binary.display(),
                    address
                )),
                RenderedLine::line(format!(
                    "{}{}",
                    prefix,
                    frame_line(number, address, &ResolvedFrame::unknown())
                )),
            ]
        }
    }
}

/// セッション終了時に表示する内部エラーの一覧
pub fn render_failure_report(failures: &[CapturedFailure]) -> Vec<String> {
    if failures.is_empty() {
        return Vec::new();
    }

    let mut lines = vec![color_wrap("Internal exceptions:", color::RED)];
    for failure in failures {
        lines.push(color_wrap(&format!("Exception #{}:", failure.id), color::RED));
        lines.extend(failure.detail.lines().map(|line| format!(">>>> {}", line)));
    }
    lines
}
