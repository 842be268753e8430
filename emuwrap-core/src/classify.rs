//! ログ行の分類

use crate::Result;
use regex::Regex;

/// 継続行のプレフィックス
pub const CONTINUATION_PREFIX: char = ' ';

/// バックトレースの開始を示す文字列
pub const BACKTRACE_MARKER: &str = "backtrace:";

/// 論理行の種類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind<'a> {
    /// 前の行の続き（プレフィックスを除いた残り）
    Continuation(&'a str),
    /// `level,sequence,timestamp;content` 形式のログレコード
    Record(LogRecord<'a>),
    /// 構造化されていない行に含まれる `[<addr>]` 形式のフレーム
    KernelFrame {
        /// 行頭の `[   secs.frac]` から取り出したタイムスタンプ
        timestamp: Option<&'a str>,
        address: &'a str,
    },
    /// 認識できない行（そのまま出力する）
    Passthrough(&'a str),
}

/// 構造化されたログレコード
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord<'a> {
    pub level: u16,
    pub sequence: Option<u64>,
    pub timestamp: &'a str,
    pub content: &'a str,
    /// 内容に `backtrace:` が含まれる
    pub starts_backtrace: bool,
    pub body: RecordBody<'a>,
}

/// ログレコードの内容の種類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordBody<'a> {
    /// `USER:<addr> <addr> <path>:` 形式のユーザー空間のフレーム
    UserFrame { address: &'a str, path: &'a str },
    /// `[<addr>]` 形式のカーネルのフレーム
    KernelFrame { address: &'a str },
    /// 通常のテキスト
    Text,
}

/// 行の分類器
pub struct LineClassifier {
    /// `level,sequence,timestamp;content`
    record_pattern: Regex,
    /// `USER:<addr> <addr> <path>:`
    user_frame_pattern: Regex,
    /// `[<addr>]`
    kernel_frame_pattern: Regex,
    /// 行頭のカーネルのタイムスタンプ `[    2.767291]`
    timestamp_pattern: Regex,
    /// `/bin/<name>[<pid>]:`
    task_pattern: Regex,
}

impl LineClassifier {
    /// 分類器を作成する
    pub fn new() -> Result<Self> {
        Ok(Self {
            record_pattern: Regex::new(r"^([0-9]{1,3}),([0-9]*),([0-9]*\.[0-9]*);(.*)$")?,
            user_frame_pattern: Regex::new(r"USER:([x0-9a-f]*) ([x0-9a-f]*) (.*):")?,
            kernel_frame_pattern: Regex::new(r"\[<([xX0-9a-fA-F]+)>")?,
            timestamp_pattern: Regex::new(r"^\[\s*([0-9]+\.[0-9]+)\]")?,
            task_pattern: Regex::new(r"/bin/(.*)\[[0-9]*\]:")?,
        })
    }

    /// 行を分類する（最初に一致した種類を返す）
    pub fn classify<'a>(&self, line: &'a str) -> LineKind<'a> {
        if let Some(rest) = line.strip_prefix(CONTINUATION_PREFIX) {
            return LineKind::Continuation(rest);
        }

        if let Some(record) = self.parse_record(line) {
            return LineKind::Record(record);
        }

        if let Some(address) = self.kernel_frame_address(line) {
            let timestamp = self
                .timestamp_pattern
                .captures(line)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str());
            return LineKind::KernelFrame { timestamp, address };
        }

        LineKind::Passthrough(line)
    }

    /// 行に含まれるユーザー空間のプログラム名（`/bin/<name>[<pid>]:` の `<name>`）
    pub fn task_name<'a>(&self, line: &'a str) -> Option<&'a str> {
        self.task_pattern
            .captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    fn parse_record<'a>(&self, line: &'a str) -> Option<LogRecord<'a>> {
        let caps = self.record_pattern.captures(line)?;
        let level = caps.get(1)?.as_str().parse().ok()?;
        let sequence = caps.get(2)?.as_str().parse().ok();
        let timestamp = caps.get(3)?.as_str();
        let content = caps.get(4)?.as_str();

        let body = if let Some(user) = self.user_frame_pattern.captures(content) {
            RecordBody::UserFrame {
                address: user.get(2)?.as_str(),
                path: user.get(3)?.as_str(),
            }
        } else if let Some(address) = self.kernel_frame_address(content) {
            RecordBody::KernelFrame { address }
        } else {
            RecordBody::Text
        };

        Some(LogRecord {
            level,
            sequence,
            timestamp,
            content,
            starts_backtrace: content.contains(BACKTRACE_MARKER),
            body,
        })
    }

    fn kernel_frame_address<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.kernel_frame_pattern
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> LineClassifier {
        LineClassifier::new().unwrap()
    }

    #[test]
    fn test_continuation() {
        let c = classifier();
        assert_eq!(c.classify(" more text"), LineKind::Continuation("more text"));
    }

    #[test]
    fn test_plain_record() {
        let c = classifier();
        let kind = c.classify("2,10,1.234;boot ok");
        assert_eq!(
            kind,
            LineKind::Record(LogRecord {
                level: 2,
                sequence: Some(10),
                timestamp: "1.234",
                content: "boot ok",
                starts_backtrace: false,
                body: RecordBody::Text,
            })
        );
    }

    #[test]
    fn test_backtrace_record() {
        let c = classifier();
        match c.classify("5,11,2.000;backtrace:") {
            LineKind::Record(record) => assert!(record.starts_backtrace),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_user_frame_record() {
        let c = classifier();
        match c.classify("5,12,2.100;USER:0xbfffee10 0x0804a2b0 /bin/sh:") {
            LineKind::Record(record) => assert_eq!(
                record.body,
                RecordBody::UserFrame {
                    address: "0x0804a2b0",
                    path: "/bin/sh",
                }
            ),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_kernel_frame_in_record() {
        let c = classifier();
        match c.classify("5,13,2.200;[<0xc0101234>] do_exit+0x10/0x40") {
            LineKind::Record(record) => {
                assert_eq!(record.body, RecordBody::KernelFrame { address: "0xc0101234" })
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_unstructured_kernel_frame() {
        let c = classifier();
        assert_eq!(
            c.classify("[       2.767291] [<0x0000baf2>] __libc_strcspn+0x52/0x94"),
            LineKind::KernelFrame {
                timestamp: Some("2.767291"),
                address: "0x0000baf2",
            }
        );
        assert_eq!(
            c.classify("[<0x00001000>]"),
            LineKind::KernelFrame {
                timestamp: None,
                address: "0x00001000",
            }
        );
    }

    #[test]
    fn test_passthrough() {
        let c = classifier();
        assert_eq!(c.classify("(qemu) "), LineKind::Passthrough("(qemu) "));
        assert_eq!(c.classify("\x1b[2J"), LineKind::Passthrough("\x1b[2J"));
        assert_eq!(c.classify(""), LineKind::Passthrough(""));
        // 形式が崩れたレコード
        assert_eq!(c.classify("2,10;boot"), LineKind::Passthrough("2,10;boot"));
    }

    #[test]
    fn test_task_name() {
        let c = classifier();
        assert_eq!(c.task_name("4,20,3.0;/bin/init[1]: started"), Some("init"));
        assert_eq!(c.task_name("no task here"), None);
    }
}
