//! emuwrap のコア機能
//!
//! このクレートは、エミュレータのコンソール出力を整形するための中核となるロジックを提供します。
//! 生のバイト列からの行の再構成、ログ行の分類と装飾、バックトレースのアドレス解決、
//! モニタコマンドの処理を行います。端末やプロセスには直接触れません。

pub mod classify;
pub mod command;
pub mod config;
pub mod context;
pub mod errors;
pub mod line_buffer;
pub mod monitor;
pub mod parse;
pub mod render;
pub mod resolver;
pub mod tlb;

pub use classify::{LineClassifier, LineKind, LogRecord, RecordBody};
pub use command::Command;
pub use config::SessionConfig;
pub use context::{CapturedFailure, FailureId, SessionContext};
pub use errors::{ResolveError, StreamError};
pub use line_buffer::{ChunkSource, LineReader, LineReassembler};
pub use monitor::{ControlPort, Flow, MonitorShell};
pub use render::{Formatter, RenderedLine};
pub use resolver::{Addr2LineCommand, AddressResolver, ResolvedFrame, SymbolLookup};
pub use tlb::TlbEntry;

/// コア機能の結果型
pub type Result<T> = anyhow::Result<T>;
