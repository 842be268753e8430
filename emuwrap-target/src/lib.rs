//! emuwrap のエミュレータ・端末制御
//!
//! このクレートは、エミュレータプロセスと操作端末に触れる低レベル機能を提供します。
//! プロセスの起動、ログ出力のポーリング読み取り、整形済み行の出力、
//! 端末モードの切り替え、モニタへの制御チャネルを扱います。

pub mod control;
pub mod process;
pub mod sink;
pub mod stream;
pub mod terminal;

pub use control::{ControlChannel, MonitorConfig};
pub use process::{Emulator, EmulatorKind, EmulatorOutput, LogStream};
pub use sink::LineSink;
pub use stream::FdSource;
pub use terminal::{CookedScope, ModeControl, RestoreOnDrop, TerminalModes, Tty};

/// ターゲット制御の結果型
pub type Result<T> = anyhow::Result<T>;
