//! 行の再構成
//!
//! エミュレータの出力は任意の位置で分割されたチャンクとして届きます。
//! ここでは2段階のバッファリングで論理行を組み立てます。
//!
//! 1. 改行が来るまでバイト列を溜める未完成行バッファ
//! 2. 完成した行を取り出し順に保持するキュー

use crate::errors::StreamError;
use std::collections::VecDeque;
use std::io;
use std::time::Duration;

/// 改行コード
const SEPARATOR: u8 = b'\n';

/// バイト列を論理行に再構成する
#[derive(Debug, Default)]
pub struct LineReassembler {
    /// 改行をまだ受け取っていない行の断片
    pending: Vec<u8>,
    /// 完成した行
    lines: VecDeque<String>,
}

impl LineReassembler {
    /// 空のリアセンブラを作成する
    pub fn new() -> Self {
        Self::default()
    }

    /// チャンクを投入し、新たに完成した行の数を返す
    ///
    /// 最後の断片は次のチャンクに備えて保持されます。
    /// 未完成行が空のときに空の断片が来た場合（連続した改行）は行を生成しません。
    pub fn feed(&mut self, chunk: &[u8]) -> usize {
        let before = self.lines.len();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == SEPARATOR) {
            let fragment = &rest[..pos];
            rest = &rest[pos + 1..];

            if fragment.is_empty() && self.pending.is_empty() {
                continue;
            }

            self.pending.extend_from_slice(fragment);
            self.complete_pending();
        }

        self.pending.extend_from_slice(rest);
        self.lines.len() - before
    }

    /// タイムアウト時に未完成行を1行として確定させる
    ///
    /// 改行で終わらないプロンプトなどを表示するために使います。
    /// 未完成行が空なら何もせず `false` を返します。
    pub fn flush(&mut self) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        self.complete_pending();
        true
    }

    /// 完成した行を1つ取り出す
    pub fn pop_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    /// 完成済みの行の数
    pub fn ready(&self) -> usize {
        self.lines.len()
    }

    /// 未完成行のバイト数
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn complete_pending(&mut self) {
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        // バッファの確保領域は再利用する
        self.pending.clear();
        self.lines.push_back(line);
    }
}

/// 読み取り待ち付きでチャンクを供給するソース
pub trait ChunkSource {
    /// 最大 `timeout` だけデータを待ち、`buf` に読み込む
    ///
    /// # Returns
    /// * `Ok(None)` - タイムアウトまでにデータがなかった
    /// * `Ok(Some(0))` - ストリームの終端
    /// * `Ok(Some(n))` - `n` バイト読み込んだ
    fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>>;
}

/// ストリームから論理行を1行ずつ読むリーダー
pub struct LineReader<S> {
    source: S,
    reassembler: LineReassembler,
    buffer: Vec<u8>,
    timeout: Duration,
    eof: bool,
}

impl<S: ChunkSource> LineReader<S> {
    /// リーダーを作成する
    ///
    /// # Arguments
    /// * `source` - チャンクの供給元
    /// * `timeout` - 未完成行を確定させるまでの無通信時間
    /// * `read_size` - 1回の読み取りの最大バイト数
    pub fn new(source: S, timeout: Duration, read_size: usize) -> Self {
        Self {
            source,
            reassembler: LineReassembler::new(),
            buffer: vec![0; read_size.max(1)],
            timeout,
            eof: false,
        }
    }

    /// 次の論理行を読む
    ///
    /// 終端に達したとき、未完成行が残っていればそれを最後の行として返し、
    /// その次の呼び出しで [`StreamError::Eof`] を返します。
    pub fn read_line(&mut self) -> Result<String, StreamError> {
        loop {
            if let Some(line) = self.reassembler.pop_line() {
                return Ok(line);
            }

            if self.eof {
                return Err(StreamError::Eof);
            }

            match self.source.read_chunk(&mut self.buffer, self.timeout)? {
                None => {
                    self.reassembler.flush();
                }
                Some(0) => {
                    self.eof = true;
                    self.reassembler.flush();
                }
                Some(n) => {
                    self.reassembler.feed(&self.buffer[..n]);
                }
            }
        }
    }

    /// 内部のソースへの参照を取得
    pub fn source(&self) -> &S {
        &self.source
    }
}
