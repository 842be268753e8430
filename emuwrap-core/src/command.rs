//! モニタコマンド

/// 補完対象のコマンド（組み込みコマンドとエミュレータのよく使うコマンド）
pub const COMMANDS: &[&str] = &[
    "cont", "exit", "help", "info", "stop", "system_reset", "tlb", "x", "xp",
];

/// `info` の補完対象のサブコマンド
pub const INFO_TOPICS: &[&str] = &["cpus", "mem", "mtree", "registers", "tlb"];

/// モニタコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// コマンドラインを閉じてログ表示に戻る
    Exit,
    /// エミュレータのヘルプを表示（引数はそのまま渡す）
    Help(Option<String>),
    /// TLBのマッピングを表示（アドレスを指定するとそのページだけ）
    Tlb(Option<String>),
    /// そのままエミュレータに渡すコマンド
    Raw(String),
}

impl Command {
    /// コマンド文字列をパースする
    ///
    /// 空行は `None` になります。
    /// `quit` はエミュレータを終了させるコマンドなので、`exit` の別名にはしません。
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let mut parts = input.splitn(2, char::is_whitespace);
        let name = parts.next().filter(|s| !s.is_empty())?;
        let arg = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        match name {
            "exit" => Some(Command::Exit),
            "help" => Some(Command::Help(arg)),
            "tlb" => Some(Command::Tlb(arg)),
            _ => Some(Command::Raw(input.to_string())),
        }
    }
}

/// 入力中の行に対する補完候補を返す
///
/// # Returns
/// 置き換える部分の開始位置と候補のリスト
pub fn complete(line: &str, pos: usize) -> (usize, Vec<String>) {
    let line = &line[..pos.min(line.len())];
    let start = line.rfind(char::is_whitespace).map_or(0, |i| i + 1);
    let word = &line[start..];
    let preceding: Vec<&str> = line[..start].split_whitespace().collect();

    let vocabulary = match preceding.as_slice() {
        [] => COMMANDS,
        ["info"] => INFO_TOPICS,
        _ => return (start, Vec::new()),
    };

    let candidates = vocabulary
        .iter()
        .filter(|c| c.starts_with(word))
        .map(|c| c.to_string())
        .collect();

    (start, candidates)
}
