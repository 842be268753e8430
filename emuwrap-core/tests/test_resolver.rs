//! 外部リゾルバを実際に起動するテスト
//!
//! `addr2line` の代わりに、呼び出しを記録して固定の出力を返すシェルスクリプトを使います。

use emuwrap_core::render::render_failure_report;
use emuwrap_core::{Addr2LineCommand, Formatter, ResolveError, SessionConfig, SessionContext, SymbolLookup};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// フェイクのリゾルバを用意し、(ディレクトリ, スクリプト, 呼び出しログ) を返す
fn fake_resolver() -> (TempDir, PathBuf, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let log = dir.path().join("calls.log");
    let script = dir.path().join("fake-addr2line.sh");

    // 引数: -e <binary> -f -C -i -p <address>
    let body = format!(
        r#"echo "$2 $7" >> "{log}"
case "$2:$7" in
  system:0x1000) echo "kmain at /src/init/main.c:42" ;;
  system:0x2000) echo "list_del at /src/include/list.h:80"; echo " (inlined by) do_exit at /src/kernel/exit.c:12" ;;
  mnt/bin/sh:0x1000) echo "main at /src/bin/sh.c:7" ;;
  *) ;;
esac
"#,
        log = log.display()
    );
    fs::write(&script, body).expect("Failed to write fake resolver");

    (dir, script, log)
}

fn command(script: &Path) -> Addr2LineCommand {
    Addr2LineCommand::new("sh").with_leading_args([script.as_os_str().to_owned()])
}

fn calls(log: &Path) -> Vec<String> {
    fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_lookup_runs_resolver() {
    let (_dir, script, log) = fake_resolver();
    let output = command(&script).lookup(Path::new("system"), "0x1000").unwrap();

    assert_eq!(output.trim(), "kmain at /src/init/main.c:42");
    assert_eq!(calls(&log), vec!["system 0x1000"]);
}

#[test]
fn test_resolver_runs_once_per_address() {
    let (_dir, script, log) = fake_resolver();
    let mut ctx = SessionContext::new(SessionConfig::default(), Box::new(command(&script)));

    let first = ctx.resolve(Path::new("system"), "0x00001000").unwrap();
    let second = ctx.resolve(Path::new("system"), "0x1000").unwrap();
    assert_eq!(first, second);
    assert_eq!(calls(&log).len(), 1);

    // 同じアドレスでもバイナリが違えば別のエントリ
    let user = ctx.resolve(Path::new("mnt/bin/sh"), "0x1000").unwrap();
    assert_eq!(user[0].function, "main");
    assert_ne!(first, user);
    assert_eq!(calls(&log), vec!["system 0x1000", "mnt/bin/sh 0x1000"]);
}

#[test]
fn test_inlined_chain_is_rendered() {
    let (_dir, script, _log) = fake_resolver();
    let formatter = Formatter::new().unwrap();
    let mut ctx = SessionContext::new(SessionConfig::default(), Box::new(command(&script)));

    formatter.classify_and_render("4,1,5.000000;backtrace:", &mut ctx);
    let lines = formatter.classify_and_render("4,2,5.000001;[<0x00002000>] do_exit+0x4/0x20", &mut ctx);

    assert_eq!(lines.len(), 2);
    assert!(lines[0].text.contains("#1 ") && lines[0].text.contains("list_del"));
    assert!(lines[1].text.contains("#2 ") && lines[1].text.contains("do_exit"));
}

#[test]
fn test_empty_output_is_reported() {
    let (_dir, script, log) = fake_resolver();
    let formatter = Formatter::new().unwrap();
    let mut ctx = SessionContext::new(SessionConfig::default(), Box::new(command(&script)));

    let lines = formatter.classify_and_render("[<0x00003000>]", &mut ctx);
    let notices: Vec<_> = lines
        .iter()
        .filter(|l| l.text.starts_with(">> internal exception"))
        .collect();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].text, ">> internal exception #0 encountered for system at 0x00003000");

    // 2回目は新しいIDで通知されるが、リゾルバは再度起動しない
    let lines = formatter.classify_and_render("[<0x00003000>]", &mut ctx);
    assert_eq!(lines[0].text, ">> internal exception #1 encountered for system at 0x00003000");
    assert_eq!(calls(&log).len(), 1);

    let report = render_failure_report(ctx.failures());
    assert!(report.iter().any(|l| l.contains("Exception #0:")));
    assert!(report.iter().any(|l| l.contains("Exception #1:")));
    assert!(report
        .iter()
        .any(|l| l.starts_with(">>>> ") && l.contains("No entries given for system at 0x00003000")));
}

#[test]
fn test_missing_resolver_is_captured() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("no-such-addr2line");
    let config = SessionConfig {
        resolver: missing,
        ..SessionConfig::default()
    };
    let mut ctx = SessionContext::with_addr2line(config);

    let err = ctx.resolve(Path::new("system"), "0x1000").unwrap_err();
    assert!(matches!(err, ResolveError::Spawn { .. }));

    let formatter = Formatter::new().unwrap();
    let lines = formatter.classify_and_render("[<0x00001000>]", &mut ctx);
    assert!(lines[0].text.starts_with(">> internal exception #0"));
    assert_eq!(ctx.failures().len(), 1);
}
