mod common;
use crate::common::{init_tracing, with_timeout};

use std::sync::Arc;

use procpool::cmdline::{CommandLine, WhichCache};
use procpool::process::ProcessHandle;

fn echo_handle(arg: &str) -> ProcessHandle {
    let cmdline = CommandLine::new("echo").arg(arg).unwrap();
    ProcessHandle::new(cmdline, Arc::new(WhichCache::new()))
}

/// Escaped arguments with shell metacharacters must survive a real shell
/// round trip as a single literal token.
#[tokio::test]
async fn metacharacters_round_trip_through_echo() {
    init_tracing();

    let cases = [
        "plain",
        "a b  c",
        "semi;colon",
        "$HOME",
        "`id`",
        "single'quote",
        "double\"quote",
        "star*glob",
        "redirect > /tmp/x",
        "pipe | cat",
    ];

    for case in cases {
        let mut handle = echo_handle(case);
        let output = with_timeout(handle.execute_return_string()).await.unwrap();
        assert_eq!(output, case, "round trip failed for {case:?}");
    }
}

/// Arguments flagged raw are expanded by the shell instead of being
/// passed through literally.
#[tokio::test]
async fn raw_arguments_are_shell_expanded() {
    init_tracing();

    let cmdline = CommandLine::new("echo")
        .raw_arg("$PROCPOOL_ROUNDTRIP")
        .unwrap()
        .env("PROCPOOL_ROUNDTRIP", "expanded-value")
        .unwrap();
    let mut handle = ProcessHandle::new(cmdline, Arc::new(WhichCache::new()));

    let output = with_timeout(handle.execute_return_string()).await.unwrap();
    assert_eq!(output, "expanded-value");
}

/// Captured lines preserve the child's stdout order.
#[tokio::test]
async fn captured_lines_preserve_order() {
    init_tracing();

    let cmdline = CommandLine::new("printf").arg("one\ntwo\nthree\n").unwrap();
    let mut handle = ProcessHandle::new(cmdline, Arc::new(WhichCache::new()));

    let lines = with_timeout(handle.execute_return_lines()).await.unwrap();
    assert_eq!(lines, vec!["one", "two", "three"]);
}
