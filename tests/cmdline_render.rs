mod common;
use crate::common::init_tracing;

use procpool::cmdline::{CommandLine, OutputChannel};
use procpool::errors::ProcessError;

#[test]
fn render_is_memoized_and_idempotent() {
    init_tracing();

    let mut cmdline = CommandLine::literal("echo")
        .arg("hello world")
        .unwrap()
        .arg("plain")
        .unwrap();

    let first = cmdline.render(false).unwrap();
    let second = cmdline.render(false).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, "echo 'hello world' plain");
}

#[test]
fn mutation_after_render_fails_fast() {
    let mut cmdline = CommandLine::literal("echo").arg("a").unwrap();
    cmdline.render(false).unwrap();

    let err = cmdline.arg("b").unwrap_err();
    assert!(matches!(err, ProcessError::InvalidArgument(_)));
    assert!(err.to_string().contains("frozen"));
}

#[test]
fn rendered_flag_survives_after_first_build() {
    let mut cmdline = CommandLine::literal("true");
    assert!(!cmdline.is_rendered());
    cmdline.render(false).unwrap();
    assert!(cmdline.is_rendered());

    // The background flag of a later call cannot change the cached line.
    let cached = cmdline.render(true).unwrap();
    assert_eq!(cached, "true");
}

#[test]
fn escaped_args_are_quoted_raw_args_are_not() {
    let mut cmdline = CommandLine::literal("echo")
        .arg("$HOME")
        .unwrap()
        .raw_arg("$HOME")
        .unwrap();

    assert_eq!(cmdline.render(false).unwrap(), "echo '$HOME' $HOME");
}

#[test]
fn background_render_detaches_and_reports_pid() {
    let mut cmdline = CommandLine::literal("sleep").arg("5").unwrap();
    let line = cmdline.render(true).unwrap();
    assert_eq!(line, "sleep 5 > /dev/null 2> /dev/null & echo $!");
}

#[test]
fn background_render_keeps_explicit_redirects() {
    let mut cmdline = CommandLine::literal("sleep")
        .arg("5")
        .unwrap()
        .redirect_output(OutputChannel::Stdout, "/tmp/out.log", true)
        .unwrap();

    let line = cmdline.render(true).unwrap();
    assert_eq!(line, "sleep 5 >> '/tmp/out.log' 2> /dev/null & echo $!");
}

#[test]
fn input_and_stderr_redirects_render() {
    let mut cmdline = CommandLine::literal("wc")
        .arg("-l")
        .unwrap()
        .redirect_input("/tmp/in put.txt")
        .unwrap()
        .redirect_output(OutputChannel::Stderr, "/tmp/err.log", false)
        .unwrap();

    assert_eq!(
        cmdline.render(false).unwrap(),
        "wc -l < '/tmp/in put.txt' 2> '/tmp/err.log'"
    );
}

#[test]
fn pipe_renders_with_single_bar() {
    let sort = CommandLine::literal("sort").arg("-u").unwrap();
    let mut cmdline = CommandLine::literal("cat")
        .arg("/tmp/data")
        .unwrap()
        .pipe_to(sort)
        .unwrap();

    assert_eq!(cmdline.render(false).unwrap(), "cat /tmp/data | sort -u");
}

#[test]
fn raw_pipe_target_is_used_verbatim() {
    let mut cmdline = CommandLine::literal("ls")
        .pipe_to_command("grep -v tmp")
        .unwrap();

    assert_eq!(cmdline.render(false).unwrap(), "ls | grep -v tmp");
}

#[test]
fn pipe_chains_are_one_link_deep() {
    let second = CommandLine::literal("sort");
    let third = CommandLine::literal("uniq");
    let chained = second.pipe_to(third).unwrap();

    let err = CommandLine::literal("cat").pipe_to(chained).unwrap_err();
    assert!(matches!(err, ProcessError::InvalidArgument(_)));
}

#[test]
fn piping_a_redirected_stdout_is_rejected() {
    let cmdline = CommandLine::literal("ls")
        .redirect_output(OutputChannel::Stdout, "/tmp/out", false)
        .unwrap();

    let err = cmdline.pipe_to(CommandLine::literal("sort")).unwrap_err();
    assert!(matches!(err, ProcessError::InvalidArgument(_)));
}
