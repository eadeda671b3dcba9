use proptest::prelude::*;

use procpool::cmdline::CommandLine;
use procpool::cmdline::escape::quote_sh;

/// Minimal POSIX single-quote token parser, the inverse of `quote_sh`.
///
/// Understands exactly the two forms the renderer emits: `'...'` segments
/// and the `'"'"'` splice for embedded single quotes.
fn unquote_sh(token: &str) -> Option<String> {
    let mut out = String::new();
    let mut chars = token.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                // Single-quoted segment runs to the next single quote.
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => out.push(inner),
                        None => return None,
                    }
                }
            }
            '"' => {
                // Double-quoted segment (used only for the spliced quote).
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(inner) => out.push(inner),
                        None => return None,
                    }
                }
            }
            _ => return None,
        }
    }

    Some(out)
}

proptest! {
    /// Quoting any string yields a token the shell reads back as exactly
    /// the original value.
    #[test]
    fn quote_sh_round_trips(s in ".*") {
        let quoted = quote_sh(&s);
        prop_assert_eq!(unquote_sh(&quoted), Some(s));
    }

    /// Rendering is deterministic: two identically-built command lines
    /// render to the same string, and a second render returns the cached
    /// value.
    #[test]
    fn render_is_deterministic(args in proptest::collection::vec(".*", 0..6)) {
        let build = |values: &[String]| {
            let mut cmdline = CommandLine::literal("prog");
            for value in values {
                cmdline = cmdline.arg(value.clone()).unwrap();
            }
            cmdline
        };

        let mut a = build(&args);
        let mut b = build(&args);

        let first = a.render(false).unwrap();
        prop_assert_eq!(&first, &a.render(false).unwrap());
        prop_assert_eq!(&first, &b.render(false).unwrap());
    }
}
