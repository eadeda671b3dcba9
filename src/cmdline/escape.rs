// src/cmdline/escape.rs

//! POSIX shell quoting for rendered command lines.

/// Words that are safe to render bare, without any quoting.
fn is_simple_word(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| {
            matches!(c,
                'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.' | '/' | ':' | '+' | '%' | '@' | ',')
        })
}

/// Quote a string so `sh` treats it as a single literal token.
///
/// Single quotes preserve everything except single quotes themselves,
/// which are spliced as `'"'"'`.
pub fn quote_sh(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    let escaped = s.replace('\'', "'\"'\"'");
    format!("'{escaped}'")
}

/// Escape an argument for inclusion in a rendered command line.
///
/// Simple words render bare so the common case stays readable in logs.
pub fn escape_arg(s: &str) -> String {
    if is_simple_word(s) {
        s.to_string()
    } else {
        quote_sh(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_sh_basic() {
        assert_eq!(quote_sh(""), "''");
        assert_eq!(quote_sh("hello"), "'hello'");
        assert_eq!(quote_sh("hello world"), "'hello world'");
        assert_eq!(quote_sh("foo'bar"), "'foo'\"'\"'bar'");
    }

    #[test]
    fn escape_arg_leaves_simple_words_bare() {
        assert_eq!(escape_arg("rsync"), "rsync");
        assert_eq!(escape_arg("/usr/bin/env"), "/usr/bin/env");
        assert_eq!(escape_arg("a b"), "'a b'");
        assert_eq!(escape_arg("$HOME"), "'$HOME'");
        assert_eq!(escape_arg("a;b"), "'a;b'");
        assert_eq!(escape_arg("`id`"), "'`id`'");
    }
}
