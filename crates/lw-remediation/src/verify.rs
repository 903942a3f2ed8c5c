//! Lightweight syntax checks run on a fix's resulting content before it is
//! written.
//!
//! Brace-style languages get a delimiter-balance scan that skips strings and
//! comments; JSON and TOML are fully parsed. Everything else passes.

use std::path::Path;

use lw_core::language::Language;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("line {line}: unexpected '{found}'")]
    Unexpected { found: char, line: usize },

    #[error("line {line}: '{found}' does not match '{open}' opened on line {opened_at}")]
    Mismatched {
        open: char,
        opened_at: usize,
        found: char,
        line: usize,
    },

    #[error("line {line}: '{open}' is never closed")]
    Unclosed { open: char, line: usize },

    #[error("line {line}: unterminated string")]
    UnterminatedString { line: usize },

    #[error("{0}")]
    Parse(String),
}

struct Syntax {
    line_comments: &'static [&'static str],
    block_comment: Option<(&'static str, &'static str)>,
    quotes: &'static [char],
    /// Quotes whose strings may span lines.
    multiline_quotes: &'static [char],
    triple_quotes: bool,
    /// An unterminated string is an error. When false the quote is taken as
    /// a plain character (JSX text, regex literals, inline HTML).
    strict_strings: bool,
    /// `'` starts a char literal only when it looks like one; otherwise it is
    /// a lifetime or label.
    rust_chars: bool,
}

const C_LIKE: Syntax = Syntax {
    line_comments: &["//"],
    block_comment: Some(("/*", "*/")),
    quotes: &['"', '\'', '`'],
    multiline_quotes: &['`'],
    triple_quotes: false,
    strict_strings: false,
    rust_chars: false,
};

const JVM_LIKE: Syntax = Syntax {
    line_comments: &["//"],
    block_comment: Some(("/*", "*/")),
    quotes: &['"', '\''],
    multiline_quotes: &[],
    triple_quotes: true,
    strict_strings: true,
    rust_chars: false,
};

const RUST: Syntax = Syntax {
    line_comments: &["//"],
    block_comment: Some(("/*", "*/")),
    quotes: &['"'],
    multiline_quotes: &['"'],
    triple_quotes: false,
    strict_strings: true,
    rust_chars: true,
};

const PYTHON: Syntax = Syntax {
    line_comments: &["#"],
    block_comment: None,
    quotes: &['"', '\''],
    multiline_quotes: &[],
    triple_quotes: true,
    strict_strings: true,
    rust_chars: false,
};

const HASH_AND_C: Syntax = Syntax {
    line_comments: &["//", "#"],
    block_comment: Some(("/*", "*/")),
    quotes: &['"', '\''],
    multiline_quotes: &[],
    triple_quotes: false,
    strict_strings: false,
    rust_chars: false,
};

const CSS: Syntax = Syntax {
    line_comments: &[],
    block_comment: Some(("/*", "*/")),
    quotes: &['"', '\''],
    multiline_quotes: &[],
    triple_quotes: false,
    strict_strings: false,
    rust_chars: false,
};

/// Check `content` as if it were the contents of `path`.
pub fn verify(path: &Path, content: &str) -> Result<(), VerifyError> {
    match Language::from_path(path) {
        Language::JavaScript | Language::TypeScript | Language::Go | Language::CFamily => {
            check_delimiters(content, &C_LIKE)
        }
        Language::Java | Language::Kotlin | Language::Swift => check_delimiters(content, &JVM_LIKE),
        Language::Rust => check_delimiters(content, &RUST),
        Language::Python => check_delimiters(content, &PYTHON),
        Language::Php | Language::Ruby => check_delimiters(content, &HASH_AND_C),
        Language::Css => check_delimiters(content, &CSS),
        Language::Json => serde_json::from_str::<serde_json::Value>(content)
            .map(drop)
            .map_err(|e| VerifyError::Parse(format!("invalid JSON: {e}"))),
        Language::Toml => content
            .parse::<toml::Table>()
            .map(drop)
            .map_err(|e| VerifyError::Parse(format!("invalid TOML: {}", e.message()))),
        _ => Ok(()),
    }
}

fn closer(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn starts_with_at(chars: &[char], i: usize, pat: &str) -> bool {
    let mut k = i;
    for p in pat.chars() {
        if chars.get(k) != Some(&p) {
            return false;
        }
        k += 1;
    }
    true
}

fn check_delimiters(content: &str, syntax: &Syntax) -> Result<(), VerifyError> {
    let chars: Vec<char> = content.chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }

        if syntax.line_comments.iter().any(|p| starts_with_at(&chars, i, p)) {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if let Some((open, close)) = syntax.block_comment {
            if starts_with_at(&chars, i, open) {
                i += open.chars().count();
                while i < chars.len() && !starts_with_at(&chars, i, close) {
                    if chars[i] == '\n' {
                        line += 1;
                    }
                    i += 1;
                }
                i += close.chars().count();
                continue;
            }
        }

        if syntax.rust_chars && c == '\'' {
            i = skip_rust_quote(&chars, i);
            continue;
        }

        if syntax.quotes.contains(&c) {
            let start_line = line;
            let triple = syntax.triple_quotes
                && chars.get(i + 1) == Some(&c)
                && chars.get(i + 2) == Some(&c);
            let mut end_line = line;
            let end = if triple {
                skip_triple(&chars, i + 3, c, &mut end_line)
            } else {
                skip_string(&chars, i + 1, c, syntax.multiline_quotes.contains(&c), &mut end_line)
            };
            match end {
                Some(end) => {
                    i = end;
                    line = end_line;
                }
                None if syntax.strict_strings => {
                    return Err(VerifyError::UnterminatedString { line: start_line })
                }
                None => i += 1,
            }
            continue;
        }

        match c {
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => match stack.pop() {
                Some((open, _)) if closer(open) == c => {}
                Some((open, opened_at)) => {
                    return Err(VerifyError::Mismatched {
                        open,
                        opened_at,
                        found: c,
                        line,
                    })
                }
                None => return Err(VerifyError::Unexpected { found: c, line }),
            },
            _ => {}
        }
        i += 1;
    }

    match stack.pop() {
        Some((open, line)) => Err(VerifyError::Unclosed { open, line }),
        None => Ok(()),
    }
}

/// Index just past the closing quote, or `None` if the string runs off the
/// end of its line (or of the input, for multiline strings).
fn skip_string(
    chars: &[char],
    mut i: usize,
    quote: char,
    multiline: bool,
    line: &mut usize,
) -> Option<usize> {
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '\n' if !multiline => return None,
            '\n' => {
                *line += 1;
                i += 1;
            }
            ch if ch == quote => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

fn skip_triple(chars: &[char], mut i: usize, quote: char, line: &mut usize) -> Option<usize> {
    while i < chars.len() {
        if chars[i] == '\\' {
            i += 2;
            continue;
        }
        if chars[i] == quote && chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote) {
            return Some(i + 3);
        }
        if chars[i] == '\n' {
            *line += 1;
        }
        i += 1;
    }
    None
}

fn skip_rust_quote(chars: &[char], i: usize) -> usize {
    match (chars.get(i + 1), chars.get(i + 2)) {
        (Some('\\'), _) => {
            let mut k = i + 2;
            while k < chars.len() && chars[k] != '\'' && chars[k] != '\n' {
                k += 1;
            }
            k + 1
        }
        (Some(_), Some('\'')) => i + 3,
        _ => i + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(file: &str, content: &str) -> Result<(), VerifyError> {
        verify(Path::new(file), content)
    }

    #[test]
    fn balanced_javascript_passes() {
        let js = "function f(a) {\n  const s = \"}\"; // ) ignored\n  /* ] */\n  return `${a}`;\n}\n";
        assert_eq!(check("a.js", js), Ok(()));
    }

    #[test]
    fn mismatched_delimiters_are_located() {
        let err = check("a.ts", "function f() {\n  return g(1];\n}\n").unwrap_err();
        assert_eq!(
            err,
            VerifyError::Mismatched {
                open: '(',
                opened_at: 2,
                found: ']',
                line: 2
            }
        );
        assert_eq!(
            check("a.go", "func main() {\n"),
            Err(VerifyError::Unclosed { open: '{', line: 1 })
        );
        assert_eq!(
            check("a.java", "}"),
            Err(VerifyError::Unexpected { found: '}', line: 1 })
        );
    }

    #[test]
    fn python_strings_and_comments() {
        let py = "def f(x):\n    # (unbalanced in comment\n    s = '''\n  ) in docstring\n'''\n    return [x, \"]\"]\n";
        assert_eq!(check("m.py", py), Ok(()));
        assert!(check("m.py", "print((1)\n").is_err());
        assert_eq!(
            check("m.py", "s = 'abc\n"),
            Err(VerifyError::UnterminatedString { line: 1 })
        );
    }

    #[test]
    fn rust_lifetimes_are_not_strings() {
        let rs = "fn f<'a>(s: &'a str) -> char { let c = '{'; let e = '\\n'; c }\nconst M: &str = \"a\n(b\";\n";
        assert_eq!(check("lib.rs", rs), Ok(()));
        assert!(check("lib.rs", "fn f() { (\n}").is_err());
    }

    #[test]
    fn structured_formats_are_parsed() {
        assert_eq!(check("p.json", r#"{"a": [1, 2]}"#), Ok(()));
        assert!(matches!(check("p.json", r#"{"a": [1, 2}"#), Err(VerifyError::Parse(_))));
        assert_eq!(check("c.toml", "[a]\nb = 1\n"), Ok(()));
        assert!(check("c.toml", "[a\nb = 1\n").is_err());
    }

    #[test]
    fn stray_apostrophes_in_jsx_are_tolerated() {
        let jsx = "export const A = () => (\n  <p>Don't {name}</p>\n);\n";
        assert_eq!(check("A.jsx", jsx), Ok(()));
        assert!(check("A.jsx", "export const A = () => (\n  <p>Don't {name</p>\n);\n").is_err());
    }

    #[test]
    fn unchecked_formats_pass() {
        assert_eq!(check("README.md", "(((("), Ok(()));
        assert_eq!(check("page.html", "<div>{</div>"), Ok(()));
        assert_eq!(check("notes.unknownext", "}"), Ok(()));
    }
}
