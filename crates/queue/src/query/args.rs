//! Argument vector quoting.
//!
//! Follows the Windows command-line convention so that generated queries can be
//! handed to the engine as-is on every platform: backslashes are literal unless
//! they precede a double quote, in which case each pair collapses to one
//! backslash and an odd trailing one escapes the quote.

/// One argument of a split query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueryToken {
    pub text: String,
    /// The argument opened with a double quote, so it is a value even when
    /// it starts with `-`.
    pub quoted: bool,
}

/// Split a query string into arguments.
pub fn split_args(input: &str) -> Vec<String> {
    tokenize(input).into_iter().map(|t| t.text).collect()
}

/// [`split_args`] that remembers which arguments were quoted.
pub(crate) fn tokenize(input: &str) -> Vec<QueryToken> {
    let chars: Vec<char> = input.chars().collect();
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    let mut in_quotes = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if !in_token && !(c.is_whitespace() && !in_quotes) {
            quoted = c == '"';
        }
        match c {
            '\\' => {
                let start = i;
                while i < chars.len() && chars[i] == '\\' {
                    i += 1;
                }
                let count = i - start;
                if i < chars.len() && chars[i] == '"' {
                    push_backslashes(&mut current, count / 2);
                    if count % 2 == 1 {
                        current.push('"');
                        i += 1;
                    }
                } else {
                    push_backslashes(&mut current, count);
                }
                in_token = true;
                continue;
            }
            '"' => {
                in_quotes = !in_quotes;
                in_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_token {
                    args.push(QueryToken {
                        text: std::mem::take(&mut current),
                        quoted,
                    });
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
        i += 1;
    }

    if in_token {
        args.push(QueryToken {
            text: current,
            quoted,
        });
    }
    args
}

/// Wrap a value in double quotes, escaping as [`split_args`] expects.
pub fn quote_arg(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    let mut backslashes = 0;
    for c in value.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                push_backslashes(&mut out, backslashes * 2 + 1);
                out.push('"');
                backslashes = 0;
            }
            c => {
                push_backslashes(&mut out, backslashes);
                backslashes = 0;
                out.push(c);
            }
        }
    }
    push_backslashes(&mut out, backslashes * 2);
    out.push('"');
    out
}

/// Quote only when the value would otherwise split, vanish or read as a flag.
pub fn quote_if_needed(value: &str) -> String {
    if value.is_empty()
        || value.starts_with('-')
        || value.chars().any(|c| c.is_whitespace() || c == '"')
    {
        quote_arg(value)
    } else {
        value.to_string()
    }
}

fn push_backslashes(out: &mut String, count: usize) {
    out.extend(std::iter::repeat('\\').take(count));
}
