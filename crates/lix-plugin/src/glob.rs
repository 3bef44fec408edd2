//! Path glob matching for plugin dispatch.
//!
//! Supported syntax: `*` (any run of characters within one path segment),
//! `?` (one character other than `/`) and `**` (any run, crossing segments).
//! A pattern without `/` is matched against the file name only.

/// Check whether `path` matches `pattern`.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    let subject = if pattern.contains('/') {
        path.trim_start_matches('/')
    } else {
        path.rsplit('/').next().unwrap_or(path)
    };
    let pattern: Vec<char> = pattern.trim_start_matches('/').chars().collect();
    let subject: Vec<char> = subject.chars().collect();
    matches(&pattern, &subject)
}

fn matches(pattern: &[char], subject: &[char]) -> bool {
    match pattern {
        [] => subject.is_empty(),
        ['*', '*', rest @ ..] => {
            // `**/` may also match zero directories.
            if let ['/', after @ ..] = rest {
                if matches(after, subject) {
                    return true;
                }
            }
            (0..=subject.len()).any(|i| matches(rest, &subject[i..]))
        }
        ['*', rest @ ..] => {
            for i in 0..=subject.len() {
                if matches(rest, &subject[i..]) {
                    return true;
                }
                if subject.get(i) == Some(&'/') {
                    break;
                }
            }
            false
        }
        ['?', rest @ ..] => match subject {
            [c, tail @ ..] if *c != '/' => matches(rest, tail),
            _ => false,
        },
        [p, rest @ ..] => match subject {
            [c, tail @ ..] if c == p => matches(rest, tail),
            _ => false,
        },
    }
}
