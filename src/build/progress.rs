//! Advisory progress inference from build output.
//!
//! The authoritative progress numbers come from the processor's phase
//! table; these values only feed logging and metrics.

use regex::Regex;
use std::sync::LazyLock;

struct Pattern {
    regex: Regex,
    ratio: bool,
}

static PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    vec![
        Pattern {
            regex: Regex::new(r"\[(\d+)/(\d+)\]").unwrap(),
            ratio: true,
        },
        Pattern {
            regex: Regex::new(r"(\d+) of (\d+)").unwrap(),
            ratio: true,
        },
        Pattern {
            regex: Regex::new(r"Building\D*(\d+)%").unwrap(),
            ratio: false,
        },
        Pattern {
            regex: Regex::new(r"Progress\D*(\d+)%").unwrap(),
            ratio: false,
        },
        Pattern {
            regex: Regex::new(r"(\d+)%").unwrap(),
            ratio: false,
        },
    ]
});

/// Extract a percentage from one output line, if any pattern matches.
pub fn infer(line: &str) -> Option<u8> {
    for pattern in PATTERNS.iter() {
        let Some(captures) = pattern.regex.captures(line) else {
            continue;
        };
        if pattern.ratio {
            let done: u64 = captures.get(1)?.as_str().parse().ok()?;
            let total: u64 = captures.get(2)?.as_str().parse().ok()?;
            if total == 0 {
                continue;
            }
            return Some(((done * 100 / total).min(100)) as u8);
        }
        let percent: u64 = captures.get(1)?.as_str().parse().ok()?;
        return Some(percent.min(100) as u8);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_patterns() {
        assert_eq!(infer("built 42% of modules"), Some(42));
        assert_eq!(infer("Building site... 73%"), Some(73));
        assert_eq!(infer("Progress: 12%"), Some(12));
    }

    #[test]
    fn test_ratio_patterns() {
        assert_eq!(infer("[3/4] rendering slides"), Some(75));
        assert_eq!(infer("page 1 of 2 exported"), Some(50));
    }

    #[test]
    fn test_clamped_to_100() {
        assert_eq!(infer("weird 250% spike"), Some(100));
        assert_eq!(infer("[9/3] retries"), Some(100));
    }

    #[test]
    fn test_zero_total_is_skipped() {
        // `[1/0]` must not divide by zero; the bare percent rule does not
        // match either, so nothing is inferred.
        assert_eq!(infer("[1/0] bogus"), None);
    }

    #[test]
    fn test_no_match() {
        assert_eq!(infer("compiling dependencies"), None);
        assert_eq!(infer(""), None);
    }
}
