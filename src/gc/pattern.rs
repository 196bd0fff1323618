//! Glob matching for exclusion patterns
//!
//! Supports `*` (any run of characters, including none) and `?` (exactly one
//! character). Matching is case-sensitive and anchored at both ends.

/// Returns true if `name` matches the glob `pattern`
pub fn matches(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();

    let (mut p, mut n) = (0, 0);
    // Last `*` seen and the name position it was tried against
    let mut star: Option<(usize, usize)> = None;

    while n < name.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, n));
                p += 1;
            }
            Some('?') => {
                p += 1;
                n += 1;
            }
            Some(c) if *c == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match star {
                // Let the last star swallow one more character
                Some((sp, sn)) => {
                    p = sp + 1;
                    n = sn + 1;
                    star = Some((sp, sn + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

/// Returns true if `name` matches any of `patterns`
pub fn matches_any<S: AsRef<str>>(patterns: &[S], name: &str) -> bool {
    patterns.iter().any(|p| matches(p.as_ref(), name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::prefix("kube-*", "kube-root-ca.crt", true)]
    #[case::prefix_miss("kube-*", "my-kube-config", false)]
    #[case::suffix("*-token", "builder-token", true)]
    #[case::infix("app-*-config", "app-web-config", true)]
    #[case::empty_star("app-*", "app-", true)]
    #[case::question("cfg-?", "cfg-a", true)]
    #[case::question_needs_one("cfg-?", "cfg-", false)]
    #[case::exact("app-config", "app-config", true)]
    #[case::exact_miss("app-config", "app-config-2", false)]
    #[case::case_sensitive("Kube-*", "kube-root-ca.crt", false)]
    #[case::match_all("*", "anything", true)]
    #[case::backtracking("*a*b", "xaxxab", true)]
    #[case::backtracking_miss("*a*b", "xaxxa", false)]
    #[case::empty_pattern("", "x", false)]
    fn glob_matching(#[case] pattern: &str, #[case] name: &str, #[case] expected: bool) {
        assert_eq!(matches(pattern, name), expected, "{pattern} vs {name}");
    }

    #[test]
    fn any_of_several_patterns() {
        let patterns = vec!["kube-*".to_string(), "default-token-*".to_string()];
        assert!(matches_any(&patterns, "default-token-x7k2p"));
        assert!(!matches_any(&patterns, "orphan-secret"));
        assert!(!matches_any::<String>(&[], "kube-root-ca.crt"));
    }
}
