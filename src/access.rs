//! Repository and image access control
//!
//! Wildcard allow/deny lists checked against `owner/repo` subjects (GitHub)
//! and full image references including any registry host (Docker).

use regex_lite::Regex;

use crate::config::AccessConfig;

/// Match `s` against a shell-style wildcard pattern.
///
/// `*` matches any run of characters (including slashes), `?` matches a
/// single character. Matching is anchored and case-insensitive.
pub fn wildcard_match(pattern: &str, s: &str) -> bool {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push_str("(?i)^");
    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            c if c.is_ascii_alphanumeric() => regex.push(c),
            c => {
                regex.push('\\');
                regex.push(c);
            }
        }
    }
    regex.push('$');

    match Regex::new(&regex) {
        Ok(re) => re.is_match(s),
        Err(_) => false,
    }
}

/// Why a subject was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NotInAllowList,
    InDenyList,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::NotInAllowList => "not in allow list",
            DenyReason::InDenyList => "in deny list",
        }
    }
}

/// An allow/deny pattern pair.
///
/// An empty allow list admits everything; a non-empty one is a gate. The
/// deny list is always checked afterwards.
#[derive(Debug, Clone, Default)]
pub struct PatternList {
    allow: Vec<String>,
    deny: Vec<String>,
}

impl PatternList {
    pub fn new(allow: Vec<String>, deny: Vec<String>) -> Self {
        Self { allow, deny }
    }

    pub fn check(&self, subject: &str) -> Result<(), DenyReason> {
        if !self.allow.is_empty() && !self.allow.iter().any(|p| wildcard_match(p, subject)) {
            return Err(DenyReason::NotInAllowList);
        }
        if self.deny.iter().any(|p| wildcard_match(p, subject)) {
            return Err(DenyReason::InDenyList);
        }
        Ok(())
    }
}

/// Access policy for both upstream ecosystems.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    pub github: PatternList,
    pub docker: PatternList,
}

impl AccessPolicy {
    pub fn from_config(access: &AccessConfig) -> Self {
        Self {
            github: PatternList::new(access.white_list.clone(), access.black_list.clone()),
            docker: PatternList::new(
                access.docker_white_list.clone(),
                access.docker_black_list.clone(),
            ),
        }
    }

    /// Check an `owner/repo` subject. A trailing `.git` is stripped before
    /// matching.
    pub fn check_github(&self, owner_repo: &str) -> Result<(), DenyReason> {
        let subject = owner_repo.strip_suffix(".git").unwrap_or(owner_repo);
        self.github.check(subject)
    }

    /// Check a full image reference, including any leading registry host
    /// (e.g. `ghcr.io/user/image`).
    pub fn check_docker(&self, image_ref: &str) -> Result<(), DenyReason> {
        self.docker.check(image_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: Star matches across slashes
    #[test]
    fn test_wildcard_star_spans_slashes() {
        assert!(wildcard_match("a/*", "a/b"));
        assert!(wildcard_match("a/*", "a/b/c"));
        assert!(!wildcard_match("a/*", "b/c"));
    }

    // Test 2: Question mark matches exactly one character
    #[test]
    fn test_wildcard_question_mark() {
        assert!(wildcard_match("a?c", "abc"));
        assert!(!wildcard_match("a?c", "abbc"));
        assert!(!wildcard_match("a?c", "ac"));
    }

    // Test 3: Case-insensitive, anchored matching
    #[test]
    fn test_wildcard_case_and_anchoring() {
        assert!(wildcard_match("Owner/Repo", "owner/repo"));
        assert!(!wildcard_match("owner", "owner/repo"));
        assert!(!wildcard_match("owner/repo", "x-owner/repo"));
    }

    // Test 4: Regex metacharacters are literal
    #[test]
    fn test_wildcard_escapes_metacharacters() {
        assert!(wildcard_match("a.b", "a.b"));
        assert!(!wildcard_match("a.b", "aXb"));
        assert!(wildcard_match("a+b", "a+b"));
        assert!(!wildcard_match("a+b", "aab"));
    }

    // Test 5: Empty allow list admits everything
    #[test]
    fn test_empty_allow_admits_all() {
        let list = PatternList::default();
        assert!(list.check("anything/at-all").is_ok());
    }

    // Test 6: Non-empty allow list is a gate
    #[test]
    fn test_allow_list_gate() {
        let list = PatternList::new(vec!["good/*".to_string()], vec![]);
        assert!(list.check("good/repo").is_ok());
        assert_eq!(list.check("bad/repo"), Err(DenyReason::NotInAllowList));
    }

    // Test 7: Deny list is checked after allow
    #[test]
    fn test_deny_list_wins() {
        let list = PatternList::new(
            vec!["good/*".to_string()],
            vec!["good/secret".to_string()],
        );
        assert!(list.check("good/repo").is_ok());
        assert_eq!(list.check("good/secret"), Err(DenyReason::InDenyList));
    }

    // Test 8: GitHub subjects strip trailing .git
    #[test]
    fn test_github_strips_dot_git() {
        let policy = AccessPolicy {
            github: PatternList::new(vec![], vec!["owner/blocked".to_string()]),
            docker: PatternList::default(),
        };
        assert_eq!(
            policy.check_github("owner/blocked.git"),
            Err(DenyReason::InDenyList)
        );
        assert!(policy.check_github("owner/fine.git").is_ok());
    }

    // Test 9: Docker subjects match the full reference with registry host
    #[test]
    fn test_docker_full_reference() {
        let policy = AccessPolicy {
            github: PatternList::default(),
            docker: PatternList::new(vec![], vec!["ghcr.io/*".to_string()]),
        };
        assert_eq!(
            policy.check_docker("ghcr.io/user/image"),
            Err(DenyReason::InDenyList)
        );
        assert!(policy.check_docker("library/nginx").is_ok());
    }
}
