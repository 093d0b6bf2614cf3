/// Relative paths that never enter an archive.
///
/// A rule matches the exact path or anything below it, so `logs` drops the
/// whole directory while `world/session.lock` drops a single file.
#[derive(Debug, Clone, Default)]
pub struct ExcludePolicy {
    rules: Vec<String>,
}

impl ExcludePolicy {
    pub fn new(rules: impl IntoIterator<Item = String>) -> Self {
        let rules = rules
            .into_iter()
            .map(|r| r.replace('\\', "/").trim_matches('/').to_string())
            .filter(|r| !r.is_empty())
            .collect();
        Self { rules }
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// `rel` is a path relative to the archive root, forward slashes.
    pub fn is_excluded(&self, rel: &str) -> bool {
        self.rules.iter().any(|rule| {
            rel == rule
                || (rel.len() > rule.len()
                    && rel.starts_with(rule.as_str())
                    && rel.as_bytes()[rule.len()] == b'/')
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_file_match() {
        let policy = ExcludePolicy::new(["world/session.lock".to_string()]);
        assert!(policy.is_excluded("world/session.lock"));
        assert!(!policy.is_excluded("world/session.lock.bak"));
        assert!(!policy.is_excluded("world"));
        assert!(!policy.is_excluded("other/world/session.lock"));
    }

    #[test]
    fn directory_rule_covers_children() {
        let policy = ExcludePolicy::new(["/logs/".to_string()]);
        assert!(policy.is_excluded("logs"));
        assert!(policy.is_excluded("logs/latest.log"));
        assert!(!policy.is_excluded("logsarchive"));
    }

    #[test]
    fn empty_policy_keeps_everything() {
        assert!(!ExcludePolicy::none().is_excluded("world/session.lock"));
        assert!(!ExcludePolicy::new([String::new()]).is_excluded("a"));
    }
}
