//! Gitignore-subset matcher. Hand-rolled rather than pulled from a crate:
//! the wire format depends on ignore decisions matching exactly, and
//! off-the-shelf gitignore crates each carry their own corner-case
//! behavior around anchoring and negation that this system can't risk
//! drifting from silently.

const BUILTIN_RULES: &[&str] = &[".git/", ".env2/", ".env3/", "*.pyc"];

#[derive(Debug, Clone)]
struct Rule {
    negate: bool,
    dir_only: bool,
    /// Effective path-segment pattern to match against the full relative
    /// path. Un-anchored single-segment patterns are normalized to
    /// `["**", segment]` so a single matcher handles both cases.
    segments: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    rules: Vec<Rule>,
}

impl IgnoreSet {
    /// Builds the ignore set from the built-in fixture rules plus the
    /// contents of a `.gitignore` file, if present, read at workspace
    /// construction time (spec.md §4.2 builds this once, not per-snapshot).
    pub fn new(gitignore_contents: Option<&str>) -> Self {
        let mut rules = Vec::new();
        for line in BUILTIN_RULES {
            if let Some(rule) = parse_line(line) {
                rules.push(rule);
            }
        }
        if let Some(contents) = gitignore_contents {
            for line in contents.lines() {
                if let Some(rule) = parse_line(line) {
                    rules.push(rule);
                }
            }
        }
        IgnoreSet { rules }
    }

    /// `rel_path` is `/`-separated, relative to the workspace root, with
    /// no leading slash. `is_dir` gates `dir_only` rules.
    pub fn is_ignored(&self, rel_path: &str, is_dir: bool) -> bool {
        if rel_path.is_empty() {
            return false;
        }
        let path_segs: Vec<&str> = rel_path.split('/').collect();
        let mut ignored = false;
        for rule in &self.rules {
            if rule.dir_only && !is_dir {
                continue;
            }
            let seg_refs: Vec<&str> = rule.segments.iter().map(String::as_str).collect();
            if match_path(&seg_refs, &path_segs) {
                ignored = !rule.negate;
            }
        }
        ignored
    }
}

fn parse_line(raw: &str) -> Option<Rule> {
    let trimmed = raw.trim_end_matches(['\n', '\r']);
    let trimmed = trimmed.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    let mut s = trimmed;
    let negate = s.starts_with('!');
    if negate {
        s = &s[1..];
    }
    let dir_only = s.ends_with('/') && s.len() > 1;
    let pattern = if dir_only { &s[..s.len() - 1] } else { s };
    let anchored = pattern.contains('/');
    let pattern = pattern.strip_prefix('/').unwrap_or(pattern);

    let segments: Vec<String> = if anchored {
        pattern.split('/').map(str::to_string).collect()
    } else {
        vec!["**".to_string(), pattern.to_string()]
    };

    Some(Rule {
        negate,
        dir_only,
        segments,
    })
}

/// Matches a pattern split into path segments (where `**` means "zero or
/// more segments") against the path's own segments.
fn match_path(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((&"**", rest)) => {
            if rest.is_empty() {
                return true;
            }
            (0..=path.len()).any(|i| match_path(rest, &path[i..]))
        }
        Some((seg, rest)) => match path.split_first() {
            Some((p, prest)) => glob_segment(seg, p) && match_path(rest, prest),
            None => false,
        },
    }
}

/// Single-path-segment glob: `*` (any run, no `/`), `?` (one char),
/// literal characters otherwise.
fn glob_segment(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_rec(&p, &t)
}

fn glob_rec(p: &[char], t: &[char]) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('*') => glob_rec(&p[1..], t) || (!t.is_empty() && glob_rec(p, &t[1..])),
        Some('?') => !t.is_empty() && glob_rec(&p[1..], &t[1..]),
        Some(c) => !t.is_empty() && t[0] == *c && glob_rec(&p[1..], &t[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_rules_ignore_git_dir_anywhere() {
        let set = IgnoreSet::new(None);
        assert!(set.is_ignored(".git", true));
        assert!(set.is_ignored("nested/.git", true));
        assert!(!set.is_ignored(".git", false));
    }

    #[test]
    fn builtin_rules_ignore_pyc_files() {
        let set = IgnoreSet::new(None);
        assert!(set.is_ignored("foo.pyc", false));
        assert!(set.is_ignored("pkg/sub/foo.pyc", false));
        assert!(!set.is_ignored("foo.py", false));
    }

    #[test]
    fn anchored_pattern_only_matches_from_root() {
        let set = IgnoreSet::new(Some("/build\n"));
        assert!(set.is_ignored("build", true));
        assert!(!set.is_ignored("nested/build", true));
    }

    #[test]
    fn unanchored_pattern_matches_any_depth() {
        let set = IgnoreSet::new(Some("node_modules/\n"));
        assert!(set.is_ignored("node_modules", true));
        assert!(set.is_ignored("a/b/node_modules", true));
        assert!(!set.is_ignored("node_modules", false));
    }

    #[test]
    fn double_star_matches_zero_or_more_segments() {
        let set = IgnoreSet::new(Some("**/generated/*.rs\n"));
        assert!(set.is_ignored("generated/a.rs", false));
        assert!(set.is_ignored("x/y/generated/a.rs", false));
        assert!(!set.is_ignored("generated/a.txt", false));
    }

    #[test]
    fn negation_reincludes_a_path() {
        let set = IgnoreSet::new(Some("*.log\n!important.log\n"));
        assert!(set.is_ignored("debug.log", false));
        assert!(!set.is_ignored("important.log", false));
    }
}
