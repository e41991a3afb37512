//! Add-on ignore set.

use regex::{Regex, RegexBuilder};
use tracing::debug;

use settingsync_common::AddOnId;

/// The sync tool's own add-on id. Always ignored.
pub const SELF_ID: &str = "settingsync.settingsync";

#[derive(Debug, Clone)]
enum Matcher {
    Pattern(Regex),
    Exact(String),
}

/// Add-on ids excluded from comparison and sync.
///
/// Each entry is a case-insensitive regular expression that must match the
/// whole id. Entries that do not compile are compared as plain ids.
#[derive(Debug, Clone)]
pub struct IgnoreSet {
    matchers: Vec<Matcher>,
}

impl IgnoreSet {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut matchers = vec![Matcher::Exact(SELF_ID.to_string())];

        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            let anchored = format!("^(?:{})$", pattern);
            match RegexBuilder::new(&anchored).case_insensitive(true).build() {
                Ok(re) => matchers.push(Matcher::Pattern(re)),
                Err(_) => {
                    debug!("Ignore entry '{}' is not a valid pattern, matching exactly", pattern);
                    matchers.push(Matcher::Exact(pattern.to_lowercase()));
                }
            }
        }

        Self { matchers }
    }

    pub fn is_ignored(&self, id: &AddOnId) -> bool {
        let key = id.key();
        self.matchers.iter().any(|m| match m {
            Matcher::Pattern(re) => re.is_match(id.as_str()),
            Matcher::Exact(exact) => *exact == key,
        })
    }
}

impl Default for IgnoreSet {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}
