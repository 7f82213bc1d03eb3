//! Frame discovery: expand a shell-style pattern against one directory.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{BurstcalError, Result};
use crate::frame::{FrameHandle, SortKey};
use crate::profile::FrameOrder;

/// Ordered frames matched by one pattern. Iterating does not consume it.
#[derive(Clone, Debug)]
pub struct FrameIndex {
    pub base: PathBuf,
    pub pattern: String,
    handles: Vec<FrameHandle>,
}

impl FrameIndex {
    pub fn iter(&self) -> std::slice::Iter<'_, FrameHandle> {
        self.handles.iter()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn as_slice(&self) -> &[FrameHandle] {
        &self.handles
    }
}

impl<'a> IntoIterator for &'a FrameIndex {
    type Item = &'a FrameHandle;
    type IntoIter = std::slice::Iter<'a, FrameHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.handles.iter()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FrameIndexer {
    order: FrameOrder,
}

impl FrameIndexer {
    pub fn new(order: FrameOrder) -> Self {
        Self { order }
    }

    /// List regular files directly inside `base` whose name matches the
    /// glob `pattern`, sorted by the configured order. An empty match is an
    /// error only when `required` is set.
    pub fn index(&self, base: &Path, pattern: &str, required: bool) -> Result<FrameIndex> {
        let matcher = GlobMatcher::new(pattern)?;
        let mut handles = Vec::new();

        for entry in fs::read_dir(base)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !matcher.is_match(&name) {
                continue;
            }
            let key = self.sort_key(&name);
            handles.push(FrameHandle::new(entry.path(), key));
        }

        handles.sort_by(|a, b| a.sort_key.cmp(&b.sort_key));
        debug!(
            dir = %base.display(),
            pattern,
            matched = handles.len(),
            "Indexed frames"
        );

        if handles.is_empty() && required {
            return Err(BurstcalError::NoMatchingFrames {
                dir: base.to_path_buf(),
                pattern: pattern.to_string(),
            });
        }

        Ok(FrameIndex {
            base: base.to_path_buf(),
            pattern: pattern.to_string(),
            handles,
        })
    }

    fn sort_key(&self, name: &str) -> SortKey {
        match self.order {
            FrameOrder::Name => SortKey::Name(name.to_string()),
            FrameOrder::ReversedDigits => match reversed_digit_sequence(name) {
                Some(seq) => SortKey::Sequence(seq, name.to_string()),
                None => {
                    warn!(file = name, "Unexpected file name format, no leading digits");
                    SortKey::Name(name.to_string())
                }
            },
        }
    }
}

/// Sequence number of a file whose leading digit run is written
/// least-significant digit first, e.g. `0100000000spool.dat` -> 10.
fn reversed_digit_sequence(name: &str) -> Option<u64> {
    let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.chars().rev().collect::<String>().parse().ok()
}

/// File-name matcher with shell semantics: a leading `.` in a name is only
/// matched by a literal leading `.` in the pattern.
#[derive(Clone, Debug)]
pub struct GlobMatcher {
    regex: Regex,
    dot_files: bool,
}

impl GlobMatcher {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            regex: glob_to_regex(pattern)?,
            dot_files: pattern.starts_with('.'),
        })
    }

    pub fn is_match(&self, name: &str) -> bool {
        (self.dot_files || !name.starts_with('.')) && self.regex.is_match(name)
    }
}

/// Translate a shell glob (`*`, `?`, `[...]`, `[!...]`) into an anchored regex
/// matched against a single file name.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::with_capacity(pattern.len() * 2 + 2);
    re.push('^');
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                if matches!(chars.peek(), Some('!') | Some('^')) {
                    chars.next();
                    class.push('^');
                }
                // A ']' right after the opening bracket is literal.
                if chars.peek() == Some(&']') {
                    chars.next();
                    class.push_str("\\]");
                }
                for ch in chars.by_ref() {
                    match ch {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '\\' | '[' | '&' | '~' => {
                            class.push('\\');
                            class.push(ch);
                        }
                        _ => class.push(ch),
                    }
                }
                if closed {
                    re.push('[');
                    re.push_str(&class);
                    re.push(']');
                } else {
                    // Unterminated class: the bracket is literal, as in the shell.
                    re.push_str(&regex::escape("["));
                    re.push_str(&regex::escape(class.trim_start_matches('^')));
                }
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Ok(Regex::new(&re)?)
}
