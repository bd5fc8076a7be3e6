//! Wildcard expansion against the remote tree
// (c) 2025 Ross Younger
//!
//! Patterns are `/`-separated. Each segment is either a literal name, a shell-style wildcard
//! (`*`, `?`, `[...]`), or exactly `**`, which matches the directory itself and everything
//! below it.
//!
//! Expansion is lazy: a directory is listed only when the caller pulls far enough to need it,
//! and the results come out depth-first in listing order. Dotfiles are hidden from wildcards
//! unless the wildcard itself starts with `.`, and are never visited by `**`.
//!
//! ```text
//! a/b.txt       yielded as-is, without asking the server
//! a/*.txt       one listing of `a`
//! */b.txt       one listing of the root, then a `STAT` of each `<dir>/b.txt`
//! a/**          `a`, then every visible descendant of `a`
//! **            every visible path; the session root itself (the empty path) is not yielded
//! **/*.txt      every visible directory is listed once; the walk and the `*.txt` share it
//! ```

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use futures_util::stream::{self, Stream};
use ::glob::{MatchOptions, Pattern};
use tracing::trace;

use crate::error::Error;
use crate::protocol::FileStatus;
use crate::session::TransferSession;
use crate::transport::MessageChannel;
use crate::util::path::{is_hidden, join_remote};

/// The remote operations wildcard expansion needs
#[async_trait]
pub trait RemoteFs: Send {
    /// Lists a directory. Entry paths are bare names.
    async fn list(&mut self, path: &str) -> Result<Vec<FileStatus>, Error>;
    /// Retrieves the status of a path, or `None` if it does not exist
    async fn stat(&mut self, path: &str) -> Result<Option<FileStatus>, Error>;
}

#[async_trait]
impl<C: MessageChannel> RemoteFs for TransferSession<C> {
    async fn list(&mut self, path: &str) -> Result<Vec<FileStatus>, Error> {
        TransferSession::list(self, path).await
    }

    async fn stat(&mut self, path: &str) -> Result<Option<FileStatus>, Error> {
        match TransferSession::stat(self, path).await {
            Ok(status) => Ok(Some(status)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Does this string contain any wildcard characters?
#[must_use]
pub fn has_magic(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// How one pattern segment is matched
#[derive(Debug)]
enum Matcher {
    /// A plain name: look it up with `stat`
    Literal(String),
    /// A wildcard: list the directory and filter
    Wildcard {
        pattern: Pattern,
        allow_hidden: bool,
    },
    /// `**`
    Recursive,
}

impl Matcher {
    fn new(segment: &str) -> Result<Self, Error> {
        if segment == "**" {
            Ok(Matcher::Recursive)
        } else if has_magic(segment) {
            let pattern = Pattern::new(segment).map_err(|e| Error::Pattern {
                pattern: segment.to_string(),
                message: e.msg.to_string(),
            })?;
            Ok(Matcher::Wildcard {
                pattern,
                allow_hidden: is_hidden(segment),
            })
        } else {
            Ok(Matcher::Literal(segment.to_string()))
        }
    }
}

/// State of a depth-first walk below a `**`
#[derive(Debug)]
struct Walk {
    /// The directory the walk started from, until it has been yielded
    root: Option<String>,
    /// A directory that has been yielded and whose children are due next
    to_list: Option<String>,
    /// Directories being walked, with their entries not yet visited
    dirs: Vec<(String, VecDeque<FileStatus>)>,
}

#[derive(Debug)]
enum Frame {
    /// Segment `level` has yet to be matched under `base`
    Pending { level: usize, base: String },
    /// Paths that matched segment `level`, not yet consumed
    Matched {
        level: usize,
        paths: VecDeque<String>,
    },
    /// A `**` at segment `level`, part way through
    Walking { level: usize, walk: Walk },
}

/// A lazy, forward-only expansion of one pattern. Create with [`Glob::new`].
#[derive(Debug)]
pub struct Glob<'a, F: RemoteFs + ?Sized> {
    fs: &'a mut F,
    matchers: Vec<Matcher>,
    stack: Vec<Frame>,
    /// Set when the pattern has no wildcards at all
    literal: Option<String>,
    /// Listings made below a `**` which the next segment has yet to reuse, or vice versa.
    /// `None` unless a `**` is followed by another listing segment.
    shared: Option<HashMap<String, Vec<FileStatus>>>,
}

impl<'a, F: RemoteFs + ?Sized> Glob<'a, F> {
    /// Prepares to expand `pattern` against `fs`. Nothing is sent until the first result
    /// is requested.
    ///
    /// Leading slashes and empty segments are ignored.
    pub fn new(fs: &'a mut F, pattern: &str) -> Result<Self, Error> {
        if !has_magic(pattern) {
            return Ok(Self {
                fs,
                matchers: Vec::new(),
                stack: Vec::new(),
                literal: Some(pattern.to_string()),
                shared: None,
            });
        }
        let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
        // a literal prefix is taken on trust
        let first_magic = segments
            .iter()
            .position(|s| has_magic(s))
            .unwrap_or(segments.len());
        let base = segments[..first_magic].join("/");
        let matchers = segments[first_magic..]
            .iter()
            .map(|s| Matcher::new(s))
            .collect::<Result<Vec<_>, _>>()?;
        let shared = matchers
            .windows(2)
            .any(|w| {
                matches!(
                    w,
                    [Matcher::Recursive, Matcher::Wildcard { .. } | Matcher::Recursive]
                )
            })
            .then(HashMap::new);
        Ok(Self {
            fs,
            matchers,
            stack: vec![Frame::Pending { level: 0, base }],
            literal: None,
            shared,
        })
    }

    /// Produces the next matching path, or `None` when the expansion is exhausted.
    ///
    /// After an error the expansion is abandoned and further calls return `None`.
    pub async fn next_path(&mut self) -> Option<Result<String, Error>> {
        if let Some(literal) = self.literal.take() {
            return Some(Ok(literal));
        }
        match self.advance().await {
            Ok(Some(path)) => Some(Ok(path)),
            Ok(None) => None,
            Err(e) => {
                self.stack.clear();
                Some(Err(e))
            }
        }
    }

    /// Drains the expansion into a vector
    pub async fn collect(mut self) -> Result<Vec<String>, Error> {
        let mut result = Vec::new();
        while let Some(path) = self.next_path().await {
            result.push(path?);
        }
        Ok(result)
    }

    /// Converts the expansion into a [`Stream`]
    pub fn into_stream(self) -> impl Stream<Item = Result<String, Error>> + 'a {
        stream::unfold(self, |mut glob| async move {
            let item = glob.next_path().await?;
            Some((item, glob))
        })
    }

    fn is_last(&self, level: usize) -> bool {
        level + 1 == self.matchers.len()
    }

    /// Runs the state machine until a complete match emerges
    async fn advance(&mut self) -> Result<Option<String>, Error> {
        while let Some(frame) = self.stack.pop() {
            let (level, found) = match frame {
                Frame::Pending { level, base } => {
                    let paths = self.expand(level, &base).await?;
                    match paths {
                        Some(paths) => self.stack.push(Frame::Matched { level, paths }),
                        None => self.stack.push(Frame::Walking {
                            level,
                            walk: Walk {
                                root: Some(base),
                                to_list: None,
                                dirs: Vec::new(),
                            },
                        }),
                    }
                    continue;
                }
                Frame::Matched { level, mut paths } => {
                    let Some(path) = paths.pop_front() else {
                        continue;
                    };
                    self.stack.push(Frame::Matched { level, paths });
                    (level, path)
                }
                Frame::Walking { level, mut walk } => {
                    let dironly = !self.is_last(level);
                    let Some(path) = self.walk_next(&mut walk, dironly).await? else {
                        continue;
                    };
                    self.stack.push(Frame::Walking { level, walk });
                    (level, path)
                }
            };
            if self.is_last(level) {
                return Ok(Some(found));
            }
            self.stack.push(Frame::Pending {
                level: level + 1,
                base: found,
            });
        }
        Ok(None)
    }

    /// Matches a literal or wildcard segment under `base`.
    /// Returns `None` for `**`, which is walked incrementally instead.
    async fn expand(
        &mut self,
        level: usize,
        base: &str,
    ) -> Result<Option<VecDeque<String>>, Error> {
        let dironly = !self.is_last(level);
        let paths = match &self.matchers[level] {
            Matcher::Recursive => return Ok(None),
            Matcher::Literal(name) => {
                let path = join_remote(base, name);
                trace!("stat {path:?}");
                match self.fs.stat(&path).await? {
                    Some(status) if !dironly || status.is_dir() => VecDeque::from([path]),
                    _ => VecDeque::new(),
                }
            }
            Matcher::Wildcard {
                pattern,
                allow_hidden,
            } => {
                let (pattern, allow_hidden) = (pattern.clone(), *allow_hidden);
                self.list_dir(base)
                    .await?
                    .into_iter()
                    .filter(|entry| {
                        let name = entry.name();
                        (allow_hidden || !is_hidden(name))
                            && (!dironly || entry.is_dir())
                            && pattern.matches_with(name, MATCH_OPTIONS)
                    })
                    .map(|entry| join_remote(base, entry.name()))
                    .collect()
            }
        };
        Ok(Some(paths))
    }

    /// One step of a `**` walk
    async fn walk_next(&mut self, walk: &mut Walk, dironly: bool) -> Result<Option<String>, Error> {
        if let Some(root) = walk.root.take() {
            walk.to_list = Some(root.clone());
            // the session root is only worth yielding as a base for later segments
            if !root.is_empty() || dironly {
                return Ok(Some(root));
            }
        }
        loop {
            if let Some(dir) = walk.to_list.take() {
                let entries = self.list_dir(&dir).await?;
                walk.dirs.push((dir, entries.into()));
            }
            let Some((dir, entries)) = walk.dirs.last_mut() else {
                return Ok(None);
            };
            let Some(entry) = entries.pop_front() else {
                let _ = walk.dirs.pop();
                continue;
            };
            if is_hidden(entry.name()) || (dironly && !entry.is_dir()) {
                continue;
            }
            let path = join_remote(dir, entry.name());
            if entry.is_dir() {
                walk.to_list = Some(path.clone());
            }
            return Ok(Some(path));
        }
    }

    /// Lists a directory; one that has vanished or turned out not to be a directory
    /// simply has no entries.
    async fn list_dir(&mut self, dir: &str) -> Result<Vec<FileStatus>, Error> {
        if let Some(entries) = self.shared.as_mut().and_then(|s| s.remove(dir)) {
            trace!("reuse listing of {dir:?}");
            return Ok(entries);
        }
        trace!("list {dir:?}");
        let entries = match self.fs.list(dir).await {
            Ok(entries) => entries,
            Err(Error::Remote(r))
                if r.is_not_found() || r.kind() == std::io::ErrorKind::NotADirectory =>
            {
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        if let Some(shared) = self.shared.as_mut() {
            let _ = shared.insert(dir.to_string(), entries.clone());
        }
        Ok(entries)
    }
}

impl<C: MessageChannel> TransferSession<C> {
    /// Expands a wildcard pattern against this session's tree. See [`Glob`].
    pub fn glob(&mut self, pattern: &str) -> Result<Glob<'_, Self>, Error> {
        Glob::new(self, pattern)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use std::collections::{BTreeMap, BTreeSet, HashMap};

    use async_trait::async_trait;
    use futures_util::StreamExt as _;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::{has_magic, Glob, RemoteFs};
    use crate::error::{Error, RemoteError};
    use crate::protocol::{FileKind, FileStatus};
    use crate::session::test_helpers::status;
    use crate::util::path::join_remote;

    /// An in-memory tree that counts what it is asked
    #[derive(Debug, Default)]
    struct FakeFs {
        /// directory path -> entries
        dirs: BTreeMap<String, Vec<FileStatus>>,
        lists: HashMap<String, usize>,
        stats: usize,
    }

    impl FakeFs {
        fn with_files(files: &[&str]) -> Self {
            let mut fs = FakeFs::default();
            let _ = fs.dirs.entry(String::new()).or_default();
            for file in files {
                let parts: Vec<&str> = file.split('/').collect();
                let mut dir = String::new();
                for (i, part) in parts.iter().enumerate() {
                    let is_file = i + 1 == parts.len();
                    let kind = if is_file {
                        FileKind::File
                    } else {
                        FileKind::Directory
                    };
                    let entries = fs.dirs.entry(dir.clone()).or_default();
                    if !entries.iter().any(|e| e.path == *part) {
                        entries.push(status(part, kind, 0));
                    }
                    dir = join_remote(&dir, part);
                    if !is_file {
                        let _ = fs.dirs.entry(dir.clone()).or_default();
                    }
                }
            }
            fs
        }

        fn not_found(path: &str) -> Error {
            RemoteError {
                errno: Some("ENOENT".into()),
                message: format!("{path}: not found"),
            }
            .into()
        }
    }

    #[async_trait]
    impl RemoteFs for FakeFs {
        async fn list(&mut self, path: &str) -> Result<Vec<FileStatus>, Error> {
            *self.lists.entry(path.to_string()).or_default() += 1;
            self.dirs
                .get(path)
                .cloned()
                .ok_or_else(|| Self::not_found(path))
        }

        async fn stat(&mut self, path: &str) -> Result<Option<FileStatus>, Error> {
            self.stats += 1;
            let (parent, name) = path.rsplit_once('/').unwrap_or(("", path));
            Ok(self
                .dirs
                .get(parent)
                .and_then(|entries| entries.iter().find(|e| e.path == name).cloned()))
        }
    }

    fn sample() -> FakeFs {
        FakeFs::with_files(&["a/x.txt", "a/b/y.txt", "a/.hidden.txt"])
    }

    async fn expand(fs: &mut FakeFs, pattern: &str) -> BTreeSet<String> {
        Glob::new(fs, pattern)
            .unwrap()
            .collect()
            .await
            .unwrap()
            .into_iter()
            .collect()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[rstest]
    #[case("a/**", &["a", "a/b", "a/x.txt", "a/b/y.txt"])]
    #[case("a/*.txt", &["a/x.txt"])]
    #[case("a/.*", &["a/.hidden.txt"])]
    #[case("*/x.txt", &["a/x.txt"])]
    #[case("*/b/*", &["a/b/y.txt"])]
    #[case("a/*", &["a/b", "a/x.txt"])]
    #[case("**/*.txt", &["a/x.txt", "a/b/y.txt"])]
    #[case("a/?.txt", &["a/x.txt"])]
    #[case("a/[xy].txt", &["a/x.txt"])]
    #[case("/a//*.txt", &["a/x.txt"])]
    #[case("nothing/*", &[])]
    #[tokio::test]
    async fn expansions(#[case] pattern: &str, #[case] expected: &[&str]) {
        let mut fs = sample();
        assert_eq!(expand(&mut fs, pattern).await, set(expected));
    }

    #[tokio::test]
    async fn literal_is_not_looked_up() {
        let mut fs = sample();
        assert_eq!(expand(&mut fs, "no/such/file").await, set(&["no/such/file"]));
        assert!(fs.lists.is_empty());
        assert_eq!(fs.stats, 0);
    }

    #[tokio::test]
    async fn recursive_walk_lists_each_directory_once() {
        let mut fs = sample();
        let _ = expand(&mut fs, "a/**").await;
        assert_eq!(fs.lists.get("a"), Some(&1));
        assert_eq!(fs.lists.get("a/b"), Some(&1));
        assert_eq!(fs.lists.len(), 2);
        assert_eq!(fs.stats, 0);
    }

    #[tokio::test]
    async fn recursive_prefix_shares_listings() {
        let mut fs = sample();
        assert_eq!(
            expand(&mut fs, "**/*.txt").await,
            set(&["a/x.txt", "a/b/y.txt"])
        );
        for dir in ["", "a", "a/b"] {
            assert_eq!(fs.lists.get(dir), Some(&1), "{dir:?}");
        }
        assert_eq!(fs.lists.len(), 3);
    }

    #[tokio::test]
    async fn expansion_is_lazy() {
        let mut fs = sample();
        let mut glob = Glob::new(&mut fs, "a/**").unwrap();
        assert_eq!(glob.next_path().await.unwrap().unwrap(), "a");
        drop(glob);
        // the parent was yielded without listing it
        assert!(fs.lists.is_empty());

        let mut glob = Glob::new(&mut fs, "a/**").unwrap();
        let _ = glob.next_path().await;
        let _ = glob.next_path().await;
        drop(glob);
        assert_eq!(fs.lists.get("a"), Some(&1));
        assert_eq!(fs.lists.get("a/b"), None);
    }

    #[tokio::test]
    async fn intermediate_segments_match_directories_only() {
        let mut fs = FakeFs::with_files(&["d/f", "file", "x/f"]);
        // `file` is not a directory, so `*/f` cannot match under it
        assert_eq!(expand(&mut fs, "*/f").await, set(&["d/f", "x/f"]));
        assert_eq!(fs.lists.get(""), Some(&1));
    }

    #[tokio::test]
    async fn recursion_from_the_root_includes_top_level() {
        let mut fs = FakeFs::with_files(&["top.txt", "d/deep.txt", "d/other.bin"]);
        assert_eq!(
            expand(&mut fs, "**/*.txt").await,
            set(&["top.txt", "d/deep.txt"])
        );
        assert_eq!(
            expand(&mut fs, "**").await,
            set(&["top.txt", "d", "d/deep.txt", "d/other.bin"])
        );
    }

    #[tokio::test]
    async fn session_root_is_not_yielded() {
        let mut fs = FakeFs::with_files(&["d/deep.txt"]);
        let found = expand(&mut fs, "**").await;
        assert!(!found.contains(""), "{found:?}");
        // but it still serves as the base of a following segment
        assert_eq!(expand(&mut fs, "**/d").await, set(&["d"]));
    }

    #[tokio::test]
    async fn stream_interface() {
        let mut fs = sample();
        let glob = Glob::new(&mut fs, "a/*.txt").unwrap();
        let results: Vec<_> = glob.into_stream().collect().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap(), "a/x.txt");
    }

    #[tokio::test]
    async fn bad_pattern() {
        let mut fs = sample();
        let result = Glob::new(&mut fs, "a/[");
        assert!(matches!(result, Err(Error::Pattern { .. })));
    }

    #[test]
    fn magic() {
        assert!(has_magic("*.txt"));
        assert!(has_magic("a?"));
        assert!(has_magic("[ab]"));
        assert!(!has_magic("plain/path.txt"));
    }
}
