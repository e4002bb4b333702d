//! Source tree walking and file classification.
//!
//! The first step of every build. The walker reads the source directory once
//! and groups every non-ignored file by its parent directory; the classifier
//! then assigns each file a [`Role`] purely from its basename. Nothing here
//! reads file contents.
//!
//! ## Directory Conventions
//!
//! ```text
//! src/
//! ├── README.md                 # Root page (markdown)
//! ├── global.css                # Site-wide stylesheet       (root only)
//! ├── global.client.js          # Site-wide client script    (root only)
//! ├── global.vars.json          # Site-wide variables        (root only)
//! ├── root.layout.js            # The root layout
//! ├── root.layout.css           # Stylesheet for the root layout
//! ├── esbuild.settings.js       # Bundler options hook       (root only)
//! ├── markdown-it.settings.js   # Markdown renderer hook     (root only)
//! ├── feed.xml.template.js      # Template → feed.xml
//! ├── notes.md                  # Loose page → notes.html
//! └── blog/
//!     ├── page.js               # Page source (script)
//!     ├── page.vars.js          # Page variables
//!     ├── style.css             # Page stylesheet
//!     └── client.js             # Page client script
//! ```
//!
//! A directory may hold at most one canonical page source (`README.md`,
//! `page.js` or `page.html`); detecting a second one is the site model's job.
//!
//! ## Ignore Patterns
//!
//! Patterns follow gitignore conventions: a pattern without a slash matches
//! at any depth, a leading slash anchors it to the source root, a trailing
//! slash restricts it to directories, and `!` re-includes a previously
//! ignored path. Ignored directories are pruned without being read.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;
use wax::{Glob, Pattern};

#[derive(Error, Debug)]
pub enum WalkError {
    #[error("Unable to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("Invalid ignore pattern `{pattern}`: {message}")]
    Pattern { pattern: String, message: String },
}

/// Patterns ignored by every build, before user patterns are applied.
pub const DEFAULT_IGNORES: &[&str] = &[
    ".*",
    "node_modules",
    "package.json",
    "package-lock.json",
    "npm-shrinkwrap.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Cargo.lock",
    "/pagesmith.toml",
];

/// How a page's source is turned into HTML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PageKind {
    Markdown,
    Script,
    Html,
}

impl PageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PageKind::Markdown => "markdown",
            PageKind::Script => "script",
            PageKind::Html => "html",
        }
    }
}

impl std::fmt::Display for PageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file discovered by the walker. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFile {
    /// Location on disk.
    pub path: PathBuf,
    /// Path relative to the source root, `/`-separated (`blog/page.js`).
    pub relative_path: String,
    pub basename: String,
    /// Relative parent directory; empty for files at the source root.
    pub parent: String,
    /// Path relative to the source root exactly as named on disk. Differs
    /// from `relative_path` only for names that are not valid UTF-8.
    #[serde(skip)]
    pub disk_relative: PathBuf,
}

impl SourceFile {
    pub fn new(root: &Path, relative_path: &str) -> Self {
        let relative_path = relative_path.trim_start_matches('/').to_string();
        let (parent, basename) = match relative_path.rsplit_once('/') {
            Some((parent, basename)) => (parent.to_string(), basename.to_string()),
            None => (String::new(), relative_path.clone()),
        };
        let disk_relative: PathBuf = relative_path.split('/').collect();
        Self {
            path: root.join(&disk_relative),
            relative_path,
            basename,
            parent,
            disk_relative,
        }
    }

    /// A file found on disk at `path` under `root`.
    pub fn on_disk(root: &Path, path: &Path) -> Self {
        let mut file = Self::new(root, &relative_path(root, path));
        if let Ok(relative) = path.strip_prefix(root) {
            file.disk_relative = relative.to_path_buf();
            file.path = path.to_path_buf();
        }
        file
    }

    pub fn extension(&self) -> Option<&str> {
        self.basename.rsplit_once('.').map(|(_, ext)| ext)
    }
}

/// Files grouped by relative directory, then by basename.
///
/// The source root is always present under the empty-string key.
pub type FileGroups = BTreeMap<String, BTreeMap<String, SourceFile>>;

struct IgnoreRule {
    glob: Glob<'static>,
    negated: bool,
    dir_only: bool,
}

/// A compiled list of gitignore-style patterns. The last matching pattern wins.
#[derive(Default)]
pub struct IgnoreSet {
    rules: Vec<IgnoreRule>,
    patterns: Vec<String>,
}

impl std::fmt::Debug for IgnoreSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("IgnoreSet").field(&self.patterns).finish()
    }
}

impl IgnoreSet {
    /// The default ignore set followed by `extra` patterns.
    pub fn with_defaults<I, S>(extra: I) -> Result<Self, WalkError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for pattern in DEFAULT_IGNORES {
            set.push(pattern)?;
        }
        for pattern in extra {
            set.push(pattern.as_ref())?;
        }
        Ok(set)
    }

    pub fn push(&mut self, pattern: &str) -> Result<(), WalkError> {
        if let Some(rule) = compile_rule(pattern)? {
            self.rules.push(rule);
            self.patterns.push(pattern.to_string());
        }
        Ok(())
    }

    /// Ignore a directory inside the source root, given relative to it.
    pub fn push_directory(&mut self, relative: &str) -> Result<(), WalkError> {
        let relative = relative.trim_matches('/');
        if relative.is_empty() {
            return Ok(());
        }
        self.push(&format!("/{relative}/"))
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_ignored(&self, relative: &str, is_dir: bool) -> bool {
        let mut ignored = false;
        for rule in &self.rules {
            if rule.dir_only && !is_dir {
                continue;
            }
            if rule.glob.is_match(relative) {
                ignored = !rule.negated;
            }
        }
        ignored
    }
}

fn compile_rule(pattern: &str) -> Result<Option<IgnoreRule>, WalkError> {
    let trimmed = pattern.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let (negated, body) = match trimmed.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let dir_only = body.ends_with('/');
    let body = body.trim_end_matches('/');
    let anchored = body.contains('/');
    let body = body.trim_start_matches('/');
    if body.is_empty() {
        return Ok(None);
    }

    let expression = if anchored || body.starts_with("**") {
        body.to_string()
    } else {
        format!("**/{body}")
    };
    let glob = Glob::new(&expression)
        .map(Glob::into_owned)
        .map_err(|err| WalkError::Pattern {
            pattern: pattern.to_string(),
            message: err.to_string(),
        })?;

    Ok(Some(IgnoreRule {
        glob,
        negated,
        dir_only,
    }))
}

/// Walk `root` and group every non-ignored file by parent directory.
///
/// Any unreadable entry fails the whole walk.
pub fn walk(root: &Path, ignore: &IgnoreSet) -> Result<FileGroups, WalkError> {
    let mut groups = FileGroups::new();
    groups.insert(String::new(), BTreeMap::new());

    let entries = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let relative = relative_path(root, entry.path());
            !ignore.is_ignored(&relative, entry.file_type().is_dir())
        });

    for entry in entries {
        let entry = entry.map_err(|source| {
            let path = source
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.to_path_buf());
            WalkError::Io { path, source }
        })?;

        let relative = relative_path(root, entry.path());
        if entry.file_type().is_dir() {
            groups.entry(relative).or_default();
            continue;
        }

        let file = SourceFile::on_disk(root, entry.path());
        groups
            .entry(file.parent.clone())
            .or_default()
            .insert(file.basename.clone(), file);
    }

    tracing::debug!(
        directories = groups.len(),
        files = groups.values().map(BTreeMap::len).sum::<usize>(),
        "walked {}",
        root.display()
    );
    Ok(groups)
}

/// `/`-separated path of `path` relative to `root`.
pub fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

// ============================================================================
// Classification
// ============================================================================

/// What a file contributes to the site, derived from its basename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// The directory's canonical page (`README.md`, `page.js`, `page.html`).
    PageSource(PageKind),
    /// Any other markdown file, rendered standalone.
    LoosePage,
    PageStyle,
    PageClient,
    PageVars,
    GlobalStyle,
    GlobalClient,
    GlobalVars,
    BundlerSettings,
    MarkdownSettings,
    Layout(String),
    LayoutStyle(String),
    LayoutClient(String),
    /// A template; carries the output name (`feed.xml.template.js` → `feed.xml`).
    Template(String),
}

const SCRIPT_EXTENSIONS: &[&str] = &["js", "ts"];
const CLIENT_EXTENSIONS: &[&str] = &["js", "ts", "tsx"];
const VARS_EXTENSIONS: &[&str] = &["js", "ts", "json", "toml", "yaml", "yml"];

/// Classify a basename. Root-only roles are only recognized when `at_root`.
///
/// Returns `None` for files with no build role; those are copied verbatim.
pub fn classify(basename: &str, at_root: bool) -> Option<Role> {
    match basename {
        "README.md" => return Some(Role::PageSource(PageKind::Markdown)),
        "page.js" => return Some(Role::PageSource(PageKind::Script)),
        "page.html" => return Some(Role::PageSource(PageKind::Html)),
        "style.css" => return Some(Role::PageStyle),
        _ => {}
    }
    if has_stem(basename, "client", CLIENT_EXTENSIONS) {
        return Some(Role::PageClient);
    }
    if has_stem(basename, "page.vars", VARS_EXTENSIONS) {
        return Some(Role::PageVars);
    }

    if at_root {
        if basename == "global.css" {
            return Some(Role::GlobalStyle);
        }
        if has_stem(basename, "global.client", SCRIPT_EXTENSIONS) {
            return Some(Role::GlobalClient);
        }
        if has_stem(basename, "global.vars", VARS_EXTENSIONS) {
            return Some(Role::GlobalVars);
        }
        if has_stem(basename, "esbuild.settings", SCRIPT_EXTENSIONS) {
            return Some(Role::BundlerSettings);
        }
        if basename == "markdown-it.settings.js" {
            return Some(Role::MarkdownSettings);
        }
    }

    if let Some(name) = named_role(basename, "layout.client", SCRIPT_EXTENSIONS) {
        return Some(Role::LayoutClient(name.to_string()));
    }
    if let Some(name) = named_role(basename, "layout", &["css"]) {
        return Some(Role::LayoutStyle(name.to_string()));
    }
    if let Some(name) = named_role(basename, "layout", SCRIPT_EXTENSIONS) {
        return Some(Role::Layout(name.to_string()));
    }
    if let Some(name) = named_role(basename, "template", SCRIPT_EXTENSIONS) {
        return Some(Role::Template(name.to_string()));
    }

    if basename.ends_with(".md") {
        return Some(Role::LoosePage);
    }
    None
}

/// `stem.<ext>` for one of `extensions`.
fn has_stem(basename: &str, stem: &str, extensions: &[&str]) -> bool {
    basename
        .strip_prefix(stem)
        .and_then(|rest| rest.strip_prefix('.'))
        .is_some_and(|ext| extensions.contains(&ext))
}

/// `<name>.<infix>.<ext>` → `name`, for a non-empty name.
fn named_role<'a>(basename: &'a str, infix: &str, extensions: &[&str]) -> Option<&'a str> {
    extensions.iter().find_map(|ext| {
        basename
            .strip_suffix(ext)
            .and_then(|rest| rest.strip_suffix('.'))
            .and_then(|rest| rest.strip_suffix(infix))
            .and_then(|rest| rest.strip_suffix('.'))
            .filter(|name| !name.is_empty())
    })
}
