//! The site model: what gets built, derived from the walked tree.
//!
//! Takes the grouped files from [`crate::walk`] and decides which files are
//! pages (and what attaches to them), which are layouts, templates and global
//! assets, and which are copied verbatim. Structural problems that would make
//! the output ambiguous (two page sources in one directory, two pages writing
//! the same file) are fatal; everything else degrades to a [`Warning`].
//!
//! The model never reads file contents.

use crate::walk::{FileGroups, PageKind, Role, SourceFile, classify};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The layout every page uses unless its vars say otherwise.
pub const ROOT_LAYOUT: &str = "root";

#[derive(Error, Debug)]
pub enum SiteError {
    #[error("conflicting page sources in {}: {}", dir_label(.dir), .files.join(", "))]
    PageConflict { dir: String, files: Vec<String> },
    #[error("{first} and {second} would both write {output}")]
    OutputCollision {
        output: String,
        first: String,
        second: String,
    },
}

fn dir_label(dir: &str) -> &str {
    if dir.is_empty() { "the source root" } else { dir }
}

/// Non-fatal findings, reported after the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum Warning {
    /// No `root.layout.*` exists; the built-in default layout is used.
    MissingRootLayout,
    /// A page source of a kind no builder is registered for.
    UnimplementedPageType { file: String, kind: PageKind },
    /// Two files claim the same role; the first (by name) is kept.
    DuplicateSource { kept: String, ignored: String },
    /// A `<name>.layout.css` or `.layout.client.*` with no layout of that name.
    OrphanedLayoutAsset { file: String, layout: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::MissingRootLayout => {
                write!(f, "no root layout found, using the built-in default layout")
            }
            Warning::UnimplementedPageType { file, kind } => {
                write!(f, "{file}: unimplemented page type `{kind}`, skipped")
            }
            Warning::DuplicateSource { kept, ignored } => {
                write!(f, "{ignored} duplicates {kept} and was ignored")
            }
            Warning::OrphanedLayoutAsset { file, layout } => {
                write!(f, "{file} has no matching layout `{layout}`")
            }
        }
    }
}

/// A page and the files attached to it.
#[derive(Debug, Clone, Serialize)]
pub struct PageEntry {
    pub source: SourceFile,
    pub kind: PageKind,
    pub style: Option<SourceFile>,
    pub client: Option<SourceFile>,
    pub vars: Option<SourceFile>,
    /// Relative output directory.
    pub output_dir: String,
    /// `index.html` for canonical pages, `<stem>.html` for loose markdown.
    pub output_name: String,
}

impl PageEntry {
    /// `/`-separated output path relative to the destination.
    pub fn output_path(&self) -> String {
        join_relative(&self.output_dir, &self.output_name)
    }

    /// Site-absolute URL of the page.
    pub fn url(&self) -> String {
        let dir = if self.output_dir.is_empty() {
            "/".to_string()
        } else {
            format!("/{}/", self.output_dir)
        };
        if self.output_name == INDEX_FILE {
            dir
        } else {
            format!("{dir}{}", self.output_name)
        }
    }

    pub fn is_loose(&self) -> bool {
        self.output_name != INDEX_FILE
    }
}

const INDEX_FILE: &str = "index.html";

/// A layout by name. `source` is `None` for the built-in default layout.
#[derive(Debug, Clone, Serialize)]
pub struct LayoutEntry {
    pub name: String,
    pub source: Option<SourceFile>,
    pub style: Option<SourceFile>,
    pub client: Option<SourceFile>,
}

impl LayoutEntry {
    pub fn builtin(name: &str) -> Self {
        Self {
            name: name.to_string(),
            source: None,
            style: None,
            client: None,
        }
    }

    pub fn is_builtin(&self) -> bool {
        self.source.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateEntry {
    pub source: SourceFile,
    /// Relative directory the template lives in.
    pub output_dir: String,
    /// Default output name (`feed.xml.template.js` → `feed.xml`).
    pub output_name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GlobalAssets {
    pub style: Option<SourceFile>,
    pub client: Option<SourceFile>,
    pub vars: Option<SourceFile>,
    pub bundler_settings: Option<SourceFile>,
    pub markdown_settings: Option<SourceFile>,
}

/// Everything a build will produce, minus the contents.
#[derive(Debug, Clone, Serialize)]
pub struct SiteModel {
    pub root: PathBuf,
    pub pages: Vec<PageEntry>,
    pub layouts: BTreeMap<String, LayoutEntry>,
    pub templates: Vec<TemplateEntry>,
    pub globals: GlobalAssets,
    /// Files with no build role, copied as-is.
    pub static_files: Vec<SourceFile>,
    pub warnings: Vec<Warning>,
}

impl SiteModel {
    pub fn page(&self, relative_source: &str) -> Option<&PageEntry> {
        self.pages
            .iter()
            .find(|page| page.source.relative_path == relative_source)
    }
}

/// Per-directory attachments collected while classifying.
#[derive(Default)]
struct DirectoryFiles<'a> {
    canonical: Vec<(&'a SourceFile, PageKind)>,
    loose: Vec<&'a SourceFile>,
    style: Option<SourceFile>,
    client: Option<SourceFile>,
    vars: Option<SourceFile>,
}

/// Build the site model from walked files.
///
/// `supported` lists the page kinds that have a registered builder; pages of
/// any other kind are dropped with a warning.
pub fn build_site_model(
    root: &Path,
    groups: &FileGroups,
    supported: &BTreeSet<PageKind>,
) -> Result<SiteModel, SiteError> {
    let mut warnings = Vec::new();
    let mut pages = Vec::new();
    let mut templates = Vec::new();
    let mut globals = GlobalAssets::default();
    let mut static_files = Vec::new();
    let mut layouts: BTreeMap<String, LayoutEntry> = BTreeMap::new();
    let mut layout_styles: Vec<(String, SourceFile)> = Vec::new();
    let mut layout_clients: Vec<(String, SourceFile)> = Vec::new();

    for (dir, files) in groups {
        let mut found = DirectoryFiles::default();

        for file in files.values() {
            match classify(&file.basename, dir.is_empty()) {
                Some(Role::PageSource(kind)) => found.canonical.push((file, kind)),
                Some(Role::LoosePage) => found.loose.push(file),
                Some(Role::PageStyle) => keep_first(&mut found.style, file, &mut warnings),
                Some(Role::PageClient) => keep_first(&mut found.client, file, &mut warnings),
                Some(Role::PageVars) => keep_first(&mut found.vars, file, &mut warnings),
                Some(Role::GlobalStyle) => keep_first(&mut globals.style, file, &mut warnings),
                Some(Role::GlobalClient) => keep_first(&mut globals.client, file, &mut warnings),
                Some(Role::GlobalVars) => keep_first(&mut globals.vars, file, &mut warnings),
                Some(Role::BundlerSettings) => {
                    keep_first(&mut globals.bundler_settings, file, &mut warnings)
                }
                Some(Role::MarkdownSettings) => {
                    keep_first(&mut globals.markdown_settings, file, &mut warnings)
                }
                Some(Role::Layout(name)) => match layouts.get(&name) {
                    Some(existing) => warnings.push(Warning::DuplicateSource {
                        kept: existing
                            .source
                            .as_ref()
                            .map(|s| s.relative_path.clone())
                            .unwrap_or_default(),
                        ignored: file.relative_path.clone(),
                    }),
                    None => {
                        layouts.insert(
                            name.clone(),
                            LayoutEntry {
                                name,
                                source: Some(file.clone()),
                                style: None,
                                client: None,
                            },
                        );
                    }
                },
                Some(Role::LayoutStyle(name)) => layout_styles.push((name, file.clone())),
                Some(Role::LayoutClient(name)) => layout_clients.push((name, file.clone())),
                Some(Role::Template(name)) => templates.push(TemplateEntry {
                    source: file.clone(),
                    output_dir: dir.clone(),
                    output_name: name,
                }),
                None => static_files.push(file.clone()),
            }
        }

        if found.canonical.len() > 1 {
            return Err(SiteError::PageConflict {
                dir: dir.clone(),
                files: found
                    .canonical
                    .iter()
                    .map(|(file, _)| file.basename.clone())
                    .collect(),
            });
        }

        match found.canonical.first() {
            Some(&(source, kind)) => pages.push(PageEntry {
                source: source.clone(),
                kind,
                style: found.style.take(),
                client: found.client.take(),
                vars: found.vars.take(),
                output_dir: dir.clone(),
                output_name: INDEX_FILE.to_string(),
            }),
            // Page attachments without a page are ordinary files.
            None => static_files.extend(
                [found.style.take(), found.client.take(), found.vars.take()]
                    .into_iter()
                    .flatten(),
            ),
        }

        for loose in &found.loose {
            let stem = loose
                .basename
                .strip_suffix(".md")
                .unwrap_or(&loose.basename);
            pages.push(PageEntry {
                source: (*loose).clone(),
                kind: PageKind::Markdown,
                style: None,
                client: None,
                vars: None,
                output_dir: dir.clone(),
                output_name: format!("{stem}.html"),
            });
        }
    }

    if !layouts.contains_key(ROOT_LAYOUT) {
        warnings.push(Warning::MissingRootLayout);
        layouts.insert(ROOT_LAYOUT.to_string(), LayoutEntry::builtin(ROOT_LAYOUT));
    }

    for (name, file) in layout_styles {
        match layouts.get_mut(&name) {
            Some(layout) => keep_first(&mut layout.style, &file, &mut warnings),
            None => warnings.push(Warning::OrphanedLayoutAsset {
                file: file.relative_path,
                layout: name,
            }),
        }
    }
    for (name, file) in layout_clients {
        match layouts.get_mut(&name) {
            Some(layout) => keep_first(&mut layout.client, &file, &mut warnings),
            None => warnings.push(Warning::OrphanedLayoutAsset {
                file: file.relative_path,
                layout: name,
            }),
        }
    }

    pages.retain(|page| {
        let keep = supported.contains(&page.kind);
        if !keep {
            warnings.push(Warning::UnimplementedPageType {
                file: page.source.relative_path.clone(),
                kind: page.kind,
            });
        }
        keep
    });
    pages.sort_by(|a, b| a.source.relative_path.cmp(&b.source.relative_path));

    check_output_collisions(&pages)?;

    tracing::debug!(
        pages = pages.len(),
        layouts = layouts.len(),
        templates = templates.len(),
        static_files = static_files.len(),
        warnings = warnings.len(),
        "site model built"
    );

    Ok(SiteModel {
        root: root.to_path_buf(),
        pages,
        layouts,
        templates,
        globals,
        static_files,
        warnings,
    })
}

fn keep_first(slot: &mut Option<SourceFile>, file: &SourceFile, warnings: &mut Vec<Warning>) {
    match slot {
        Some(kept) => warnings.push(Warning::DuplicateSource {
            kept: kept.relative_path.clone(),
            ignored: file.relative_path.clone(),
        }),
        None => *slot = Some(file.clone()),
    }
}

fn check_output_collisions(pages: &[PageEntry]) -> Result<(), SiteError> {
    let mut outputs: BTreeMap<String, &str> = BTreeMap::new();
    for page in pages {
        let output = page.output_path();
        if let Some(first) = outputs.insert(output.clone(), &page.source.relative_path) {
            return Err(SiteError::OutputCollision {
                output,
                first: first.to_string(),
                second: page.source.relative_path.clone(),
            });
        }
    }
    Ok(())
}

/// Join two relative `/`-separated paths.
pub fn join_relative(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}
