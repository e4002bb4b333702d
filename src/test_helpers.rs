//! Shared test utilities for the pagesmith test suite.
//!
//! Builders for the small structs most unit tests need (`PageEntry`,
//! `PageView`, `RenderContext`) plus filesystem helpers for temp-dir sites.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! write_file(tmp.path(), "blog/README.md", "# Blog");
//!
//! let page = page_entry(tmp.path(), "blog/README.md", PageKind::Markdown);
//! let view = page_view("blog/README.md");
//! let html = (built.render)(&render_context(&view)).unwrap();
//! ```

use std::fs;
use std::path::Path;

use crate::compose::{PageView, RenderContext};
use crate::site::{PageEntry, join_relative};
use crate::vars::Vars;
use crate::walk::{PageKind, SourceFile};

// =========================================================================
// Filesystem
// =========================================================================

/// Write `contents` to `root/relative`, creating parent directories.
pub fn write_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, contents).unwrap();
}

// =========================================================================
// Model builders
// =========================================================================

/// A page entry with no attachments.
///
/// `README.md` and `page.*` sources get `index.html`; any other markdown file
/// is treated as loose and gets `<stem>.html`.
pub fn page_entry(root: &Path, relative: &str, kind: PageKind) -> PageEntry {
    let source = SourceFile::new(root, relative);
    let canonical = source.basename == "README.md" || source.basename.starts_with("page.");
    let output_name = if canonical {
        "index.html".to_string()
    } else {
        let stem = source
            .basename
            .rsplit_once('.')
            .map_or(source.basename.as_str(), |(stem, _)| stem);
        format!("{stem}.html")
    };
    PageEntry {
        output_dir: source.parent.clone(),
        output_name,
        source,
        kind,
        style: None,
        client: None,
        vars: None,
    }
}

/// A page view for a canonical page, with empty vars.
pub fn page_view(relative: &str) -> PageView {
    let source = SourceFile::new(Path::new("/site"), relative);
    let kind = match source.extension() {
        Some("md") => PageKind::Markdown,
        Some("html") => PageKind::Html,
        _ => PageKind::Script,
    };
    let url = if source.parent.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", source.parent)
    };
    PageView {
        output: join_relative(&source.parent, "index.html"),
        dir: source.parent,
        source: source.relative_path,
        kind,
        url,
        vars: Vars::new(),
    }
}

/// A render context for `view` with no assets, where the page is its own
/// only sibling.
pub fn render_context(view: &PageView) -> RenderContext<'_> {
    RenderContext {
        vars: &view.vars,
        styles: &[],
        scripts: &[],
        page: view,
        pages: std::slice::from_ref(view),
    }
}
