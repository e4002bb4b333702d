//! Layouts: the outer document every page is wrapped in.
//!
//! A layout is a module whose default export is a layout function. It gets
//! the page's final variables, the stylesheet and script URLs collected for
//! the page, and the rendered page body as `children`. Layouts are looked up
//! by the `layout` variable (`"root"` unless overridden) and loaded at most
//! once per build, however many pages share them.
//!
//! When a site has no `root.layout.*`, the built-in default layout below is
//! used. It is plain maud: a document shell with the collected assets and the
//! page body in `<main>`.

use crate::compose::PageView;
use crate::module::{LayoutFn, LoadError, ModuleLoader, PluginResult, load_module};
use crate::site::LayoutEntry;
use crate::vars::Vars;
use maud::{DOCTYPE, Markup, PreEscaped, Render, html};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Class on the built-in layout's `<body>`.
pub const DEFAULT_LAYOUT_MARKER: &str = "pagesmith-default-layout";

pub const GENERATOR: &str = concat!("pagesmith ", env!("CARGO_PKG_VERSION"));

/// A stylesheet or script shipped inside the binary.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinAsset {
    /// Asset map key; also the output path before hashing.
    pub key: &'static str,
    pub contents: &'static str,
}

pub const DEFAULT_STYLE: BuiltinAsset = BuiltinAsset {
    key: "_pagesmith/default.style.css",
    contents: include_str!("../static/default.style.css"),
};

pub const DEFAULT_CLIENT: BuiltinAsset = BuiltinAsset {
    key: "_pagesmith/default.client.js",
    contents: include_str!("../static/default.client.js"),
};

/// Rendered page content: either a finished HTML string or structured markup.
#[derive(Debug, Clone)]
pub enum Content {
    Html(String),
    Markup(Markup),
}

impl Content {
    pub fn as_str(&self) -> &str {
        match self {
            Content::Html(html) => html,
            Content::Markup(markup) => &markup.0,
        }
    }

    pub fn into_html(self) -> String {
        match self {
            Content::Html(html) => html,
            Content::Markup(markup) => markup.into_string(),
        }
    }

    /// Flatten structured markup to a string, leaving strings alone.
    pub fn flattened(self) -> Content {
        Content::Html(self.into_html())
    }
}

impl Render for Content {
    fn render_to(&self, buffer: &mut String) {
        buffer.push_str(self.as_str());
    }
}

impl From<String> for Content {
    fn from(html: String) -> Self {
        Content::Html(html)
    }
}

impl From<&str> for Content {
    fn from(html: &str) -> Self {
        Content::Html(html.to_string())
    }
}

impl From<Markup> for Content {
    fn from(markup: Markup) -> Self {
        Content::Markup(markup)
    }
}

/// Everything a layout function gets.
pub struct LayoutContext<'a> {
    pub vars: &'a Vars,
    pub styles: &'a [String],
    pub scripts: &'a [String],
    pub children: Content,
    pub page: &'a PageView,
    pub pages: &'a [PageView],
}

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("Failed to load layout {file}")]
    Load {
        file: String,
        #[source]
        source: LoadError,
    },
    #[error("{file} must export a default layout function, found {found}")]
    NotALayout { file: String, found: &'static str },
}

type LayoutSlot = OnceLock<Result<LayoutFn, Arc<LayoutError>>>;

/// The site's layouts, each loaded on first use and shared afterwards.
pub struct LayoutSet {
    entries: BTreeMap<String, (LayoutEntry, LayoutSlot)>,
    loader: Arc<dyn ModuleLoader>,
}

impl LayoutSet {
    pub fn new(layouts: &BTreeMap<String, LayoutEntry>, loader: Arc<dyn ModuleLoader>) -> Self {
        let entries = layouts
            .iter()
            .map(|(name, entry)| (name.clone(), (entry.clone(), OnceLock::new())))
            .collect();
        Self { entries, loader }
    }

    pub fn entry(&self, name: &str) -> Option<&LayoutEntry> {
        self.entries.get(name).map(|(entry, _)| entry)
    }

    /// The layout function for `name`, or `None` if no such layout exists.
    pub fn resolve(&self, name: &str) -> Option<Result<LayoutFn, Arc<LayoutError>>> {
        let (entry, slot) = self.entries.get(name)?;
        Some(
            slot.get_or_init(|| load_layout(entry, self.loader.as_ref()).map_err(Arc::new))
                .clone(),
        )
    }
}

fn load_layout(entry: &LayoutEntry, loader: &dyn ModuleLoader) -> Result<LayoutFn, LayoutError> {
    let Some(file) = &entry.source else {
        return Ok(default_layout());
    };
    let module = load_module(loader, file).map_err(|source| LayoutError::Load {
        file: file.relative_path.clone(),
        source,
    })?;
    match module.default_export() {
        Some(crate::module::Export::Layout(layout)) => {
            tracing::debug!(layout = %entry.name, "loaded {}", file.relative_path);
            Ok(layout.clone())
        }
        other => Err(LayoutError::NotALayout {
            file: file.relative_path.clone(),
            found: other.map(|e| e.kind_name()).unwrap_or("nothing"),
        }),
    }
}

/// The built-in layout.
pub fn default_layout() -> LayoutFn {
    LayoutFn {
        render: Arc::new(render_default_layout),
        structured_children: true,
    }
}

fn render_default_layout(ctx: &LayoutContext<'_>) -> PluginResult<String> {
    let title = ctx.vars.get("title").and_then(Value::as_str).unwrap_or("");
    let lang = ctx.vars.get("lang").and_then(Value::as_str).unwrap_or("en");
    let full_title = match ctx.vars.get("siteName").and_then(Value::as_str) {
        Some(site) if title.is_empty() => site.to_string(),
        Some(site) if title != site => format!("{title} | {site}"),
        _ => title.to_string(),
    };
    let description = ctx.vars.get("description").and_then(Value::as_str);

    Ok(base_document(&full_title, lang, description, ctx).into_string())
}

fn base_document(
    title: &str,
    lang: &str,
    description: Option<&str>,
    ctx: &LayoutContext<'_>,
) -> Markup {
    html! {
        (DOCTYPE)
        html lang=(lang) {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                meta name="generator" content=(GENERATOR);
                @if let Some(description) = description {
                    meta name="description" content=(description);
                }
                title { (title) }
                @for href in ctx.styles {
                    link rel="stylesheet" href=(href);
                }
                @for src in ctx.scripts {
                    script type="module" src=(src) {}
                }
            }
            body class=(DEFAULT_LAYOUT_MARKER) {
                main.page {
                    (ctx.children)
                }
            }
        }
    }
}

/// Wrap a trusted HTML string for use inside maud templates.
pub fn raw(html: &str) -> PreEscaped<&str> {
    PreEscaped(html)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Export, Module, ModuleRegistry};
    use crate::walk::{PageKind, SourceFile};
    use serde_json::json;
    use std::path::Path;

    fn view() -> PageView {
        PageView {
            source: "README.md".into(),
            dir: String::new(),
            kind: PageKind::Markdown,
            output: "index.html".into(),
            url: "/".into(),
            vars: Vars::new(),
        }
    }

    fn render_with(layout: &LayoutFn, vars: &Vars, children: Content) -> String {
        let page = view();
        let styles = vec!["/global-1234abcd.css".to_string()];
        let scripts = vec!["/global.client-1234abcd.js".to_string()];
        let ctx = LayoutContext {
            vars,
            styles: &styles,
            scripts: &scripts,
            children,
            page: &page,
            pages: std::slice::from_ref(&page),
        };
        (layout.render)(&ctx).unwrap()
    }

    fn vars(value: Value) -> Vars {
        value.as_object().cloned().unwrap()
    }

    // =========================================================================
    // Default layout
    // =========================================================================

    #[test]
    fn default_layout_wraps_children() {
        let html = render_with(
            &default_layout(),
            &vars(json!({"title": "Hello"})),
            Content::from("<p>body</p>"),
        );
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Hello</title>"));
        assert!(html.contains(DEFAULT_LAYOUT_MARKER));
        assert!(html.contains("<main class=\"page\"><p>body</p></main>"));
    }

    #[test]
    fn default_layout_links_assets() {
        let html = render_with(&default_layout(), &Vars::new(), Content::from(""));
        assert!(html.contains(r#"<link rel="stylesheet" href="/global-1234abcd.css">"#));
        assert!(
            html.contains(r#"<script type="module" src="/global.client-1234abcd.js"></script>"#)
        );
    }

    #[test]
    fn default_layout_title_includes_site_name() {
        let html = render_with(
            &default_layout(),
            &vars(json!({"title": "Post", "siteName": "Blog"})),
            Content::from(""),
        );
        assert!(html.contains("<title>Post | Blog</title>"));

        let html = render_with(
            &default_layout(),
            &vars(json!({"siteName": "Blog"})),
            Content::from(""),
        );
        assert!(html.contains("<title>Blog</title>"));
    }

    #[test]
    fn default_layout_escapes_title() {
        let html = render_with(
            &default_layout(),
            &vars(json!({"title": "<script>"})),
            Content::from(""),
        );
        assert!(html.contains("<title>&lt;script&gt;</title>"));
    }

    #[test]
    fn structured_children_render_unescaped() {
        let markup = html! { p { "from " (raw("<em>maud</em>")) } };
        let html = render_with(&default_layout(), &Vars::new(), Content::from(markup));
        assert!(html.contains("<p>from <em>maud</em></p>"));
    }

    // =========================================================================
    // Layout set
    // =========================================================================

    fn entry(name: &str, source: Option<&str>) -> LayoutEntry {
        LayoutEntry {
            name: name.into(),
            source: source.map(|s| SourceFile::new(Path::new("/site"), s)),
            style: None,
            client: None,
        }
    }

    #[test]
    fn resolves_registered_layouts() {
        let registry = ModuleRegistry::new().with(
            "blog.layout.js",
            Module::new().with_default(Export::layout(|ctx| {
                Ok(format!("<article>{}</article>", ctx.children.as_str()))
            })),
        );
        let mut layouts = BTreeMap::new();
        layouts.insert("blog".to_string(), entry("blog", Some("blog.layout.js")));
        layouts.insert("root".to_string(), entry("root", None));
        let set = LayoutSet::new(&layouts, Arc::new(registry));

        let blog = set.resolve("blog").unwrap().unwrap();
        assert!(!blog.structured_children);
        let html = render_with(&blog, &Vars::new(), Content::from("x"));
        assert_eq!(html, "<article>x</article>");

        let root = set.resolve("root").unwrap().unwrap();
        assert!(root.structured_children);
        assert!(set.resolve("missing").is_none());
    }

    #[test]
    fn wrong_export_is_an_error() {
        let registry = ModuleRegistry::new().with(
            "root.layout.js",
            Module::new().with_default(Export::value(json!({}))),
        );
        let mut layouts = BTreeMap::new();
        layouts.insert("root".to_string(), entry("root", Some("root.layout.js")));
        let set = LayoutSet::new(&layouts, Arc::new(registry));

        let err = set.resolve("root").unwrap().unwrap_err();
        assert!(matches!(*err, LayoutError::NotALayout { found: "value", .. }));
    }

    #[test]
    fn content_conversions() {
        assert_eq!(Content::from("a").into_html(), "a");
        let markup = html! { b { "x" } };
        let content = Content::from(markup).flattened();
        assert!(matches!(content, Content::Html(ref s) if s == "<b>x</b>"));
    }
}
