//! Markdown rendering.
//!
//! Uses pulldown-cmark with GFM extensions. On top of plain rendering the
//! renderer:
//!
//! - rewrites relative links to other markdown files so they point at the
//!   built pages (`notes.md` → `notes/`, or `notes.html` with pretty URLs off,
//!   `guide/README.md` → `guide/`);
//! - gives headings slug ids (`## Getting Started` → `id="getting-started"`);
//! - runs registered [`MarkdownPlugin`]s over the event stream.
//!
//! A site can reconfigure the renderer through a root-level
//! `markdown-it.settings.js` hook, which receives the default renderer and
//! returns the one to use.
//!
//! Also home to the front matter splitter and title inference used by the
//! markdown page builder.

use crate::config::MarkdownConfig;
use crate::module::{Export, ModuleLoader, SettingsError, call_plugin, load_settings_export};
use crate::vars::{Vars, json_type_name};
use crate::walk::SourceFile;
use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, TagEnd, html::push_html};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Rewrites a markdown event stream before it is turned into HTML.
pub trait MarkdownPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn transform<'a>(&self, events: Vec<Event<'a>>) -> Vec<Event<'a>>;
}

/// The renderer shared by every markdown page in a build.
#[derive(Clone)]
pub struct MarkdownRenderer {
    pub options: Options,
    pub pretty_urls: bool,
    pub heading_anchors: bool,
    plugins: Vec<Arc<dyn MarkdownPlugin>>,
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new(&MarkdownConfig::default())
    }
}

impl std::fmt::Debug for MarkdownRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkdownRenderer")
            .field("pretty_urls", &self.pretty_urls)
            .field("heading_anchors", &self.heading_anchors)
            .field("plugins", &self.plugin_names())
            .finish()
    }
}

impl MarkdownRenderer {
    pub fn new(config: &MarkdownConfig) -> Self {
        Self {
            options: Options::ENABLE_TABLES
                | Options::ENABLE_FOOTNOTES
                | Options::ENABLE_STRIKETHROUGH
                | Options::ENABLE_TASKLISTS
                | Options::ENABLE_GFM,
            pretty_urls: config.pretty_urls,
            heading_anchors: config.heading_anchors,
            plugins: Vec::new(),
        }
    }

    pub fn with_plugin(mut self, plugin: impl MarkdownPlugin + 'static) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Render markdown (without front matter) to an HTML fragment.
    pub fn render(&self, source: &str) -> String {
        let pretty_urls = self.pretty_urls;
        let mut events: Vec<Event> = Parser::new_ext(source, self.options)
            .map(|event| rewrite_link_event(event, pretty_urls))
            .collect();
        if self.heading_anchors {
            events = inject_heading_ids(events);
        }
        for plugin in &self.plugins {
            events = plugin.transform(events);
        }

        let mut html = String::with_capacity(source.len() * 3 / 2);
        push_html(&mut html, events.into_iter());
        html
    }
}

/// Build the renderer for a site, applying its settings hook if present.
///
/// A failing hook is fatal.
pub fn load_renderer(
    loader: &dyn ModuleLoader,
    hook: Option<&SourceFile>,
    config: &MarkdownConfig,
) -> Result<MarkdownRenderer, SettingsError> {
    let renderer = MarkdownRenderer::new(config);
    let Some(file) = hook else {
        return Ok(renderer);
    };
    match load_settings_export(loader, file)? {
        Some(Export::Markdown(f)) => {
            let renderer = call_plugin(|| f(renderer)).map_err(|source| SettingsError::Hook {
                file: file.relative_path.clone(),
                source,
            })?;
            tracing::debug!(plugins = ?renderer.plugin_names(), "markdown settings applied");
            Ok(renderer)
        }
        other => Err(SettingsError::WrongExport {
            file: file.relative_path.clone(),
            expected: "markdown hook",
            found: other.as_ref().map(Export::kind_name).unwrap_or("nothing"),
        }),
    }
}

// ============================================================================
// Link rewriting
// ============================================================================

fn rewrite_link_event(event: Event<'_>, pretty_urls: bool) -> Event<'_> {
    match event {
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) => {
            let dest_url = match rewrite_markdown_link(&dest_url, pretty_urls) {
                Some(rewritten) => CowStr::from(rewritten),
                None => dest_url,
            };
            Event::Start(Tag::Link {
                link_type,
                dest_url,
                title,
                id,
            })
        }
        other => other,
    }
}

/// Map a relative link to a markdown file onto the page it builds.
///
/// Returns `None` for links that are left alone: absolute, external,
/// fragment-only, or not pointing at a `.md`/`.markdown` file.
pub fn rewrite_markdown_link(link: &str, pretty_urls: bool) -> Option<String> {
    if link.starts_with('/') || link.starts_with('#') || has_scheme(link) {
        return None;
    }

    let split = link.find(['#', '?']).unwrap_or(link.len());
    let (path, suffix) = link.split_at(split);
    let lower = path.to_ascii_lowercase();
    let extension_len = if lower.ends_with(".md") {
        3
    } else if lower.ends_with(".markdown") {
        9
    } else {
        return None;
    };
    let name = &path[..path.len() - extension_len];

    let is_readme = name
        .get(name.len().saturating_sub(6)..)
        .is_some_and(|tail| tail.eq_ignore_ascii_case("readme"));
    let rewritten = if is_readme {
        let prefix = &name[..name.len() - 6];
        if prefix.is_empty() {
            "/".to_string()
        } else if prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{prefix}/")
        }
    } else if pretty_urls {
        format!("{name}/")
    } else {
        format!("{name}.html")
    };
    Some(format!("{rewritten}{suffix}"))
}

fn has_scheme(link: &str) -> bool {
    if link.starts_with("//") {
        return true;
    }
    match link.split_once(':') {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && !scheme.contains('/')
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

// ============================================================================
// Heading ids
// ============================================================================

/// Lowercases, replaces non-alphanumeric runs with hyphens, strips
/// leading/trailing hyphens.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut prev_hyphen = true;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
            prev_hyphen = false;
        } else if !prev_hyphen {
            slug.push('-');
            prev_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Set an `id` on every heading that has none. Repeated slugs get a
/// numeric suffix.
fn inject_heading_ids(events: Vec<Event<'_>>) -> Vec<Event<'_>> {
    let mut out = Vec::with_capacity(events.len());
    let mut open_heading: Option<usize> = None;
    let mut heading_text = String::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for event in events {
        match &event {
            Event::Start(Tag::Heading { .. }) => {
                open_heading = Some(out.len());
                heading_text.clear();
            }
            Event::Text(text) | Event::Code(text) if open_heading.is_some() => {
                heading_text.push_str(text);
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(index) = open_heading.take() {
                    if let Event::Start(Tag::Heading { id: id @ None, .. }) = &mut out[index] {
                        let slug = slugify(&heading_text);
                        if !slug.is_empty() {
                            *id = Some(CowStr::from(unique_slug(slug, &mut seen)));
                        }
                    }
                }
            }
            _ => {}
        }
        out.push(event);
    }
    out
}

fn unique_slug(slug: String, seen: &mut HashMap<String, usize>) -> String {
    let count = seen.entry(slug.clone()).or_insert(0);
    *count += 1;
    if *count == 1 {
        slug
    } else {
        format!("{slug}-{}", *count - 1)
    }
}

// ============================================================================
// Front matter and titles
// ============================================================================

#[derive(Error, Debug)]
pub enum FrontMatterError {
    #[error("invalid YAML")]
    Yaml(#[from] serde_yaml::Error),
    #[error("front matter must be a mapping, found {0}")]
    NotAMapping(&'static str),
}

/// Split a leading `---` delimited front matter block from a document.
///
/// Returns `(None, source)` when there is no complete block.
pub fn split_front_matter(source: &str) -> (Option<&str>, &str) {
    let Some(rest) = source
        .strip_prefix("---")
        .and_then(|r| r.strip_prefix("\r\n").or_else(|| r.strip_prefix('\n')))
    else {
        return (None, source);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "---" {
            return (Some(&rest[..offset]), &rest[offset + line.len()..]);
        }
        offset += line.len();
    }
    (None, source)
}

/// Parse a front matter block into variables.
pub fn parse_front_matter(front: &str) -> Result<Vars, FrontMatterError> {
    if front.trim().is_empty() {
        return Ok(Vars::new());
    }
    match serde_yaml::from_str::<Value>(front)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Vars::new()),
        other => Err(FrontMatterError::NotAMapping(json_type_name(&other))),
    }
}

/// The text of the first `<h1>` in rendered HTML, tags stripped.
pub fn first_heading_text(html: &str) -> Option<String> {
    let mut search = 0;
    let open_end = loop {
        let start = search + html[search..].find("<h1")?;
        let after = start + 3;
        match html[after..].chars().next() {
            Some('>') => break after + 1,
            Some(c) if c.is_whitespace() => break after + html[after..].find('>')? + 1,
            _ => search = after,
        }
    };
    let close = open_end + html[open_end..].find("</h1>")?;
    let text = decode_entities(&strip_html_tags(&html[open_end..close]));
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Strip HTML tags from a string (simple angle-bracket stripping).
fn strip_html_tags(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(c),
            _ => {}
        }
    }
    result
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(source: &str) -> String {
        MarkdownRenderer::default().render(source)
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    #[test]
    fn renders_basic_markdown() {
        let html = render("Some *emphasis* and **strong** text.");
        assert!(html.contains("<em>emphasis</em>"));
        assert!(html.contains("<strong>strong</strong>"));
    }

    #[test]
    fn renders_gfm_extensions() {
        let html = render("| a | b |\n|---|---|\n| 1 | 2 |\n\n~~gone~~\n\n- [x] done");
        assert!(html.contains("<table>"));
        assert!(html.contains("<del>gone</del>"));
        assert!(html.contains("checkbox"));
    }

    #[test]
    fn raw_html_passes_through() {
        let html = render("<div class=\"note\">hi</div>");
        assert!(html.contains("<div class=\"note\">hi</div>"));
    }

    // =========================================================================
    // Links
    // =========================================================================

    #[test]
    fn rewrites_markdown_links() {
        assert_eq!(rewrite_markdown_link("notes.md", false).as_deref(), Some("notes.html"));
        assert_eq!(rewrite_markdown_link("a/b.markdown", false).as_deref(), Some("a/b.html"));
        assert_eq!(rewrite_markdown_link("notes.md", true).as_deref(), Some("notes/"));
    }

    #[test]
    fn readme_links_point_at_directories() {
        assert_eq!(rewrite_markdown_link("README.md", false).as_deref(), Some("/"));
        assert_eq!(rewrite_markdown_link("guide/README.md", false).as_deref(), Some("guide/"));
        assert_eq!(rewrite_markdown_link("../readme.md", true).as_deref(), Some("../"));
        assert_eq!(rewrite_markdown_link("old-readme.md", false).as_deref(), Some("old-/"));
    }

    #[test]
    fn fragments_and_queries_survive() {
        assert_eq!(
            rewrite_markdown_link("setup.md#install", false).as_deref(),
            Some("setup.html#install")
        );
        assert_eq!(
            rewrite_markdown_link("guide/README.md?v=2#top", false).as_deref(),
            Some("guide/?v=2#top")
        );
    }

    #[test]
    fn leaves_other_links_alone() {
        assert_eq!(rewrite_markdown_link("https://example.com/a.md", false), None);
        assert_eq!(rewrite_markdown_link("//cdn.example.com/a.md", false), None);
        assert_eq!(rewrite_markdown_link("/docs/a.md", false), None);
        assert_eq!(rewrite_markdown_link("#notes.md", false), None);
        assert_eq!(rewrite_markdown_link("mailto:someone@example.com", false), None);
        assert_eq!(rewrite_markdown_link("image.png", false), None);
    }

    #[test]
    fn rewrites_links_in_rendered_output() {
        let html = render("See [setup](setup.md) and [home](../README.md).");
        assert!(html.contains(r#"href="setup/""#));
        assert!(html.contains(r#"href="../""#));
    }

    // =========================================================================
    // Headings
    // =========================================================================

    #[test]
    fn slugify_examples() {
        assert_eq!(slugify("Getting Started"), "getting-started");
        assert_eq!(slugify("  What's new?  "), "what-s-new");
        assert_eq!(slugify("Über Café"), "über-café");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn headings_get_unique_ids() {
        let html = render("## Setup\n\n## Setup\n\n### `code` title");
        assert!(html.contains(r#"<h2 id="setup">Setup</h2>"#));
        assert!(html.contains(r#"<h2 id="setup-1">Setup</h2>"#));
        assert!(html.contains(r#"<h3 id="code-title">"#));
    }

    #[test]
    fn heading_anchors_can_be_disabled() {
        let renderer = MarkdownRenderer::new(&MarkdownConfig {
            pretty_urls: false,
            heading_anchors: false,
        });
        assert!(renderer.render("# Title").contains("<h1>Title</h1>"));
    }

    struct Shout;

    impl MarkdownPlugin for Shout {
        fn name(&self) -> &str {
            "shout"
        }

        fn transform<'a>(&self, events: Vec<Event<'a>>) -> Vec<Event<'a>> {
            events
                .into_iter()
                .map(|event| match event {
                    Event::Text(text) => Event::Text(text.to_uppercase().into()),
                    other => other,
                })
                .collect()
        }
    }

    #[test]
    fn plugins_transform_events() {
        let renderer = MarkdownRenderer::default().with_plugin(Shout);
        assert_eq!(renderer.plugin_names(), vec!["shout"]);
        assert!(renderer.render("quiet words").contains("QUIET WORDS"));
    }

    // =========================================================================
    // Front matter and titles
    // =========================================================================

    #[test]
    fn splits_front_matter() {
        let (front, body) = split_front_matter("---\ntitle: Hello\n---\n# Body\n");
        assert_eq!(front, Some("title: Hello\n"));
        assert_eq!(body, "# Body\n");
    }

    #[test]
    fn front_matter_requires_both_fences() {
        let source = "---\ntitle: Hello\n# never closed\n";
        assert_eq!(split_front_matter(source), (None, source));
        assert_eq!(split_front_matter("# No front matter"), (None, "# No front matter"));
    }

    #[test]
    fn empty_front_matter() {
        let (front, body) = split_front_matter("---\n---\nbody");
        assert_eq!(front, Some(""));
        assert_eq!(body, "body");
        assert!(parse_front_matter("").unwrap().is_empty());
    }

    #[test]
    fn front_matter_must_be_a_mapping() {
        let vars = parse_front_matter("title: Hi\ntags: [a, b]\n").unwrap();
        assert_eq!(vars["title"], "Hi");
        assert!(matches!(
            parse_front_matter("- a\n- b\n"),
            Err(FrontMatterError::NotAMapping("array"))
        ));
    }

    #[test]
    fn first_heading_text_strips_markup() {
        assert_eq!(
            first_heading_text("<p>x</p><h1 id=\"a\">Hello <em>World</em> &amp; more</h1>")
                .as_deref(),
            Some("Hello World & more")
        );
        assert_eq!(first_heading_text("<h2>Not it</h2>"), None);
        assert_eq!(first_heading_text("<header>x</header><h1>Yes</h1>").as_deref(), Some("Yes"));
    }
}
