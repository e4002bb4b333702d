//! Markdown pages: front matter becomes builder vars, the body is rendered
//! once up front.

use super::{BuilderContext, BuilderError, BuiltPage, PageBuilder};
use crate::layout::Content;
use crate::markdown::{first_heading_text, parse_front_matter, split_front_matter};
use crate::module::page_fn;
use crate::site::PageEntry;
use serde_json::Value;
use std::fs;

pub struct MarkdownBuilder;

impl PageBuilder for MarkdownBuilder {
    fn build(&self, page: &PageEntry, ctx: &BuilderContext<'_>) -> Result<BuiltPage, BuilderError> {
        let source = fs::read_to_string(&page.source.path).map_err(|source| BuilderError::Io {
            path: page.source.path.clone(),
            source,
        })?;

        let (front, body) = split_front_matter(&source);
        let mut vars = match front {
            Some(front) => parse_front_matter(front).map_err(|source| BuilderError::FrontMatter {
                file: page.source.relative_path.clone(),
                source,
            })?,
            None => Default::default(),
        };

        let html = ctx.markdown.render(body);
        if !vars.contains_key("title") {
            if let Some(title) = first_heading_text(&html) {
                vars.insert("title".into(), Value::String(title));
            }
        }

        let content = Content::Html(html);
        Ok(BuiltPage {
            vars,
            render: page_fn(move |_| Ok(content.clone())),
            post_vars: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::MarkdownRenderer;
    use crate::module::ModuleRegistry;
    use crate::test_helpers::{page_entry, page_view, render_context};
    use crate::walk::PageKind;
    use tempfile::TempDir;

    fn build(contents: &str) -> Result<BuiltPage, BuilderError> {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("README.md"), contents).unwrap();
        let page = page_entry(tmp.path(), "README.md", PageKind::Markdown);
        let markdown = MarkdownRenderer::default();
        let loader = ModuleRegistry::new();
        let ctx = BuilderContext {
            loader: &loader,
            markdown: &markdown,
        };
        MarkdownBuilder.build(&page, &ctx)
    }

    fn body(built: &BuiltPage) -> String {
        let view = page_view("README.md");
        (built.render)(&render_context(&view)).unwrap().into_html()
    }

    #[test]
    fn front_matter_becomes_vars() {
        let built =
            build("---\ntitle: From front matter\nlayout: blog\ntags: [a, b]\n---\n# Heading\n")
                .unwrap();
        assert_eq!(built.vars["title"], "From front matter");
        assert_eq!(built.vars["layout"], "blog");
        assert_eq!(built.vars["tags"][1], "b");
        assert!(!body(&built).contains("layout: blog"));
    }

    #[test]
    fn title_comes_from_first_heading() {
        let built = build("Intro\n\n# The *Real* Title\n\n# Second\n").unwrap();
        assert_eq!(built.vars["title"], "The Real Title");
    }

    #[test]
    fn no_heading_no_title() {
        let built = build("just text").unwrap();
        assert!(!built.vars.contains_key("title"));
        assert!(body(&built).contains("<p>just text</p>"));
    }

    #[test]
    fn invalid_front_matter_is_an_error() {
        let err = build("---\ntitle: [unclosed\n---\nbody").err().unwrap();
        assert!(matches!(err, BuilderError::FrontMatter { .. }));
        assert_eq!(err.to_string(), "Invalid front matter in README.md");
    }

    #[test]
    fn missing_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let page = page_entry(tmp.path(), "README.md", PageKind::Markdown);
        let markdown = MarkdownRenderer::default();
        let loader = ModuleRegistry::new();
        let ctx = BuilderContext {
            loader: &loader,
            markdown: &markdown,
        };
        let result = MarkdownBuilder.build(&page, &ctx);
        assert!(matches!(result, Err(BuilderError::Io { .. })));
    }
}
