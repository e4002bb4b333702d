//! HTML pages: the file is the body, verbatim.

use super::{BuilderContext, BuilderError, BuiltPage, PageBuilder};
use crate::layout::Content;
use crate::module::page_fn;
use crate::site::PageEntry;
use crate::vars::Vars;
use std::fs;

pub struct HtmlBuilder;

impl PageBuilder for HtmlBuilder {
    fn build(
        &self,
        page: &PageEntry,
        _ctx: &BuilderContext<'_>,
    ) -> Result<BuiltPage, BuilderError> {
        let html = fs::read_to_string(&page.source.path).map_err(|source| BuilderError::Io {
            path: page.source.path.clone(),
            source,
        })?;
        let content = Content::Html(html);
        Ok(BuiltPage {
            vars: Vars::new(),
            render: page_fn(move |_| Ok(content.clone())),
            post_vars: None,
        })
    }
}
