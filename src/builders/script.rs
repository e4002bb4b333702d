//! Script pages: a module whose default export renders the body.
//!
//! Optional named exports: `vars` (builder-tier variables, a value or a
//! function) and `postVars` (a hook run after the body renders).

use super::{BuilderContext, BuilderError, BuiltPage, PageBuilder};
use crate::module::{Export, VARS_EXPORT, load_module};
use crate::site::PageEntry;
use crate::vars::{post_vars_fn, vars_from_module};

pub struct ScriptBuilder;

impl PageBuilder for ScriptBuilder {
    fn build(&self, page: &PageEntry, ctx: &BuilderContext<'_>) -> Result<BuiltPage, BuilderError> {
        let file = &page.source;
        let module = load_module(ctx.loader, file).map_err(|source| BuilderError::Load {
            file: file.relative_path.clone(),
            source,
        })?;

        let render = match module.default_export() {
            Some(Export::Page(render)) => render.clone(),
            _ => {
                return Err(BuilderError::MissingRender {
                    file: file.relative_path.clone(),
                });
            }
        };
        let vars = vars_from_module(&module, file, VARS_EXPORT)?;
        let post_vars = post_vars_fn(&module, file)?;

        Ok(BuiltPage {
            vars,
            render,
            post_vars,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Content;
    use crate::markdown::MarkdownRenderer;
    use crate::module::{Module, ModuleRegistry, POST_VARS_EXPORT};
    use crate::test_helpers::{page_entry, page_view, render_context};
    use crate::walk::PageKind;
    use serde_json::json;
    use std::path::Path;

    fn build(registry: &ModuleRegistry) -> Result<BuiltPage, BuilderError> {
        let page = page_entry(Path::new("/site"), "app/page.js", PageKind::Script);
        let markdown = MarkdownRenderer::default();
        let ctx = BuilderContext {
            loader: registry,
            markdown: &markdown,
        };
        ScriptBuilder.build(&page, &ctx)
    }

    #[test]
    fn renders_with_page_context() {
        let registry = ModuleRegistry::new().with(
            "app/page.js",
            Module::new()
                .with_default(Export::page(|ctx| {
                    Ok(Content::from(format!("<p>{} pages</p>", ctx.pages.len())))
                }))
                .with_export(VARS_EXPORT, Export::value(json!({"title": "App"})))
                .with_export(POST_VARS_EXPORT, Export::post_vars(|_| Ok(Default::default()))),
        );

        let built = build(&registry).unwrap();
        assert_eq!(built.vars["title"], "App");
        assert!(built.post_vars.is_some());

        let view = page_view("app/page.js");
        let html = (built.render)(&render_context(&view)).unwrap();
        assert_eq!(html.as_str(), "<p>1 pages</p>");
    }

    #[test]
    fn vars_export_may_be_a_function() {
        let registry = ModuleRegistry::new().with(
            "app/page.js",
            Module::new()
                .with_default(Export::page(|_| Ok(Content::from(""))))
                .with_export(VARS_EXPORT, Export::vars(|| Ok(json!({"computed": 3})))),
        );
        assert_eq!(build(&registry).unwrap().vars["computed"], 3);
    }

    #[test]
    fn default_export_must_render() {
        let registry = ModuleRegistry::new().with(
            "app/page.js",
            Module::new().with_default(Export::value(json!("<p>not a function</p>"))),
        );
        let err = build(&registry).err().unwrap();
        assert_eq!(
            err.to_string(),
            "app/page.js: js pages must export a page layout default export"
        );
    }

    #[test]
    fn unregistered_module_is_a_load_error() {
        let err = build(&ModuleRegistry::new()).err().unwrap();
        assert!(matches!(err, BuilderError::Load { .. }));
    }
}
