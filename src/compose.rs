//! Page composition: from a page entry to a written HTML file.
//!
//! Composition runs in two passes over all pages:
//!
//! 1. **Prepare**: run the page's builder and resolve its page vars. The
//!    merged variables of every prepared page form the [`PageView`] list that
//!    each page (and each template) gets to see.
//! 2. **Compose**: collect stylesheet and script URLs, render the body, run
//!    post-render hooks, wrap the body in its layout, pretty-print and write.
//!
//! Any failure is attributed to the page as a [`PageError`]; other pages are
//! unaffected.

use crate::builders::{BuilderContext, BuilderError, BuiltPage, PageBuilderRegistry};
use crate::bundle::AssetMap;
use crate::layout::{DEFAULT_CLIENT, DEFAULT_STYLE, LayoutContext, LayoutError, LayoutSet};
use crate::markdown::MarkdownRenderer;
use crate::module::{DEFAULT_EXPORT, ModuleLoader, PluginError, PostVarsFn, call_plugin};
use crate::pretty::pretty_html;
use crate::site::{GlobalAssets, LayoutEntry, PageEntry};
use crate::vars::{
    Tier, VarLayers, Vars, VarsError, default_vars, flag, load_vars_module, post_vars_fn,
    resolve_post_vars, vars_from_module,
};
use crate::walk::PageKind;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// What one page looks like to other pages and templates.
#[derive(Debug, Clone, Serialize)]
pub struct PageView {
    /// Relative source path (`blog/post/README.md`).
    pub source: String,
    /// Relative source directory.
    pub dir: String,
    pub kind: PageKind,
    /// Relative output path (`blog/post/index.html`).
    pub output: String,
    /// Site-absolute URL (`/blog/post/`).
    pub url: String,
    /// Merged variables, before post-render hooks.
    pub vars: Vars,
}

impl PageView {
    pub fn title(&self) -> Option<&str> {
        self.vars.get("title").and_then(Value::as_str)
    }
}

/// Everything a page body render function and `postVars` hook get.
pub struct RenderContext<'a> {
    pub vars: &'a Vars,
    pub styles: &'a [String],
    pub scripts: &'a [String],
    pub page: &'a PageView,
    pub pages: &'a [PageView],
}

#[derive(Error, Debug)]
pub enum PageError {
    #[error("Error building {page}")]
    Build {
        page: String,
        #[source]
        source: BuilderError,
    },
    #[error("Error resolving page vars for {page}")]
    Vars {
        page: String,
        #[source]
        source: VarsError,
    },
    #[error("{page}: the `layout` variable must be a string, found {found}")]
    InvalidLayoutVar { page: String, found: &'static str },
    #[error("{page}: {asset} has no bundled output")]
    MissingAsset { page: String, asset: String },
    #[error("Error rendering {page}")]
    Render {
        page: String,
        #[source]
        source: PluginError,
    },
    #[error("{page}: unable to resolve a layout named `{layout}`")]
    UnknownLayout { page: String, layout: String },
    #[error("{page}: layout `{layout}` failed to load")]
    LayoutLoad {
        page: String,
        layout: String,
        #[source]
        source: Arc<LayoutError>,
    },
    #[error("{page}: layout `{layout}` failed")]
    LayoutRender {
        page: String,
        layout: String,
        #[source]
        source: PluginError,
    },
    #[error("{page}: failed to write {path}")]
    Write {
        page: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PageError {
    /// Relative source path of the failed page.
    pub fn page(&self) -> &str {
        match self {
            PageError::Build { page, .. }
            | PageError::Vars { page, .. }
            | PageError::InvalidLayoutVar { page, .. }
            | PageError::MissingAsset { page, .. }
            | PageError::Render { page, .. }
            | PageError::UnknownLayout { page, .. }
            | PageError::LayoutLoad { page, .. }
            | PageError::LayoutRender { page, .. }
            | PageError::Write { page, .. } => page,
        }
    }
}

/// Shared, read-only state for composing pages.
pub struct ComposeEnv<'a> {
    pub dest: &'a Path,
    pub globals: &'a GlobalAssets,
    pub assets: &'a AssetMap,
    pub loader: &'a dyn ModuleLoader,
    pub builders: &'a PageBuilderRegistry,
    pub markdown: &'a MarkdownRenderer,
    pub layouts: &'a LayoutSet,
}

/// A page that made it through the prepare pass.
pub struct PreparedPage<'a> {
    pub entry: &'a PageEntry,
    pub layers: VarLayers,
    pub built: BuiltPage,
    /// `postVars` hook from the page's vars file.
    pub page_post_vars: Option<PostVarsFn>,
    pub view: PageView,
}

/// A written page.
#[derive(Debug, Clone, Serialize)]
pub struct PageOutcome {
    pub source: String,
    pub output: String,
    pub title: Option<String>,
    pub layout: String,
}

/// Run the page's builder and resolve its vars.
pub fn prepare_page<'a>(
    entry: &'a PageEntry,
    env: &ComposeEnv<'_>,
    global: &Vars,
) -> Result<PreparedPage<'a>, PageError> {
    let page = entry.source.relative_path.clone();

    let built = env
        .builders
        .build(
            entry,
            &BuilderContext {
                loader: env.loader,
                markdown: env.markdown,
            },
        )
        .map_err(|source| PageError::Build {
            page: page.clone(),
            source,
        })?;

    let (page_vars, page_post_vars) = match &entry.vars {
        Some(file) => {
            let resolved = load_vars_module(env.loader, file).and_then(|module| {
                Ok((
                    vars_from_module(&module, file, DEFAULT_EXPORT)?,
                    post_vars_fn(&module, file)?,
                ))
            });
            resolved.map_err(|source| PageError::Vars {
                page: page.clone(),
                source,
            })?
        }
        None => (Vars::new(), None),
    };

    let layers = VarLayers::new()
        .with(Tier::Defaults, default_vars())
        .with(Tier::Global, global.clone())
        .with(Tier::Page, page_vars)
        .with(Tier::Builder, built.vars.clone());

    let view = PageView {
        source: page,
        dir: entry.source.parent.clone(),
        kind: entry.kind,
        output: entry.output_path(),
        url: entry.url(),
        vars: layers.merged(),
    };

    Ok(PreparedPage {
        entry,
        layers,
        built,
        page_post_vars,
        view,
    })
}

/// Render, wrap and write one prepared page.
pub fn compose_page(
    prepared: &PreparedPage<'_>,
    pages: &[PageView],
    env: &ComposeEnv<'_>,
) -> Result<PageOutcome, PageError> {
    let page = &prepared.view.source;
    let vars = &prepared.view.vars;

    let layout_name = layout_var(vars, page)?;
    let (styles, scripts) = asset_urls(
        prepared.entry,
        env.layouts.entry(&layout_name),
        vars,
        env.globals,
        env.assets,
    )?;

    let body = call_plugin(|| {
        (prepared.built.render)(&RenderContext {
            vars,
            styles: &styles,
            scripts: &scripts,
            page: &prepared.view,
            pages,
        })
    })
    .map_err(|source| PageError::Render {
        page: page.clone(),
        source,
    })?;

    let mut layers = prepared.layers.clone();
    let hooks = [&prepared.page_post_vars, &prepared.built.post_vars];
    if hooks.iter().any(|hook| hook.is_some()) {
        let ctx = RenderContext {
            vars,
            styles: &styles,
            scripts: &scripts,
            page: &prepared.view,
            pages,
        };
        let mut post = Vars::new();
        for hook in hooks.into_iter().flatten() {
            let vars = resolve_post_vars(hook, &ctx, page).map_err(|source| PageError::Vars {
                page: page.clone(),
                source,
            })?;
            post.extend(vars);
        }
        layers.set(Tier::Post, post);
    }
    let final_vars = layers.merged();
    let layout_name = layout_var(&final_vars, page)?;
    let (styles, scripts) = asset_urls(
        prepared.entry,
        env.layouts.entry(&layout_name),
        &final_vars,
        env.globals,
        env.assets,
    )?;

    let layout = match env.layouts.resolve(&layout_name) {
        None => {
            return Err(PageError::UnknownLayout {
                page: page.clone(),
                layout: layout_name,
            });
        }
        Some(Err(source)) => {
            return Err(PageError::LayoutLoad {
                page: page.clone(),
                layout: layout_name,
                source,
            });
        }
        Some(Ok(layout)) => layout,
    };

    let children = if layout.structured_children {
        body
    } else {
        body.flattened()
    };
    let document = call_plugin(|| {
        (layout.render)(&LayoutContext {
            vars: &final_vars,
            styles: &styles,
            scripts: &scripts,
            children,
            page: &prepared.view,
            pages,
        })
    })
    .map_err(|source| PageError::LayoutRender {
        page: page.clone(),
        layout: layout_name.clone(),
        source,
    })?;

    let output_dir = env.dest.join(&prepared.entry.output_dir);
    let output_path = output_dir.join(&prepared.entry.output_name);
    fs::create_dir_all(&output_dir)
        .and_then(|_| fs::write(&output_path, pretty_html(&document)))
        .map_err(|source| PageError::Write {
            page: page.clone(),
            path: output_path.clone(),
            source,
        })?;

    tracing::debug!(layout = %layout_name, "wrote {}", prepared.view.output);
    Ok(PageOutcome {
        source: page.clone(),
        output: prepared.view.output.clone(),
        title: final_vars
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string),
        layout: layout_name,
    })
}

fn layout_var(vars: &Vars, page: &str) -> Result<String, PageError> {
    match vars.get("layout") {
        Some(Value::String(name)) => Ok(name.clone()),
        other => Err(PageError::InvalidLayoutVar {
            page: page.to_string(),
            found: other.map(crate::vars::json_type_name).unwrap_or("nothing"),
        }),
    }
}

/// Stylesheet and script URLs for a page, in cascade order: built-in
/// defaults (when the vars ask for them), global, layout, page.
fn asset_urls(
    page: &PageEntry,
    layout: Option<&LayoutEntry>,
    vars: &Vars,
    globals: &GlobalAssets,
    assets: &AssetMap,
) -> Result<(Vec<String>, Vec<String>), PageError> {
    let url = |key: &str| {
        assets.url(key).ok_or_else(|| PageError::MissingAsset {
            page: page.source.relative_path.clone(),
            asset: key.to_string(),
        })
    };

    let mut styles = Vec::new();
    if flag(vars, "defaultStyle") {
        styles.push(url(DEFAULT_STYLE.key)?);
    }
    for file in [&globals.style, &layout.and_then(|l| l.style.clone()), &page.style]
        .into_iter()
        .flatten()
    {
        styles.push(url(&file.relative_path)?);
    }

    let mut scripts = Vec::new();
    if flag(vars, "defaultClient") {
        scripts.push(url(DEFAULT_CLIENT.key)?);
    }
    for file in [&globals.client, &layout.and_then(|l| l.client.clone()), &page.client]
        .into_iter()
        .flatten()
    {
        scripts.push(url(&file.relative_path)?);
    }

    Ok((styles, scripts))
}
