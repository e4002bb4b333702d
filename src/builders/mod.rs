//! Page builders: one per page kind.
//!
//! A builder turns a page source into builder-level variables, a body render
//! function and an optional post-render variables hook. The registry maps
//! each [`PageKind`] to its builder; the site model drops pages whose kind
//! has no registered builder.

mod html;
mod markdown;
mod script;

pub use html::HtmlBuilder;
pub use markdown::MarkdownBuilder;
pub use script::ScriptBuilder;

use crate::markdown::{FrontMatterError, MarkdownRenderer};
use crate::module::{LoadError, ModuleLoader, PageFn, PostVarsFn, catch_panic};
use crate::site::PageEntry;
use crate::vars::{Vars, VarsError};
use crate::walk::PageKind;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuilderError {
    #[error("Failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid front matter in {file}")]
    FrontMatter {
        file: String,
        #[source]
        source: FrontMatterError,
    },
    #[error("Failed to load {file}")]
    Load {
        file: String,
        #[source]
        source: LoadError,
    },
    #[error("{file}: js pages must export a page layout default export")]
    MissingRender { file: String },
    #[error(transparent)]
    Vars(#[from] VarsError),
    #[error("no builder registered for {kind} pages")]
    Unsupported { kind: PageKind },
    #[error("builder panicked: {0}")]
    Panicked(String),
}

/// What the build stage gets from [`PageBuilder::build`].
#[derive(Clone)]
pub struct BuiltPage {
    /// Builder-tier variables; these win over every other tier.
    pub vars: Vars,
    pub render: PageFn,
    pub post_vars: Option<PostVarsFn>,
}

/// Shared state builders may use.
pub struct BuilderContext<'a> {
    pub loader: &'a dyn ModuleLoader,
    pub markdown: &'a MarkdownRenderer,
}

pub trait PageBuilder: Send + Sync {
    fn build(&self, page: &PageEntry, ctx: &BuilderContext<'_>) -> Result<BuiltPage, BuilderError>;
}

/// Builders by page kind.
#[derive(Clone)]
pub struct PageBuilderRegistry {
    builders: BTreeMap<PageKind, Arc<dyn PageBuilder>>,
}

impl Default for PageBuilderRegistry {
    fn default() -> Self {
        Self::empty()
            .with(PageKind::Markdown, MarkdownBuilder)
            .with(PageKind::Script, ScriptBuilder)
            .with(PageKind::Html, HtmlBuilder)
    }
}

impl PageBuilderRegistry {
    /// A registry with no builders at all.
    pub fn empty() -> Self {
        Self {
            builders: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, kind: PageKind, builder: impl PageBuilder + 'static) {
        self.builders.insert(kind, Arc::new(builder));
    }

    pub fn with(mut self, kind: PageKind, builder: impl PageBuilder + 'static) -> Self {
        self.register(kind, builder);
        self
    }

    pub fn without(mut self, kind: PageKind) -> Self {
        self.builders.remove(&kind);
        self
    }

    pub fn kinds(&self) -> BTreeSet<PageKind> {
        self.builders.keys().copied().collect()
    }

    /// Run the builder for `page`, containing panics.
    pub fn build(
        &self,
        page: &PageEntry,
        ctx: &BuilderContext<'_>,
    ) -> Result<BuiltPage, BuilderError> {
        let builder = self
            .builders
            .get(&page.kind)
            .ok_or(BuilderError::Unsupported { kind: page.kind })?;
        catch_panic(|| builder.build(page, ctx))
            .unwrap_or_else(|message| Err(BuilderError::Panicked(message)))
    }
}
