//! Module loading: how script-like source files become callable code.
//!
//! Page scripts, layouts, templates, vars files and settings hooks are all
//! "modules": a set of named exports, with `default` as the primary one. A
//! [`ModuleLoader`] turns a [`SourceFile`] into a [`Module`]. Two loaders ship
//! with the crate:
//!
//! - [`ModuleRegistry`]: modules compiled into the host program, registered by
//!   relative source path (`blog/page.js`, `root.layout.js`).
//! - [`DataLoader`]: `.json`, `.toml`, `.yaml` and `.yml` files, whose parsed
//!   contents become a value export.
//!
//! [`LoaderChain`] tries loaders in order; the first one that claims a file
//! decides the outcome.
//!
//! Every call into module code goes through [`call_plugin`], and every load
//! through [`load_module`], so a failing or panicking plugin or loader is
//! attributed to one item instead of taking the build down.

use crate::compose::RenderContext;
use crate::layout::{Content, LayoutContext};
use crate::markdown::MarkdownRenderer;
use crate::template::{TemplateContext, TemplateOutput};
use crate::vars::Vars;
use crate::walk::SourceFile;
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Error type returned by module code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type PluginResult<T> = Result<T, BoxError>;

/// The primary export of a module.
pub const DEFAULT_EXPORT: &str = "default";
/// Builder-level variables exported by a script page.
pub const VARS_EXPORT: &str = "vars";
/// Post-render variables hook.
pub const POST_VARS_EXPORT: &str = "postVars";

pub type VarsFn = Arc<dyn Fn() -> PluginResult<Value> + Send + Sync>;
pub type PostVarsFn = Arc<dyn Fn(&RenderContext<'_>) -> PluginResult<Vars> + Send + Sync>;
pub type PageFn = Arc<dyn Fn(&RenderContext<'_>) -> PluginResult<Content> + Send + Sync>;
pub type TemplateFn =
    Arc<dyn Fn(&TemplateContext<'_>) -> PluginResult<TemplateOutput> + Send + Sync>;
pub type SettingsFn = Arc<dyn Fn(Value) -> PluginResult<Value> + Send + Sync>;
pub type MarkdownFn =
    Arc<dyn Fn(MarkdownRenderer) -> PluginResult<MarkdownRenderer> + Send + Sync>;
pub type LayoutRenderFn = Arc<dyn Fn(&LayoutContext<'_>) -> PluginResult<String> + Send + Sync>;

/// Box a page render closure.
pub fn page_fn<F>(f: F) -> PageFn
where
    F: Fn(&RenderContext<'_>) -> PluginResult<Content> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A layout function plus how it wants to receive page content.
#[derive(Clone)]
pub struct LayoutFn {
    pub render: LayoutRenderFn,
    /// `true` when the layout takes structured markup as children; otherwise
    /// children are flattened to an HTML string first.
    pub structured_children: bool,
}

impl std::fmt::Debug for LayoutFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayoutFn")
            .field("structured_children", &self.structured_children)
            .finish_non_exhaustive()
    }
}

/// One named export of a module.
#[derive(Clone)]
pub enum Export {
    Value(Value),
    Vars(VarsFn),
    PostVars(PostVarsFn),
    Page(PageFn),
    Layout(LayoutFn),
    Template(TemplateFn),
    Settings(SettingsFn),
    Markdown(MarkdownFn),
}

impl Export {
    pub fn value(value: Value) -> Self {
        Export::Value(value)
    }

    pub fn vars<F>(f: F) -> Self
    where
        F: Fn() -> PluginResult<Value> + Send + Sync + 'static,
    {
        Export::Vars(Arc::new(f))
    }

    pub fn post_vars<F>(f: F) -> Self
    where
        F: Fn(&RenderContext<'_>) -> PluginResult<Vars> + Send + Sync + 'static,
    {
        Export::PostVars(Arc::new(f))
    }

    pub fn page<F>(f: F) -> Self
    where
        F: Fn(&RenderContext<'_>) -> PluginResult<Content> + Send + Sync + 'static,
    {
        Export::Page(page_fn(f))
    }

    /// A layout that receives page content as an HTML string.
    pub fn layout<F>(f: F) -> Self
    where
        F: Fn(&LayoutContext<'_>) -> PluginResult<String> + Send + Sync + 'static,
    {
        Export::Layout(LayoutFn {
            render: Arc::new(f),
            structured_children: false,
        })
    }

    /// A layout that receives page content unflattened.
    pub fn markup_layout<F>(f: F) -> Self
    where
        F: Fn(&LayoutContext<'_>) -> PluginResult<String> + Send + Sync + 'static,
    {
        Export::Layout(LayoutFn {
            render: Arc::new(f),
            structured_children: true,
        })
    }

    pub fn template<F>(f: F) -> Self
    where
        F: Fn(&TemplateContext<'_>) -> PluginResult<TemplateOutput> + Send + Sync + 'static,
    {
        Export::Template(Arc::new(f))
    }

    pub fn settings<F>(f: F) -> Self
    where
        F: Fn(Value) -> PluginResult<Value> + Send + Sync + 'static,
    {
        Export::Settings(Arc::new(f))
    }

    pub fn markdown<F>(f: F) -> Self
    where
        F: Fn(MarkdownRenderer) -> PluginResult<MarkdownRenderer> + Send + Sync + 'static,
    {
        Export::Markdown(Arc::new(f))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Export::Value(_) => "value",
            Export::Vars(_) => "vars function",
            Export::PostVars(_) => "postVars function",
            Export::Page(_) => "page function",
            Export::Layout(_) => "layout function",
            Export::Template(_) => "template function",
            Export::Settings(_) => "settings hook",
            Export::Markdown(_) => "markdown hook",
        }
    }
}

impl std::fmt::Debug for Export {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Export::Value(value) => f.debug_tuple("Value").field(value).finish(),
            other => f.write_str(other.kind_name()),
        }
    }
}

/// A loaded module: named exports.
#[derive(Clone, Debug, Default)]
pub struct Module {
    exports: BTreeMap<String, Export>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(self, export: Export) -> Self {
        self.with_export(DEFAULT_EXPORT, export)
    }

    pub fn with_export(mut self, name: impl Into<String>, export: Export) -> Self {
        self.exports.insert(name.into(), export);
        self
    }

    pub fn default_export(&self) -> Option<&Export> {
        self.exports.get(DEFAULT_EXPORT)
    }

    pub fn export(&self, name: &str) -> Option<&Export> {
        self.exports.get(name)
    }
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("no module registered for {0}")]
    NotRegistered(String),
    #[error("{0} is not a data file")]
    Unsupported(String),
    #[error("no module loader claims {0}")]
    Unclaimed(String),
    #[error("Failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {file}: {message}")]
    Parse { file: String, message: String },
    #[error("loading {file} panicked: {message}")]
    Panicked { file: String, message: String },
}

impl LoadError {
    /// Whether the loader declined the file, so the next loader may try.
    pub fn is_unclaimed(&self) -> bool {
        matches!(
            self,
            LoadError::NotRegistered(_) | LoadError::Unsupported(_) | LoadError::Unclaimed(_)
        )
    }
}

/// Turns source files into modules. Implementations must be shareable across
/// worker threads.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, file: &SourceFile) -> Result<Module, LoadError>;
}

/// Modules compiled into the host program, keyed by relative source path.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Module>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, module: Module) {
        self.modules.insert(normalize_key(path), module);
    }

    pub fn with(mut self, path: &str, module: Module) -> Self {
        self.insert(path, module);
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        self.modules.contains_key(&normalize_key(path))
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

fn normalize_key(path: &str) -> String {
    path.trim_start_matches("./").trim_start_matches('/').to_string()
}

impl ModuleLoader for ModuleRegistry {
    fn load(&self, file: &SourceFile) -> Result<Module, LoadError> {
        self.modules
            .get(&file.relative_path)
            .cloned()
            .ok_or_else(|| LoadError::NotRegistered(file.relative_path.clone()))
    }
}

/// Loads `.json`, `.toml`, `.yaml` and `.yml` files as a single value export.
#[derive(Clone, Copy, Debug, Default)]
pub struct DataLoader;

impl ModuleLoader for DataLoader {
    fn load(&self, file: &SourceFile) -> Result<Module, LoadError> {
        let parse: fn(&str) -> Result<Value, String> = match file.extension() {
            Some("json") => |text| serde_json::from_str(text).map_err(|e| e.to_string()),
            Some("toml") => |text| toml::from_str(text).map_err(|e| e.to_string()),
            Some("yaml" | "yml") => |text| serde_yaml::from_str(text).map_err(|e| e.to_string()),
            _ => return Err(LoadError::Unsupported(file.relative_path.clone())),
        };
        let text = fs::read_to_string(&file.path).map_err(|source| LoadError::Io {
            path: file.path.clone(),
            source,
        })?;
        let value = parse(&text).map_err(|message| LoadError::Parse {
            file: file.relative_path.clone(),
            message,
        })?;
        Ok(Module::new().with_default(Export::Value(value)))
    }
}

/// Tries each loader in turn until one claims the file.
#[derive(Clone, Default)]
pub struct LoaderChain {
    loaders: Vec<Arc<dyn ModuleLoader>>,
}

impl LoaderChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, loader: impl ModuleLoader + 'static) -> Self {
        self.loaders.push(Arc::new(loader));
        self
    }
}

impl ModuleLoader for LoaderChain {
    fn load(&self, file: &SourceFile) -> Result<Module, LoadError> {
        for loader in &self.loaders {
            match loader.load(file) {
                Err(err) if err.is_unclaimed() => continue,
                other => return other,
            }
        }
        Err(LoadError::Unclaimed(file.relative_path.clone()))
    }
}

// ============================================================================
// Calling into module code
// ============================================================================

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("{0}")]
    Failed(BoxError),
    #[error("panicked: {0}")]
    Panicked(String),
}

/// Run module code, converting both returned errors and panics.
pub fn call_plugin<T>(f: impl FnOnce() -> PluginResult<T>) -> Result<T, PluginError> {
    match catch_panic(f) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(PluginError::Failed(err)),
        Err(message) => Err(PluginError::Panicked(message)),
    }
}

/// Load a module through `loader`, converting a loader panic into
/// [`LoadError::Panicked`] for that file.
pub fn load_module(loader: &dyn ModuleLoader, file: &SourceFile) -> Result<Module, LoadError> {
    catch_panic(|| loader.load(file)).unwrap_or_else(|message| {
        Err(LoadError::Panicked {
            file: file.relative_path.clone(),
            message,
        })
    })
}

/// Run `f`, turning a panic into its message.
pub fn catch_panic<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

// ============================================================================
// Settings hooks
// ============================================================================

/// A root-level settings hook failed. Always fatal.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load {file}")]
    Load {
        file: String,
        #[source]
        source: LoadError,
    },
    #[error("{file} must export a default {expected}, found {found}")]
    WrongExport {
        file: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("{file}: settings hook failed")]
    Hook {
        file: String,
        #[source]
        source: PluginError,
    },
    #[error("{file}: invalid bundler options")]
    Options {
        file: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{file}: hashLength must be between 1 and 64, got {value}")]
    HashLength { file: String, value: usize },
}

/// Load a settings module and return its default export.
pub fn load_settings_export(
    loader: &dyn ModuleLoader,
    file: &SourceFile,
) -> Result<Option<Export>, SettingsError> {
    let module = load_module(loader, file).map_err(|source| SettingsError::Load {
        file: file.relative_path.clone(),
        source,
    })?;
    Ok(module.default_export().cloned())
}
