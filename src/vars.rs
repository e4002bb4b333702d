//! Layered page variables.
//!
//! Every page sees one merged variable mapping built from five tiers, each
//! shallowly overriding the ones before it:
//!
//! | Tier     | Source                                              |
//! |----------|-----------------------------------------------------|
//! | Defaults | `layout = "root"`, `defaultStyle`, `defaultClient`   |
//! | Global   | `global.vars.*` at the source root                  |
//! | Page     | the page directory's `page.vars.*`                  |
//! | Post     | `postVars` hooks, run after the page body renders    |
//! | Builder  | front matter, or a script page's `vars` export      |
//!
//! Builder vars always win, even over post vars.

use crate::compose::RenderContext;
use crate::module::{
    DEFAULT_EXPORT, Export, Module, ModuleLoader, POST_VARS_EXPORT, PluginError, PostVarsFn,
    call_plugin, load_module,
};
use crate::walk::SourceFile;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

/// A page's variables: string keys, arbitrary JSON values.
pub type Vars = serde_json::Map<String, Value>;

/// Variable tiers, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Tier {
    Defaults,
    Global,
    Page,
    Post,
    Builder,
}

/// The built-in lowest tier.
pub fn default_vars() -> Vars {
    let mut vars = Vars::new();
    vars.insert("layout".into(), json!("root"));
    vars.insert("defaultStyle".into(), json!(true));
    vars.insert("defaultClient".into(), json!(true));
    vars
}

/// Variables kept per tier so a tier can be replaced and re-merged.
#[derive(Debug, Clone, Default)]
pub struct VarLayers {
    layers: Vec<(Tier, Vars)>,
}

impl VarLayers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a tier, replacing any previous value for it.
    pub fn set(&mut self, tier: Tier, vars: Vars) {
        match self.layers.binary_search_by_key(&tier, |(t, _)| *t) {
            Ok(index) => self.layers[index].1 = vars,
            Err(index) => self.layers.insert(index, (tier, vars)),
        }
    }

    pub fn with(mut self, tier: Tier, vars: Vars) -> Self {
        self.set(tier, vars);
        self
    }

    pub fn get(&self, tier: Tier) -> Option<&Vars> {
        self.layers
            .iter()
            .find(|(t, _)| *t == tier)
            .map(|(_, vars)| vars)
    }

    /// Shallow merge of all tiers, higher tiers overriding lower ones.
    pub fn merged(&self) -> Vars {
        let mut merged = Vars::new();
        for (_, vars) in &self.layers {
            for (key, value) in vars {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// The tier whose value wins for `key`.
    pub fn origin(&self, key: &str) -> Option<Tier> {
        self.layers
            .iter()
            .rev()
            .find(|(_, vars)| vars.contains_key(key))
            .map(|(tier, _)| *tier)
    }
}

#[derive(Error, Debug)]
pub enum VarsError {
    #[error("Failed to load {file}")]
    Load {
        file: String,
        #[source]
        source: crate::module::LoadError,
    },
    #[error("{file}: variables must be an object, found {found}")]
    NotAnObject { file: String, found: &'static str },
    #[error("{file}: export `{export}` is a {found}, not a variables source")]
    WrongExport {
        file: String,
        export: String,
        found: &'static str,
    },
    #[error("{file}: `{export}` failed")]
    Plugin {
        file: String,
        export: String,
        #[source]
        source: PluginError,
    },
}

/// Load a vars module, tolerating an absent file.
pub fn load_vars_module(
    loader: &dyn ModuleLoader,
    file: &SourceFile,
) -> Result<Module, VarsError> {
    load_module(loader, file).map_err(|source| VarsError::Load {
        file: file.relative_path.clone(),
        source,
    })
}

/// Resolve the default export of an optional vars file.
///
/// An absent file yields an empty mapping.
pub fn resolve_vars(
    loader: &dyn ModuleLoader,
    file: Option<&SourceFile>,
) -> Result<Vars, VarsError> {
    let Some(file) = file else {
        return Ok(Vars::new());
    };
    let module = load_vars_module(loader, file)?;
    vars_from_module(&module, file, DEFAULT_EXPORT)
}

/// Read variables from one export of a loaded module.
///
/// A value export is used as-is; a function export is called. A missing
/// export yields an empty mapping.
pub fn vars_from_module(
    module: &Module,
    file: &SourceFile,
    export: &str,
) -> Result<Vars, VarsError> {
    match module.export(export) {
        None => Ok(Vars::new()),
        Some(Export::Value(value)) => into_object(value.clone(), file),
        Some(Export::Vars(f)) => {
            let value = call_plugin(|| f()).map_err(|source| VarsError::Plugin {
                file: file.relative_path.clone(),
                export: export.to_string(),
                source,
            })?;
            into_object(value, file)
        }
        Some(other) => Err(VarsError::WrongExport {
            file: file.relative_path.clone(),
            export: export.to_string(),
            found: other.kind_name(),
        }),
    }
}

/// The module's `postVars` hook, if it has one.
pub fn post_vars_fn(module: &Module, file: &SourceFile) -> Result<Option<PostVarsFn>, VarsError> {
    match module.export(POST_VARS_EXPORT) {
        None => Ok(None),
        Some(Export::PostVars(f)) => Ok(Some(f.clone())),
        Some(other) => Err(VarsError::WrongExport {
            file: file.relative_path.clone(),
            export: POST_VARS_EXPORT.to_string(),
            found: other.kind_name(),
        }),
    }
}

/// Run a `postVars` hook against a rendered page.
pub fn resolve_post_vars(
    f: &PostVarsFn,
    ctx: &RenderContext<'_>,
    source: &str,
) -> Result<Vars, VarsError> {
    call_plugin(|| f(ctx)).map_err(|err| VarsError::Plugin {
        file: source.to_string(),
        export: POST_VARS_EXPORT.to_string(),
        source: err,
    })
}

fn into_object(value: Value, file: &SourceFile) -> Result<Vars, VarsError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Vars::new()),
        other => Err(VarsError::NotAnObject {
            file: file.relative_path.clone(),
            found: json_type_name(&other),
        }),
    }
}

/// Human-readable name of a JSON value's type.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Read a boolean flag, treating anything but `true` as false.
pub fn flag(vars: &Vars, key: &str) -> bool {
    vars.get(key).and_then(Value::as_bool).unwrap_or(false)
}
