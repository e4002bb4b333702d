//! Templates: modules that write arbitrary files.
//!
//! A `<name>.template.js` module's default export receives the site's global
//! variables and every page view, and returns one of:
//!
//! - a string, written to `<name>` next to the template;
//! - one `{ content, outputPath }` file, or a list of them;
//! - a stream of files, written as they are produced.
//!
//! Output paths are relative to the template's directory, or to the
//! destination root when they start with `/`. Paths that would leave the
//! destination are rejected. Every output is written independently: one bad
//! file does not stop the rest.

use crate::compose::PageView;
use crate::module::{
    BoxError, Export, ModuleLoader, PluginError, PluginResult, call_plugin, load_module,
};
use crate::site::TemplateEntry;
use crate::vars::{Vars, json_type_name};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One file produced by a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateFile {
    #[serde(rename = "outputPath")]
    pub output_path: String,
    pub content: String,
}

impl TemplateFile {
    pub fn new(output_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            output_path: output_path.into(),
            content: content.into(),
        }
    }
}

type FileStream = Box<dyn Iterator<Item = PluginResult<TemplateFile>> + Send>;

/// What a template function returns.
pub enum TemplateOutput {
    /// Written to the template's default output name.
    Content(String),
    File(TemplateFile),
    Files(Vec<TemplateFile>),
    Stream(FileStream),
    /// JSON-shaped result: an object or an array of objects with string
    /// `content` and `outputPath` fields.
    Json(Value),
}

impl TemplateOutput {
    pub fn stream<I>(files: I) -> Self
    where
        I: IntoIterator<Item = PluginResult<TemplateFile>>,
        I::IntoIter: Send + 'static,
    {
        TemplateOutput::Stream(Box::new(files.into_iter()))
    }
}

impl std::fmt::Debug for TemplateOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateOutput::Content(content) => f.debug_tuple("Content").field(content).finish(),
            TemplateOutput::File(file) => f.debug_tuple("File").field(file).finish(),
            TemplateOutput::Files(files) => f.debug_tuple("Files").field(files).finish(),
            TemplateOutput::Stream(_) => f.write_str("Stream(..)"),
            TemplateOutput::Json(value) => f.debug_tuple("Json").field(value).finish(),
        }
    }
}

/// What a template sees of itself.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateView {
    pub source: String,
    pub dir: String,
    pub output_name: String,
}

/// Everything a template function gets.
pub struct TemplateContext<'a> {
    /// Defaults merged with global vars.
    pub vars: &'a Vars,
    pub pages: &'a [PageView],
    pub template: &'a TemplateView,
}

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Failed to load template {template}")]
    Load {
        template: String,
        #[source]
        source: crate::module::LoadError,
    },
    #[error("{template} must export a default template function, found {found}")]
    NotATemplate {
        template: String,
        found: &'static str,
    },
    #[error("Error running template {template}")]
    Run {
        template: String,
        #[source]
        source: PluginError,
    },
    #[error("{template} returned {found}; expected a string, {{ content, outputPath }}, or a list of them")]
    Shape {
        template: String,
        found: &'static str,
    },
    #[error("{template}: output path `{path}` escapes the destination directory")]
    Escape { template: String, path: String },
    #[error("{template}: `{path}` is already written by a page")]
    PageCollision { template: String, path: String },
    #[error("{template}: failed to write {path}")]
    Write {
        template: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TemplateError {
    pub fn template(&self) -> &str {
        match self {
            TemplateError::Load { template, .. }
            | TemplateError::NotATemplate { template, .. }
            | TemplateError::Run { template, .. }
            | TemplateError::Shape { template, .. }
            | TemplateError::Escape { template, .. }
            | TemplateError::PageCollision { template, .. }
            | TemplateError::Write { template, .. } => template,
        }
    }
}

/// What a template wrote.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateOutcome {
    pub source: String,
    pub outputs: Vec<String>,
}

/// Files a template wrote, plus its per-file failures.
#[derive(Debug, Default)]
pub struct TemplateRun {
    pub source: String,
    /// Relative output paths, in write order.
    pub outputs: Vec<String>,
    pub errors: Vec<TemplateError>,
}

impl TemplateRun {
    pub fn into_parts(self) -> (TemplateOutcome, Vec<TemplateError>) {
        let outcome = TemplateOutcome {
            source: self.source,
            outputs: self.outputs,
        };
        (outcome, self.errors)
    }
}

/// Load, run and write one template.
///
/// `page_outputs` holds the relative output paths of every page; a template
/// file aimed at one of them is rejected instead of racing the page write.
pub fn run_template(
    entry: &TemplateEntry,
    vars: &Vars,
    pages: &[PageView],
    loader: &dyn ModuleLoader,
    dest: &Path,
    page_outputs: &BTreeSet<String>,
) -> TemplateRun {
    let source = entry.source.relative_path.clone();
    let mut run = TemplateRun {
        source: source.clone(),
        ..TemplateRun::default()
    };

    let output = match invoke(entry, vars, pages, loader) {
        Ok(output) => output,
        Err(err) => {
            run.errors.push(err);
            return run;
        }
    };

    let mut writer = Writer {
        entry,
        dest,
        page_outputs,
        run: &mut run,
    };
    match output {
        TemplateOutput::Content(content) => {
            writer.write(TemplateFile::new(entry.output_name.clone(), content))
        }
        TemplateOutput::File(file) => writer.write(file),
        TemplateOutput::Files(files) => files.into_iter().for_each(|file| writer.write(file)),
        TemplateOutput::Stream(mut stream) => loop {
            match call_plugin(|| Ok(stream.next())) {
                Ok(None) => break,
                Ok(Some(Ok(file))) => writer.write(file),
                Ok(Some(Err(err))) => writer.fail_run(PluginError::Failed(err)),
                Err(panic) => {
                    writer.fail_run(panic);
                    break;
                }
            }
        },
        TemplateOutput::Json(value) => match files_from_json(value) {
            Ok(files) => files.into_iter().for_each(|file| writer.write(file)),
            Err(found) => writer.run.errors.push(TemplateError::Shape {
                template: source,
                found,
            }),
        },
    }

    tracing::debug!(outputs = run.outputs.len(), errors = run.errors.len(), "ran {}", run.source);
    run
}

fn invoke(
    entry: &TemplateEntry,
    vars: &Vars,
    pages: &[PageView],
    loader: &dyn ModuleLoader,
) -> Result<TemplateOutput, TemplateError> {
    let template = entry.source.relative_path.clone();
    let module = load_module(loader, &entry.source).map_err(|source| TemplateError::Load {
        template: template.clone(),
        source,
    })?;
    let render = match module.default_export() {
        Some(Export::Template(render)) => render.clone(),
        other => {
            return Err(TemplateError::NotATemplate {
                template,
                found: other.map(Export::kind_name).unwrap_or("nothing"),
            });
        }
    };

    let view = TemplateView {
        source: template.clone(),
        dir: entry.output_dir.clone(),
        output_name: entry.output_name.clone(),
    };
    call_plugin(|| {
        render(&TemplateContext {
            vars,
            pages,
            template: &view,
        })
    })
    .map_err(|source| TemplateError::Run { template, source })
}

struct Writer<'a> {
    entry: &'a TemplateEntry,
    dest: &'a Path,
    page_outputs: &'a BTreeSet<String>,
    run: &'a mut TemplateRun,
}

impl Writer<'_> {
    fn write(&mut self, file: TemplateFile) {
        match self.try_write(&file) {
            Ok(relative) => self.run.outputs.push(relative),
            Err(err) => self.run.errors.push(err),
        }
    }

    fn try_write(&self, file: &TemplateFile) -> Result<String, TemplateError> {
        let template = &self.entry.source.relative_path;
        let relative = resolve_output(&self.entry.output_dir, &file.output_path).ok_or_else(|| {
            TemplateError::Escape {
                template: template.clone(),
                path: file.output_path.clone(),
            }
        })?;
        if self.page_outputs.contains(&relative) {
            return Err(TemplateError::PageCollision {
                template: template.clone(),
                path: relative,
            });
        }
        let path = relative
            .split('/')
            .fold(self.dest.to_path_buf(), |path, part| path.join(part));
        let written = match path.parent() {
            Some(parent) => fs::create_dir_all(parent),
            None => Ok(()),
        }
        .and_then(|_| fs::write(&path, &file.content));
        written.map_err(|source| TemplateError::Write {
            template: template.clone(),
            path,
            source,
        })?;
        Ok(relative)
    }

    fn fail_run(&mut self, source: PluginError) {
        self.run.errors.push(TemplateError::Run {
            template: self.entry.source.relative_path.clone(),
            source,
        });
    }
}

/// Resolve a template output path to a `/`-separated path inside the
/// destination, or `None` if it escapes it.
pub fn resolve_output(template_dir: &str, output_path: &str) -> Option<String> {
    let (base, path) = match output_path.strip_prefix('/') {
        Some(absolute) => ("", absolute),
        None => (template_dir, output_path),
    };
    let mut parts: Vec<&str> = base.split('/').filter(|s| !s.is_empty()).collect();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            name => parts.push(name),
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn files_from_json(value: Value) -> Result<Vec<TemplateFile>, &'static str> {
    match value {
        Value::String(_) => Err("a JSON string"),
        Value::Array(items) => items.into_iter().map(file_from_json).collect(),
        Value::Object(_) => Ok(vec![file_from_json(value)?]),
        other => Err(json_type_name(&other)),
    }
}

fn file_from_json(value: Value) -> Result<TemplateFile, &'static str> {
    let Value::Object(mut map) = value else {
        return Err("a list containing a non-object");
    };
    match (map.remove("outputPath"), map.remove("content")) {
        (Some(Value::String(output_path)), Some(Value::String(content))) => Ok(TemplateFile {
            output_path,
            content,
        }),
        _ => Err("an object without string `content` and `outputPath`"),
    }
}

/// Wrap a plain error message for template code.
pub fn template_error(message: impl Into<String>) -> BoxError {
    message.into().into()
}
