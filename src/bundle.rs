//! Style and script bundling.
//!
//! Every stylesheet and client script a page can reference is an entry point:
//! the built-in default assets, the global ones, each layout's and each
//! page's. An [`AssetBundler`] emits them into the destination and reports
//! where each one landed; the result is an [`AssetMap`] that page composition
//! reads to turn source paths into URLs.
//!
//! The shipped [`HashingBundler`] does no transformation. It copies each entry
//! to a content-hashed name so outputs can be cached forever:
//!
//! ```text
//! global.css            →  global-1a2b3c4d.css
//! blog/client.js        →  blog/client-5e6f7a8b.js
//! ```
//!
//! A root-level `esbuild.settings.js` hook can override [`BundleOptions`].
//! The final map is persisted as `pagesmith-meta.json` in the destination.

use crate::layout::{BuiltinAsset, DEFAULT_CLIENT, DEFAULT_STYLE};
use crate::module::{
    Export, ModuleLoader, SettingsError, call_plugin, catch_panic, load_settings_export,
};
use crate::site::SiteModel;
use crate::walk::SourceFile;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the persisted source → output map, at the destination root.
pub const METAFILE: &str = "pagesmith-meta.json";

/// Source key → output path, both relative and `/`-separated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AssetMap {
    outputs: BTreeMap<String, String>,
}

impl AssetMap {
    pub fn insert(&mut self, source: &str, output: &str) {
        self.outputs.insert(source.to_string(), output.to_string());
    }

    pub fn get(&self, source: &str) -> Option<&str> {
        self.outputs.get(source).map(String::as_str)
    }

    /// Site-absolute URL of a bundled asset.
    pub fn url(&self, source: &str) -> Option<String> {
        self.get(source).map(|output| format!("/{output}"))
    }

    pub fn extend(&mut self, other: AssetMap) {
        self.outputs.extend(other.outputs);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outputs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Write the map to [`METAFILE`] under `dest`.
    pub fn write_metafile(&self, dest: &Path) -> Result<PathBuf, BundleError> {
        let path = dest.join(METAFILE);
        let json = serde_json::to_string_pretty(self).map_err(|source| BundleError::Metafile {
            path: path.clone(),
            source: source.into(),
        })?;
        fs::write(&path, json + "\n").map_err(|source| BundleError::Metafile {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Style,
    Script,
}

#[derive(Debug, Clone)]
pub enum EntryInput {
    File(PathBuf),
    Builtin(&'static str),
}

#[derive(Debug, Clone)]
pub struct EntryPoint {
    /// Relative source path, or a built-in asset's key.
    pub key: String,
    pub kind: AssetKind,
    pub input: EntryInput,
}

impl EntryPoint {
    pub fn file(file: &SourceFile) -> Self {
        let kind = match file.extension() {
            Some("css") => AssetKind::Style,
            _ => AssetKind::Script,
        };
        Self {
            key: file.relative_path.clone(),
            kind,
            input: EntryInput::File(file.path.clone()),
        }
    }

    pub fn builtin(asset: BuiltinAsset, kind: AssetKind) -> Self {
        Self {
            key: asset.key.to_string(),
            kind,
            input: EntryInput::Builtin(asset.contents),
        }
    }
}

/// Every entry point of a site, deduplicated by key, in key order.
pub fn entry_points(site: &SiteModel) -> Vec<EntryPoint> {
    let mut entries = BTreeMap::new();
    for entry in [
        EntryPoint::builtin(DEFAULT_STYLE, AssetKind::Style),
        EntryPoint::builtin(DEFAULT_CLIENT, AssetKind::Script),
    ] {
        entries.insert(entry.key.clone(), entry);
    }

    let globals = [&site.globals.style, &site.globals.client];
    let layouts = site
        .layouts
        .values()
        .flat_map(|layout| [&layout.style, &layout.client]);
    let pages = site.pages.iter().flat_map(|page| [&page.style, &page.client]);
    for file in globals.into_iter().chain(layouts).chain(pages).flatten() {
        entries
            .entry(file.relative_path.clone())
            .or_insert_with(|| EntryPoint::file(file));
    }
    entries.into_values().collect()
}

/// Options passed through the bundler settings hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct BundleOptions {
    /// Output name pattern; `[dir]`, `[name]` and `[hash]` are substituted
    /// and the entry's extension is appended.
    pub entry_names: String,
    /// Hex digits of the content hash to keep.
    pub hash_length: usize,
    /// Text prepended to every output.
    pub banner: Option<String>,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            entry_names: "[dir]/[name]-[hash]".to_string(),
            hash_length: 8,
            banner: None,
        }
    }
}

/// Resolve bundler options, running the settings hook if the site has one.
///
/// The hook receives the defaults as JSON and returns the options to use. A
/// plain value export is read as a sparse override of the defaults.
pub fn load_options(
    loader: &dyn ModuleLoader,
    hook: Option<&SourceFile>,
) -> Result<BundleOptions, SettingsError> {
    let defaults = BundleOptions::default();
    let Some(file) = hook else {
        return Ok(defaults);
    };
    let options_error = |source| SettingsError::Options {
        file: file.relative_path.clone(),
        source,
    };

    let value = match load_settings_export(loader, file)? {
        Some(Export::Settings(f)) => {
            let input = serde_json::to_value(&defaults).map_err(options_error)?;
            call_plugin(|| f(input)).map_err(|source| SettingsError::Hook {
                file: file.relative_path.clone(),
                source,
            })?
        }
        Some(Export::Value(value)) => value,
        other => {
            return Err(SettingsError::WrongExport {
                file: file.relative_path.clone(),
                expected: "settings hook",
                found: other.as_ref().map(Export::kind_name).unwrap_or("nothing"),
            });
        }
    };

    let options: BundleOptions = serde_json::from_value(value).map_err(options_error)?;
    if !(1..=64).contains(&options.hash_length) {
        return Err(SettingsError::HashLength {
            file: file.relative_path.clone(),
            value: options.hash_length,
        });
    }
    tracing::debug!(?options, "bundler settings applied");
    Ok(options)
}

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("Failed to read {file}")]
    Read {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{file}: failed to write {path}")]
    Write {
        file: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{file}: .{extension} entry points need a transpiling bundler")]
    Unsupported { file: String, extension: String },
    #[error("bundling {file} panicked: {message}")]
    Panicked { file: String, message: String },
    #[error("Failed to write {}", .path.display())]
    Metafile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Emitted assets and per-entry failures.
#[derive(Debug, Default)]
pub struct BundleOutcome {
    pub assets: AssetMap,
    pub errors: Vec<BundleError>,
}

impl BundleOutcome {
    pub fn merge(&mut self, other: BundleOutcome) {
        self.assets.extend(other.assets);
        self.errors.extend(other.errors);
    }
}

pub trait AssetBundler: Send + Sync {
    /// Emit `entries` under `dest`. Every entry is attempted.
    fn bundle(&self, entries: &[EntryPoint], dest: &Path) -> BundleOutcome;
}

/// Copies each entry to a content-hashed output name.
#[derive(Debug, Clone, Default)]
pub struct HashingBundler {
    pub options: BundleOptions,
}

impl HashingBundler {
    pub fn new(options: BundleOptions) -> Self {
        Self { options }
    }

    fn emit(&self, entry: &EntryPoint, dest: &Path) -> Result<String, BundleError> {
        let contents = match &entry.input {
            EntryInput::Builtin(contents) => contents.to_string(),
            EntryInput::File(path) => {
                let extension = extension(&entry.key);
                if matches!(extension, "ts" | "tsx") {
                    return Err(BundleError::Unsupported {
                        file: entry.key.clone(),
                        extension: extension.to_string(),
                    });
                }
                fs::read_to_string(path).map_err(|source| BundleError::Read {
                    file: entry.key.clone(),
                    source,
                })?
            }
        };
        let contents = match &self.options.banner {
            Some(banner) => format!("{banner}\n{contents}"),
            None => contents,
        };

        let digest = format!("{:x}", Sha256::digest(contents.as_bytes()));
        let hash = &digest[..self.options.hash_length.min(digest.len())];
        let output = output_name(&self.options.entry_names, &entry.key, hash);

        let path = output
            .split('/')
            .fold(dest.to_path_buf(), |path, part| path.join(part));
        let written = match path.parent() {
            Some(parent) => fs::create_dir_all(parent),
            None => Ok(()),
        }
        .and_then(|_| fs::write(&path, contents));
        written.map_err(|source| BundleError::Write {
            file: entry.key.clone(),
            path: path.clone(),
            source,
        })?;
        Ok(output)
    }
}

impl AssetBundler for HashingBundler {
    fn bundle(&self, entries: &[EntryPoint], dest: &Path) -> BundleOutcome {
        let results: Vec<(String, Result<String, BundleError>)> = entries
            .par_iter()
            .map(|entry| {
                let result = catch_panic(|| self.emit(entry, dest)).unwrap_or_else(|message| {
                    Err(BundleError::Panicked {
                        file: entry.key.clone(),
                        message,
                    })
                });
                (entry.key.clone(), result)
            })
            .collect();

        let mut outcome = BundleOutcome::default();
        for (key, result) in results {
            match result {
                Ok(output) => {
                    tracing::debug!("bundled {key} -> {output}");
                    outcome.assets.insert(&key, &output);
                }
                Err(err) => outcome.errors.push(err),
            }
        }
        outcome
    }
}

fn extension(key: &str) -> &str {
    let basename = key.rsplit('/').next().unwrap_or(key);
    basename.rsplit_once('.').map_or("", |(_, ext)| ext)
}

/// Apply an `entryNames` pattern to a source key.
fn output_name(pattern: &str, key: &str, hash: &str) -> String {
    let (dir, basename) = key.rsplit_once('/').unwrap_or(("", key));
    let (name, ext) = basename.rsplit_once('.').unwrap_or((basename, ""));
    let stem = pattern
        .replace("[dir]", dir)
        .replace("[name]", name)
        .replace("[hash]", hash);
    let stem = stem
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/");
    if ext.is_empty() {
        stem
    } else {
        format!("{stem}.{ext}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Module, ModuleRegistry};
    use serde_json::json;
    use tempfile::TempDir;

    fn source(tmp: &TempDir, relative: &str, contents: &str) -> SourceFile {
        let file = SourceFile::new(tmp.path(), relative);
        fs::create_dir_all(file.path.parent().unwrap()).unwrap();
        fs::write(&file.path, contents).unwrap();
        file
    }

    // =========================================================================
    // Output names
    // =========================================================================

    #[test]
    fn output_names_follow_the_pattern() {
        let pattern = "[dir]/[name]-[hash]";
        assert_eq!(output_name(pattern, "global.css", "abcd1234"), "global-abcd1234.css");
        assert_eq!(
            output_name(pattern, "blog/client.js", "abcd1234"),
            "blog/client-abcd1234.js"
        );
        assert_eq!(
            output_name(pattern, "_pagesmith/default.style.css", "00ff"),
            "_pagesmith/default.style-00ff.css"
        );
        assert_eq!(output_name("assets/[name]", "a/b.js", "x"), "assets/b.js");
    }

    // =========================================================================
    // Hashing bundler
    // =========================================================================

    #[test]
    fn emits_hashed_copies() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let file = source(&src, "blog/style.css", "body { color: red }");

        let outcome = HashingBundler::default().bundle(&[EntryPoint::file(&file)], dest.path());
        assert!(outcome.errors.is_empty());

        let output = outcome.assets.get("blog/style.css").unwrap().to_string();
        assert!(output.starts_with("blog/style-"));
        assert!(output.ends_with(".css"));
        assert_eq!(output.len(), "blog/style-".len() + 8 + ".css".len());
        assert_eq!(
            fs::read_to_string(dest.path().join(&output)).unwrap(),
            "body { color: red }"
        );
        assert_eq!(outcome.assets.url("blog/style.css"), Some(format!("/{output}")));
    }

    #[test]
    fn hashes_are_stable() {
        let src = TempDir::new().unwrap();
        let file = source(&src, "global.css", "a{}");
        let entries = [EntryPoint::file(&file)];
        let first = HashingBundler::default().bundle(&entries, TempDir::new().unwrap().path());
        let second = HashingBundler::default().bundle(&entries, TempDir::new().unwrap().path());
        assert_eq!(first.assets, second.assets);
    }

    #[test]
    fn banner_is_prepended() {
        let dest = TempDir::new().unwrap();
        let bundler = HashingBundler::new(BundleOptions {
            banner: Some("/* built */".into()),
            ..BundleOptions::default()
        });
        let entry = EntryPoint::builtin(DEFAULT_STYLE, AssetKind::Style);
        let outcome = bundler.bundle(&[entry], dest.path());
        let output = outcome.assets.get(DEFAULT_STYLE.key).unwrap();
        let written = fs::read_to_string(dest.path().join(output)).unwrap();
        assert!(written.starts_with("/* built */\n"));
    }

    #[test]
    fn typescript_entries_fail_individually() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let ts = source(&src, "client.ts", "export {}");
        let js = source(&src, "global.client.js", "console.log(1)");

        let outcome = HashingBundler::default()
            .bundle(&[EntryPoint::file(&ts), EntryPoint::file(&js)], dest.path());
        assert_eq!(outcome.assets.len(), 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(
            outcome.errors[0].to_string(),
            "client.ts: .ts entry points need a transpiling bundler"
        );
    }

    #[test]
    fn missing_files_are_read_errors() {
        let dest = TempDir::new().unwrap();
        let file = SourceFile::new(Path::new("/nonexistent-pagesmith"), "style.css");
        let outcome = HashingBundler::default().bundle(&[EntryPoint::file(&file)], dest.path());
        assert!(matches!(outcome.errors[0], BundleError::Read { .. }));
    }

    #[test]
    fn metafile_has_sorted_keys() {
        let dest = TempDir::new().unwrap();
        let mut assets = AssetMap::default();
        assets.insert("z.css", "z-1.css");
        assets.insert("a.js", "a-2.js");
        let path = assets.write_metafile(dest.path()).unwrap();
        let written = fs::read_to_string(path).unwrap();
        assert!(written.find("a.js").unwrap() < written.find("z.css").unwrap());
        let parsed: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed["a.js"], "a-2.js");
    }

    // =========================================================================
    // Settings hook
    // =========================================================================

    #[test]
    fn options_default_without_hook() {
        let options = load_options(&ModuleRegistry::new(), None).unwrap();
        assert_eq!(options, BundleOptions::default());
    }

    #[test]
    fn hook_receives_and_returns_options() {
        let registry = ModuleRegistry::new().with(
            "esbuild.settings.js",
            Module::new().with_default(Export::settings(|mut options| {
                assert_eq!(options["hashLength"], 8);
                options["hashLength"] = json!(12);
                options["banner"] = json!("/* hi */");
                Ok(options)
            })),
        );
        let file = SourceFile::new(Path::new("/site"), "esbuild.settings.js");
        let options = load_options(&registry, Some(&file)).unwrap();
        assert_eq!(options.hash_length, 12);
        assert_eq!(options.banner.as_deref(), Some("/* hi */"));
        assert_eq!(options.entry_names, "[dir]/[name]-[hash]");
    }

    #[test]
    fn value_export_is_a_sparse_override() {
        let registry = ModuleRegistry::new().with(
            "esbuild.settings.js",
            Module::new()
                .with_default(Export::value(json!({"entryNames": "assets/[name]-[hash]"}))),
        );
        let file = SourceFile::new(Path::new("/site"), "esbuild.settings.js");
        let options = load_options(&registry, Some(&file)).unwrap();
        assert_eq!(options.entry_names, "assets/[name]-[hash]");
        assert_eq!(options.hash_length, 8);
    }

    #[test]
    fn invalid_options_are_rejected() {
        let file = SourceFile::new(Path::new("/site"), "esbuild.settings.js");

        let unknown = ModuleRegistry::new().with(
            "esbuild.settings.js",
            Module::new().with_default(Export::value(json!({"minify": true}))),
        );
        assert!(matches!(
            load_options(&unknown, Some(&file)),
            Err(SettingsError::Options { .. })
        ));

        let too_long = ModuleRegistry::new().with(
            "esbuild.settings.js",
            Module::new().with_default(Export::value(json!({"hashLength": 0}))),
        );
        assert!(matches!(
            load_options(&too_long, Some(&file)),
            Err(SettingsError::HashLength { value: 0, .. })
        ));
    }

    #[test]
    fn failing_hook_is_reported() {
        let registry = ModuleRegistry::new().with(
            "esbuild.settings.js",
            Module::new().with_default(Export::settings(|_| Err("bad settings".into()))),
        );
        let file = SourceFile::new(Path::new("/site"), "esbuild.settings.js");
        let err = load_options(&registry, Some(&file)).unwrap_err();
        assert_eq!(err.to_string(), "esbuild.settings.js: settings hook failed");
    }
}
