//! Build orchestration.
//!
//! A [`Pipeline`] runs one full build of a source tree:
//!
//! 1. **Scan**: walk the tree and build the site model. Structural problems
//!    are fatal here, before anything is written.
//! 2. **Settings**: apply the markdown and bundler settings hooks. Also fatal.
//! 3. **Emit**: static copy runs on its own thread while styles and scripts
//!    are bundled in parallel; then pages are composed and templates run
//!    against the finished asset map.
//!
//! Every item in step 3 is attempted. Failures are collected as
//! [`ItemError`]s and returned together in [`BuildError::Aggregate`], which
//! still carries the full report of what did build.

use crate::builders::PageBuilderRegistry;
use crate::bundle::{
    AssetBundler, AssetKind, AssetMap, BundleError, BundleOutcome, EntryPoint, HashingBundler,
    entry_points, load_options,
};
use crate::compose::{ComposeEnv, PageError, PageOutcome, PageView, compose_page, prepare_page};
use crate::config::{BuildConfig, normalize};
use crate::copy::{CopyError, CopyOutcome, copy_directories, copy_static};
use crate::layout::LayoutSet;
use crate::markdown::{MarkdownRenderer, load_renderer};
use crate::module::{DataLoader, LoaderChain, ModuleLoader, ModuleRegistry, SettingsError};
use crate::site::{SiteError, SiteModel, Warning, build_site_model};
use crate::template::{TemplateError, TemplateOutcome, run_template};
use crate::vars::{Tier, VarLayers, VarsError, default_vars, resolve_vars};
use crate::walk::{IgnoreSet, WalkError, relative_path, walk};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use thiserror::Error;

/// Errors that stop a build before it writes anything.
#[derive(Error, Debug)]
pub enum FatalError {
    #[error(transparent)]
    Walk(#[from] WalkError),
    #[error(transparent)]
    Site(#[from] SiteError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("Failed to create output directory {}", .path.display())]
    Dest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A failure attributed to one page, template, asset or copied file.
#[derive(Error, Debug)]
pub enum ItemError {
    #[error(transparent)]
    Page(#[from] PageError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Asset(#[from] BundleError),
    #[error(transparent)]
    Copy(#[from] CopyError),
    #[error("Error resolving global vars")]
    GlobalVars {
        #[source]
        source: VarsError,
    },
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Fatal(#[from] FatalError),
    #[error("build failed with {} error(s)", .0.errors.len())]
    Aggregate(Box<BuildReport>),
}

impl BuildError {
    /// The partial report, when the build got far enough to have one.
    pub fn report(&self) -> Option<&BuildReport> {
        match self {
            BuildError::Fatal(_) => None,
            BuildError::Aggregate(report) => Some(report),
        }
    }

    pub fn errors(&self) -> &[ItemError] {
        self.report().map_or(&[][..], |report| report.errors.as_slice())
    }
}

/// Everything one build produced.
#[derive(Debug)]
pub struct BuildReport {
    pub site: SiteModel,
    pub dest: PathBuf,
    pub assets: AssetMap,
    pub pages: Vec<PageOutcome>,
    pub templates: Vec<TemplateOutcome>,
    /// Relative paths of copied static files.
    pub copied: Vec<String>,
    pub warnings: Vec<Warning>,
    pub errors: Vec<ItemError>,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn page(&self, source: &str) -> Option<&PageOutcome> {
        self.pages.iter().find(|page| page.source == source)
    }
}

/// Pages and templates produced by the compose phase.
#[derive(Default)]
struct Composed {
    pages: Vec<PageOutcome>,
    templates: Vec<TemplateOutcome>,
    errors: Vec<ItemError>,
}

/// A configured build of one source tree.
pub struct Pipeline {
    src: PathBuf,
    dest: PathBuf,
    config: BuildConfig,
    loader: Arc<dyn ModuleLoader>,
    bundler: Option<Arc<dyn AssetBundler>>,
    builders: PageBuilderRegistry,
}

impl Pipeline {
    /// A pipeline that loads data files only. Script modules come from
    /// [`Pipeline::with_modules`] or a custom loader.
    ///
    /// A relative `src` resolves against the working directory.
    pub fn new(src: impl Into<PathBuf>, config: BuildConfig) -> Self {
        let src = src.into();
        let src = normalize(&std::path::absolute(&src).unwrap_or(src));
        Self {
            dest: config.dest_path(&src),
            src,
            config,
            loader: Arc::new(LoaderChain::new().with(DataLoader)),
            bundler: None,
            builders: PageBuilderRegistry::default(),
        }
    }

    pub fn with_dest(mut self, dest: impl Into<PathBuf>) -> Self {
        self.dest = dest.into();
        self
    }

    /// Load script modules from `registry`, falling back to data files.
    pub fn with_modules(self, registry: ModuleRegistry) -> Self {
        self.with_loader(Arc::new(LoaderChain::new().with(registry).with(DataLoader)))
    }

    pub fn with_loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Replace the built-in hashing bundler. The bundler settings hook only
    /// configures the built-in one.
    pub fn with_bundler(mut self, bundler: impl AssetBundler + 'static) -> Self {
        self.bundler = Some(Arc::new(bundler));
        self
    }

    pub fn with_builders(mut self, builders: PageBuilderRegistry) -> Self {
        self.builders = builders;
        self
    }

    pub fn src(&self) -> &Path {
        &self.src
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Default ignores, configured patterns, and the output and copy
    /// directories when they live inside the source tree.
    pub fn ignore_set(&self) -> Result<IgnoreSet, WalkError> {
        let mut ignore = IgnoreSet::with_defaults(&self.config.ignore)?;
        let inside = std::iter::once(self.dest.clone()).chain(self.config.copy_paths(&self.src));
        for dir in inside {
            if dir.starts_with(&self.src) {
                ignore.push_directory(&relative_path(&self.src, &dir))?;
            }
        }
        Ok(ignore)
    }

    /// Walk the source tree and build the site model.
    pub fn scan(&self) -> Result<SiteModel, FatalError> {
        let ignore = self.ignore_set()?;
        let groups = walk(&self.src, &ignore)?;
        Ok(build_site_model(&self.src, &groups, &self.builders.kinds())?)
    }

    /// Run a full build.
    pub fn build(&self) -> Result<BuildReport, BuildError> {
        let site = self.scan()?;
        let markdown = load_renderer(
            self.loader.as_ref(),
            site.globals.markdown_settings.as_ref(),
            &self.config.markdown,
        )
        .map_err(FatalError::from)?;
        let bundler: Arc<dyn AssetBundler> = match &self.bundler {
            Some(bundler) => bundler.clone(),
            None => {
                let settings = site.globals.bundler_settings.as_ref();
                let options =
                    load_options(self.loader.as_ref(), settings).map_err(FatalError::from)?;
                Arc::new(HashingBundler::new(options))
            }
        };
        fs::create_dir_all(&self.dest).map_err(|source| FatalError::Dest {
            path: self.dest.clone(),
            source,
        })?;

        let entries = entry_points(&site);
        let (copied, bundled, composed) = thread::scope(|scope| {
            let copy = scope.spawn(|| self.copy(&site));
            let bundled = self.bundle(bundler.as_ref(), entries);
            let composed = self.compose(&site, &bundled.assets, &markdown);
            let copied = copy.join().unwrap_or_else(|_| CopyOutcome {
                copied: Vec::new(),
                errors: vec![CopyError::Panicked {
                    from: self.src.clone(),
                    message: "static copy thread panicked".into(),
                }],
            });
            (copied, bundled, composed)
        });

        let mut errors = composed.errors;
        errors.extend(bundled.errors.into_iter().map(ItemError::from));
        errors.extend(copied.errors.into_iter().map(ItemError::from));

        let report = BuildReport {
            warnings: site.warnings.clone(),
            site,
            dest: self.dest.clone(),
            assets: bundled.assets,
            pages: composed.pages,
            templates: composed.templates,
            copied: copied.copied,
            errors,
        };
        tracing::info!(
            pages = report.pages.len(),
            templates = report.templates.len(),
            assets = report.assets.len(),
            copied = report.copied.len(),
            errors = report.errors.len(),
            "built {}",
            self.src.display()
        );

        if report.is_success() {
            Ok(report)
        } else {
            Err(BuildError::Aggregate(Box::new(report)))
        }
    }

    fn copy(&self, site: &SiteModel) -> CopyOutcome {
        let mut outcome = copy_static(&site.static_files, &self.dest);
        outcome.merge(copy_directories(&self.config.copy_paths(&self.src), &self.dest));
        outcome
    }

    /// Bundle styles and scripts side by side, then persist the asset map.
    fn bundle(&self, bundler: &dyn AssetBundler, entries: Vec<EntryPoint>) -> BundleOutcome {
        let (styles, scripts): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|entry| entry.kind == AssetKind::Style);
        let (mut outcome, scripts) = rayon::join(
            || bundler.bundle(&styles, &self.dest),
            || bundler.bundle(&scripts, &self.dest),
        );
        outcome.merge(scripts);
        if let Err(err) = outcome.assets.write_metafile(&self.dest) {
            outcome.errors.push(err);
        }
        outcome
    }

    fn compose(
        &self,
        site: &SiteModel,
        assets: &AssetMap,
        markdown: &MarkdownRenderer,
    ) -> Composed {
        let global = match resolve_vars(self.loader.as_ref(), site.globals.vars.as_ref()) {
            Ok(global) => global,
            Err(source) => {
                return Composed {
                    errors: vec![ItemError::GlobalVars { source }],
                    ..Composed::default()
                };
            }
        };

        let layouts = LayoutSet::new(&site.layouts, self.loader.clone());
        let env = ComposeEnv {
            dest: &self.dest,
            globals: &site.globals,
            assets,
            loader: self.loader.as_ref(),
            builders: &self.builders,
            markdown,
            layouts: &layouts,
        };

        let mut composed = Composed::default();
        let mut prepared = Vec::with_capacity(site.pages.len());
        let results: Vec<_> = site
            .pages
            .par_iter()
            .map(|entry| prepare_page(entry, &env, &global))
            .collect();
        for result in results {
            match result {
                Ok(page) => prepared.push(page),
                Err(err) => composed.errors.push(err.into()),
            }
        }
        let views: Vec<PageView> = prepared.iter().map(|page| page.view.clone()).collect();

        let template_vars = VarLayers::new()
            .with(Tier::Defaults, default_vars())
            .with(Tier::Global, global.clone())
            .merged();
        let page_outputs: BTreeSet<String> =
            site.pages.iter().map(|entry| entry.output_path()).collect();
        let (pages, runs) = rayon::join(
            || {
                prepared
                    .par_iter()
                    .map(|page| compose_page(page, &views, &env))
                    .collect::<Vec<_>>()
            },
            || {
                site.templates
                    .par_iter()
                    .map(|template| {
                        run_template(
                            template,
                            &template_vars,
                            &views,
                            env.loader,
                            &self.dest,
                            &page_outputs,
                        )
                    })
                    .collect::<Vec<_>>()
            },
        );

        for result in pages {
            match result {
                Ok(outcome) => composed.pages.push(outcome),
                Err(err) => composed.errors.push(err.into()),
            }
        }
        for run in runs {
            let (outcome, errors) = run.into_parts();
            composed.templates.push(outcome);
            composed.errors.extend(errors.into_iter().map(ItemError::from));
        }
        composed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::write_file;
    use crate::walk::PageKind;
    use tempfile::TempDir;

    fn pipeline(src: &TempDir) -> Pipeline {
        Pipeline::new(src.path(), BuildConfig::default())
    }

    #[test]
    fn dest_inside_src_is_ignored() {
        let src = TempDir::new().unwrap();
        write_file(src.path(), "README.md", "# Home");
        write_file(src.path(), "public/old/index.html", "stale");

        let site = pipeline(&src).scan().unwrap();
        assert_eq!(site.pages.len(), 1);
        assert!(site.static_files.is_empty());
    }

    #[test]
    fn copy_directories_are_not_walked() {
        let src = TempDir::new().unwrap();
        write_file(src.path(), "README.md", "# Home");
        write_file(src.path(), "assets/logo.svg", "<svg/>");

        let config = BuildConfig {
            copy: vec!["assets".into()],
            ..BuildConfig::default()
        };
        let pipeline = Pipeline::new(src.path(), config);
        assert!(pipeline.scan().unwrap().static_files.is_empty());

        let report = pipeline.build().unwrap();
        assert_eq!(report.copied, vec!["logo.svg"]);
        assert!(src.path().join("public/logo.svg").exists());
    }

    #[test]
    fn builds_markdown_site_with_data_vars() {
        let src = TempDir::new().unwrap();
        write_file(src.path(), "README.md", "# Home\n\nSee [notes](notes.md).");
        write_file(src.path(), "notes.md", "# Notes");
        write_file(src.path(), "global.vars.json", r#"{"siteName": "Demo"}"#);
        write_file(src.path(), "global.css", "body { margin: 0 }");

        let report = pipeline(&src).build().unwrap();
        assert_eq!(report.pages.len(), 2);
        assert_eq!(report.warnings, vec![Warning::MissingRootLayout]);

        let home = fs::read_to_string(src.path().join("public/index.html")).unwrap();
        assert!(home.contains("<title>Home | Demo</title>"));
        assert!(home.contains(r#"href="notes/""#));
        let global_css = report.assets.url("global.css").unwrap();
        assert!(home.contains(&global_css));
        assert!(src.path().join("public/notes.html").exists());
        assert!(src.path().join("public/pagesmith-meta.json").exists());
    }

    #[test]
    fn fatal_errors_have_no_report() {
        let src = TempDir::new().unwrap();
        write_file(src.path(), "page.html", "<p>a</p>");
        write_file(src.path(), "README.md", "# b");

        let err = pipeline(&src).build().unwrap_err();
        assert!(matches!(err, BuildError::Fatal(FatalError::Site(_))));
        assert!(err.report().is_none());
        assert!(err.errors().is_empty());
        assert!(!src.path().join("public").exists());
    }

    #[test]
    fn missing_source_is_fatal() {
        let err = Pipeline::new("/nonexistent-pagesmith-src", BuildConfig::default())
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::Fatal(FatalError::Walk(_))));
    }

    #[test]
    fn typescript_client_is_an_item_error() {
        let src = TempDir::new().unwrap();
        write_file(src.path(), "README.md", "# Home");
        write_file(src.path(), "docs/README.md", "# Docs");
        write_file(src.path(), "docs/client.ts", "export {}");

        let err = pipeline(&src).build().unwrap_err();
        let report = err.report().unwrap();
        assert!(report.page("README.md").is_some());
        assert!(report.page("docs/README.md").is_none());
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ItemError::Asset(BundleError::Unsupported { .. }))));
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ItemError::Page(PageError::MissingAsset { .. }))));
    }

    #[test]
    fn failing_global_vars_skip_pages() {
        let src = TempDir::new().unwrap();
        write_file(src.path(), "README.md", "# Home");
        write_file(src.path(), "global.vars.json", "[1, 2]");

        let err = pipeline(&src).build().unwrap_err();
        let report = err.report().unwrap();
        assert!(report.pages.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].to_string(), "Error resolving global vars");
    }

    /// Names every entry `static/<key>` and writes nothing.
    struct NamingBundler;

    impl AssetBundler for NamingBundler {
        fn bundle(&self, entries: &[EntryPoint], _dest: &Path) -> BundleOutcome {
            let mut outcome = BundleOutcome::default();
            for entry in entries {
                outcome.assets.insert(&entry.key, &format!("static/{}", entry.key));
            }
            outcome
        }
    }

    #[test]
    fn custom_bundler_replaces_the_builtin_one() {
        let src = TempDir::new().unwrap();
        write_file(src.path(), "README.md", "# Home");
        write_file(src.path(), "client.ts", "export {}");

        let report = pipeline(&src).with_bundler(NamingBundler).build().unwrap();
        assert_eq!(report.assets.get("client.ts"), Some("static/client.ts"));
        let home = fs::read_to_string(src.path().join("public/index.html")).unwrap();
        assert!(home.contains("/static/client.ts"));
    }

    #[test]
    fn pages_without_a_builder_are_skipped_with_a_warning() {
        let src = TempDir::new().unwrap();
        write_file(src.path(), "README.md", "# Home");
        write_file(src.path(), "about/page.html", "<p>About</p>");

        let builders = PageBuilderRegistry::default().without(PageKind::Html);
        let report = pipeline(&src).with_builders(builders).build().unwrap();
        assert_eq!(report.pages.len(), 1);
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::UnimplementedPageType { kind: PageKind::Html, .. })));
        assert!(!src.path().join("public/about/index.html").exists());
    }
}
