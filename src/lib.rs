//! # Pagesmith
//!
//! A convention-driven static site builder. The source directory is the
//! site: a directory with a `README.md`, `page.js` or `page.html` is a page,
//! and layouts, styles, client scripts and variables are found next to it by
//! name. There is no routing table and no front-matter schema to learn.
//!
//! # Architecture: Scan, Then Emit
//!
//! ```text
//! 1. Scan     src/   →  SiteModel     (walk, classify, attach; nothing written)
//! 2. Emit     model  →  dest/         (copy ‖ bundle → compose pages + templates)
//! ```
//!
//! Scanning is all-or-nothing. Two page sources in one directory, or two
//! pages writing the same file, stop the build before the destination is
//! touched. Emitting is the opposite: every page, template, asset and copied
//! file is attempted, and failures are collected into one aggregate error
//! that still carries the report of everything that did build.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`walk`] | Walks the source tree with gitignore-style ignores; classifies files by basename |
//! | [`site`] | Builds the site model: pages and their attachments, layouts, templates, globals |
//! | [`module`] | `ModuleLoader` capability: compiled-in modules, data files, panic isolation |
//! | [`vars`] | Layered variables: defaults, global, page, post-render, builder |
//! | [`builders`] | Page builders for markdown, HTML and script pages |
//! | [`markdown`] | pulldown-cmark rendering, front matter, link rewriting, renderer hooks |
//! | [`layout`] | Layout loading and the built-in maud default layout |
//! | [`compose`] | Two-pass page composition: prepare every page, then render and write |
//! | [`template`] | Template runner: strings, files, lists and lazy streams of files |
//! | [`bundle`] | Content-hashed styles and scripts, and the persisted asset map |
//! | [`copy`] | Static file and copy-directory mirroring |
//! | [`pretty`] | Output HTML indentation |
//! | [`build`] | The `Pipeline`: orchestration, error aggregation, `BuildReport` |
//! | [`config`] | `pagesmith.toml` loading, merging and validation |
//! | [`output`] | CLI formatting of build reports, warnings and error chains |
//! | [`watch`] | Debounced rebuild on source changes |
//! | [`serve`] | Development HTTP server for the output directory |
//! | [`eject`] | Copies the built-in style and client into a site |
//!
//! # Design Decisions
//!
//! ## Modules Instead of Dynamic Imports
//!
//! Script pages, layouts, templates and settings hooks are loaded through a
//! [`module::ModuleLoader`], keyed by the file's relative path. The crate
//! ships a registry for modules compiled into the host program and a loader
//! for data files. Anything else (an embedded interpreter, a subprocess) is
//! another loader; the resolution rules do not change.
//!
//! ## Maud Over Template Engines
//!
//! The built-in default layout is written with [Maud](https://maud.lambda.xyz/),
//! so it is checked at compile time and escapes interpolated values. User
//! layouts can return either a finished string or maud markup.
//!
//! ## Variable Precedence
//!
//! Variables merge shallowly in a fixed order, later tiers winning:
//!
//! ```text
//! defaults → global.vars.* → page.vars.* → postVars → front matter / script vars
//! ```
//!
//! The post-render tier can read every other page's variables, which is how
//! an index page lists its siblings. It cannot override builder variables.

pub mod build;
pub mod builders;
pub mod bundle;
pub mod compose;
pub mod config;
pub mod copy;
pub mod eject;
pub mod layout;
pub mod markdown;
pub mod module;
pub mod output;
pub mod pretty;
pub mod serve;
pub mod site;
pub mod template;
pub mod vars;
pub mod walk;
pub mod watch;

#[cfg(test)]
pub(crate) mod test_helpers;
