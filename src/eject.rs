//! `--eject`: copy the built-in default style and client into the site.
//!
//! After ejecting, the site owns `global.css` and `global.client.js`, and
//! `global.vars.json` turns the built-in assets off so they are not loaded
//! twice. Ejecting never overwrites: if the site already has any global
//! style, client or vars file (in any supported extension), nothing is
//! written.

use crate::layout::{DEFAULT_CLIENT, DEFAULT_STYLE};
use crate::walk::{Role, classify};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const EJECTED_VARS: &str = "{\n  \"defaultStyle\": false,\n  \"defaultClient\": false\n}\n";

#[derive(Error, Debug)]
pub enum EjectError {
    #[error("{} already exists; refusing to eject over it", .0.display())]
    Exists(PathBuf),
    #[error("Failed to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Write the ejected files into `src`. Returns the paths written.
pub fn eject(src: &Path) -> Result<Vec<PathBuf>, EjectError> {
    if let Some(existing) = existing_global(src)? {
        return Err(EjectError::Exists(existing));
    }

    let files = [
        ("global.css", DEFAULT_STYLE.contents),
        ("global.client.js", DEFAULT_CLIENT.contents),
        ("global.vars.json", EJECTED_VARS),
    ];
    let mut written = Vec::with_capacity(files.len());
    for (name, contents) in files {
        let path = src.join(name);
        fs::write(&path, contents).map_err(|source| EjectError::Write {
            path: path.clone(),
            source,
        })?;
        tracing::info!("ejected {}", path.display());
        written.push(path);
    }
    Ok(written)
}

/// The first root file that is already a global style, client or vars file.
fn existing_global(src: &Path) -> Result<Option<PathBuf>, EjectError> {
    let read = |source| EjectError::Read {
        path: src.to_path_buf(),
        source,
    };
    let mut names = Vec::new();
    for entry in fs::read_dir(src).map_err(read)? {
        let entry = entry.map_err(read)?;
        if entry.path().is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names
        .into_iter()
        .find(|name| {
            matches!(
                classify(name, true),
                Some(Role::GlobalStyle | Role::GlobalClient | Role::GlobalVars)
            )
        })
        .map(|name| src.join(name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::write_file;
    use serde_json::Value;
    use tempfile::TempDir;

    #[test]
    fn writes_the_builtin_assets() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "README.md", "# Home");

        let written = eject(tmp.path()).unwrap();
        assert_eq!(written.len(), 3);
        assert_eq!(
            fs::read_to_string(tmp.path().join("global.css")).unwrap(),
            DEFAULT_STYLE.contents
        );
        assert_eq!(
            fs::read_to_string(tmp.path().join("global.client.js")).unwrap(),
            DEFAULT_CLIENT.contents
        );
        let vars: Value =
            serde_json::from_str(&fs::read_to_string(tmp.path().join("global.vars.json")).unwrap())
                .unwrap();
        assert_eq!(vars["defaultStyle"], false);
        assert_eq!(vars["defaultClient"], false);
    }

    #[test]
    fn refuses_when_a_global_file_exists() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "global.vars.yaml", "title: Mine");

        let err = eject(tmp.path()).unwrap_err();
        assert!(matches!(&err, EjectError::Exists(path) if path.ends_with("global.vars.yaml")));
        assert!(!tmp.path().join("global.css").exists());
    }

    #[test]
    fn nested_global_names_do_not_count() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "docs/global.css", "p {}");
        assert!(eject(tmp.path()).is_ok());
    }

    #[test]
    fn missing_source_is_a_read_error() {
        let tmp = TempDir::new().unwrap();
        let err = eject(&tmp.path().join("nope")).unwrap_err();
        assert!(matches!(err, EjectError::Read { .. }));
    }
}
