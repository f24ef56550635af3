use std::path::{Path, PathBuf};

use crate::error::{TwoWaySqlError, TwoWaySqlResult};

/// Reads template files from the filesystem, with optional per-environment
/// overrides.
///
/// With a suffix of `oracle`, a request for `sql/emp.sql` first tries
/// `sql/emp-oracle.sql` and falls back to the plain file. Templates are read
/// as UTF-8.
#[derive(Debug, Clone, Default)]
pub struct TemplateLoader;

impl TemplateLoader {
    pub fn new() -> Self {
        Self
    }

    pub fn load(&self, location: &str, suffix_name: Option<&str>) -> TwoWaySqlResult<String> {
        if let Some(suffix) = suffix_name {
            let candidate = suffixed_location(location, suffix);
            if candidate.is_file() {
                tracing::debug!(location, candidate = %candidate.display(), "loading suffixed template");
                return read(&candidate, location);
            }
        }

        let path = Path::new(location);
        if path.is_file() {
            tracing::debug!(location, "loading template");
            return read(path, location);
        }

        Err(TwoWaySqlError::TemplateNotFound {
            location: location.to_string(),
        })
    }
}

fn read(path: &Path, location: &str) -> TwoWaySqlResult<String> {
    std::fs::read_to_string(path).map_err(|source| TwoWaySqlError::TemplateLoad {
        location: location.to_string(),
        source,
    })
}

/// `sql/emp.sql` + `oracle` -> `sql/emp-oracle.sql`.
fn suffixed_location(location: &str, suffix: &str) -> PathBuf {
    let path = Path::new(location);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let name = match path.extension().and_then(|s| s.to_str()) {
        Some(ext) => format!("{stem}-{suffix}.{ext}"),
        None => format!("{stem}-{suffix}"),
    };
    path.with_file_name(name)
}
