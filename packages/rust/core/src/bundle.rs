//! Zip bundle of repaired documents.

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use pdfaudit_shared::{AuditError, Result};

/// Pack `files` flat into `zip_path`. Clashing names get their index as a
/// prefix; missing files are skipped. Returns the number of entries, or
/// `None` when `files` is empty and no archive was written.
pub fn create_repair_bundle(files: &[PathBuf], zip_path: &Path) -> Result<Option<usize>> {
    if files.is_empty() {
        return Ok(None);
    }
    info!(files = files.len(), zip = %zip_path.display(), "creating repair bundle");

    let out = File::create(zip_path).map_err(|e| AuditError::io(zip_path, e))?;
    let mut zip = ZipWriter::new(out);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut used = HashSet::new();
    for (idx, path) in files.iter().enumerate() {
        let Some(base) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let mut input = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "repaired file missing, not bundled");
                continue;
            }
        };

        let name = unique_name(&base, idx, |n| used.contains(n));
        zip.start_file(name.as_str(), options)
            .map_err(|e| AuditError::data(format!("zip entry {name}: {e}")))?;
        std::io::copy(&mut input, &mut zip).map_err(|e| AuditError::io(path, e))?;
        used.insert(name);
    }

    zip.finish()
        .map_err(|e| AuditError::data(format!("finish {}: {e}", zip_path.display())))?;
    Ok(Some(used.len()))
}

/// `base` if free, else `{index}_{base}`, else `{index}_{n}_{base}` for the
/// first `n` (from 2) that `taken` does not report.
pub(crate) fn unique_name(base: &str, index: usize, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    let prefixed = format!("{index}_{base}");
    if !taken(&prefixed) {
        return prefixed;
    }
    (2..)
        .map(|n| format!("{index}_{n}_{base}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or(prefixed)
}
