use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Cursor};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const DEFAULT_BUNDLE_NAME: &str = "bundle.zip";
pub const BUNDLE_CONTENT_TYPE: &str = "application/zip";

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("i/o error while bundling: {0}")]
    Io(#[from] io::Error),
}

/// Archive name for a multi-part upload, always ending in `.zip`
pub fn bundle_name(requested: Option<&str>) -> String {
    match requested.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) if name.to_ascii_lowercase().ends_with(".zip") => name.to_string(),
        Some(name) => format!("{}.zip", name),
        None => DEFAULT_BUNDLE_NAME.to_string(),
    }
}

/// Zip `parts` (archive name, file on disk) in the given order.
///  Repeated names get a ` (n)` suffix ahead of the extension.
///  Blocking; run it on the blocking pool.
pub fn bundle<'a>(parts: impl IntoIterator<Item = (&'a str, &'a Path)>) -> Result<Vec<u8>, BundleError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut used = HashSet::new();

    for (name, path) in parts {
        let entry = unique_name(name, &mut used);
        writer.start_file(entry, options)?;
        let mut file = File::open(path)?;
        io::copy(&mut file, &mut writer)?;
    }

    Ok(writer.finish()?.into_inner())
}

fn unique_name(name: &str, used: &mut HashSet<String>) -> String {
    if used.insert(name.to_string()) {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    };
    let mut n = 1;
    loop {
        let candidate = format!("{} ({}){}", stem, n, ext);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
