//! Zip packaging for multi-file results.

use crate::error::ToolifyError;
use std::collections::HashSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Write `entries` (`(name in archive, file on disk)`) to a deflated zip.
///
/// Duplicate names get a ` (n)` suffix before the extension, since a zip
/// entry name may appear only once.
pub async fn zip_files(entries: Vec<(String, PathBuf)>, output: &Path) -> Result<(), ToolifyError> {
    let output = output.to_path_buf();
    tokio::task::spawn_blocking(move || zip_blocking(&entries, &output))
        .await
        .map_err(|e| ToolifyError::Internal(format!("Zip task panicked: {e}")))?
}

fn zip_blocking(entries: &[(String, PathBuf)], output: &Path) -> Result<(), ToolifyError> {
    let zip_err = |e: zip::result::ZipError| ToolifyError::TransformFailed {
        operation: "create archive".into(),
        detail: e.to_string(),
    };
    let file = File::create(output).map_err(|e| ToolifyError::io("create archive", e))?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
    for (name, (_, path)) in unique_names(&names).into_iter().zip(entries) {
        writer.start_file(name, options).map_err(zip_err)?;
        let mut src = File::open(path).map_err(|e| ToolifyError::io("read archive entry", e))?;
        std::io::copy(&mut src, &mut writer).map_err(|e| ToolifyError::io("write archive", e))?;
    }
    writer.finish().map_err(zip_err)?;
    Ok(())
}

fn unique_names(names: &[&str]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|&name| {
            if seen.insert(name.to_string()) {
                return name.to_string();
            }
            let (stem, ext) = match name.rsplit_once('.') {
                Some((stem, ext)) => (stem, format!(".{ext}")),
                None => (name, String::new()),
            };
            (2..)
                .map(|n| format!("{stem} ({n}){ext}"))
                .find(|candidate| seen.insert(candidate.clone()))
                .unwrap_or_else(|| name.to_string())
        })
        .collect()
}
