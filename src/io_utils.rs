//! I/O utilities for decoding input files and writing CSV output.
//!
//! All file I/O flows through this module. It provides:
//!
//! - **Encoding detection**: byte-order-mark sniffing, then strict UTF-8, then
//!   a configurable fallback encoding via `encoding_rs`.
//! - **Delimiter candidates**: extension-based preference (`.tsv` → tab) with
//!   comma/tab probing for ambiguous files.
//! - **Reader/writer construction**: `open_csv_reader` over decoded text and
//!   `open_csv_writer` with optional UTF-8 BOM.

use std::{
    fs::{self, File},
    io::{BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};

use crate::error::SourceError;

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';
pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub fn resolve_encoding(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| anyhow!("Unknown encoding '{label}'"))
}

/// Delimiters to try for a delimited text file, most likely first.
pub fn delimiter_candidates(path: &Path) -> [u8; 2] {
    match extension_of(path).as_deref() {
        Some("tsv") => [DEFAULT_TSV_DELIMITER, DEFAULT_CSV_DELIMITER],
        _ => [DEFAULT_CSV_DELIMITER, DEFAULT_TSV_DELIMITER],
    }
}

pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

pub fn read_bytes(path: &Path) -> Result<Vec<u8>, SourceError> {
    let mut file = File::open(path).map_err(|err| SourceError::from_io(path, err))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|err| SourceError::from_io(path, err))?;
    Ok(bytes)
}

/// Decodes file contents, returning the text and the encoding that was used.
/// The BOM, if any, is stripped.
pub fn decode_text(
    bytes: &[u8],
    fallback: &'static Encoding,
) -> std::result::Result<(String, &'static Encoding), String> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, had_errors) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        if had_errors {
            return Err(format!("invalid {} byte sequence", encoding.name()));
        }
        return Ok((text.into_owned(), encoding));
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Ok((text.to_owned(), UTF_8));
    }
    let (text, had_errors) = fallback.decode_without_bom_handling(bytes);
    if had_errors {
        Err(format!(
            "content is neither UTF-8 nor valid {}",
            fallback.name()
        ))
    } else {
        Ok((text.into_owned(), fallback))
    }
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8, has_headers: bool) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(has_headers)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn open_csv_writer(path: &Path, write_bom: bool) -> Result<csv::Writer<Box<dyn Write>>> {
    let mut file = BufWriter::new(
        File::create(path).with_context(|| format!("Creating output file {path:?}"))?,
    );
    if write_bom {
        file.write_all(UTF8_BOM)
            .with_context(|| format!("Writing byte order mark to {path:?}"))?;
    }
    let writer: Box<dyn Write> = Box::new(file);
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(DEFAULT_CSV_DELIMITER)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true);
    Ok(builder.from_writer(writer))
}

/// Removes a previous output file and any of its `stale` companions, and
/// makes sure the output directory exists.
pub fn prepare_output_path(path: &Path, stale: &[PathBuf]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Creating output directory {parent:?}"))?;
    }
    for file in std::iter::once(path).chain(stale.iter().map(PathBuf::as_path)) {
        if file.is_file() {
            fs::remove_file(file).with_context(|| format!("Removing existing output {file:?}"))?;
            log::info!("Deleted existing output file: {}", file.display());
        }
    }
    Ok(())
}
