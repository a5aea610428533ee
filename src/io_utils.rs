//! Delimited-text input and file provenance helpers.
//!
//! CSV publications arrive in whatever encoding the publisher's export tool
//! produced. Input is decoded through `encoding_rs_io`, which honours a byte
//! order mark over the requested encoding, so every row reaches the grid as UTF-8.

use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};
use encoding_rs_io::DecodeReaderBytesBuilder;
use sha2::{Digest, Sha256};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match extension(path).as_deref() {
        Some("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn is_delimited_path(path: &Path) -> bool {
    matches!(extension(path).as_deref(), Some("csv" | "tsv"))
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

pub fn open_decoded_reader(path: &Path, encoding: &'static Encoding) -> Result<impl Read> {
    let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
    Ok(DecodeReaderBytesBuilder::new()
        .encoding(Some(encoding))
        .build(BufReader::new(file)))
}

/// Every record of a delimited file, header rows included. Records may differ
/// in length; the grid pads short rows with empty cells.
pub fn read_delimited_rows(
    path: &Path,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<Vec<Vec<String>>> {
    let reader = open_decoded_reader(path, encoding)?;
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true)
        .from_reader(reader);
    let mut rows = Vec::new();
    for (idx, record) in csv_reader.records().enumerate() {
        let record = record.with_context(|| format!("Reading row {} of {path:?}", idx + 1))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

/// Hex SHA-256 of a file, recorded with each load for provenance.
pub fn file_digest(path: &Path) -> Result<String> {
    let mut reader =
        BufReader::new(File::open(path).with_context(|| format!("Opening {path:?}"))?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher).with_context(|| format!("Hashing {path:?}"))?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn decodes_latin1_and_keeps_ragged_rows() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("ae.csv");
        fs::write(&path, b"Title only\nRegion,Total\nSa\xf4ne,12\n").expect("write");
        let encoding = resolve_encoding(Some("latin1")).expect("encoding");
        let rows = read_delimited_rows(&path, b',', encoding).expect("rows");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], ["Title only"]);
        assert_eq!(rows[2][0], "Saône");
    }

    #[test]
    fn byte_order_mark_is_stripped() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("bom.csv");
        fs::write(&path, b"\xef\xbb\xbfOrg,Total\n").expect("write");
        let rows = read_delimited_rows(&path, b',', UTF_8).expect("rows");
        assert_eq!(rows[0][0], "Org");
    }

    #[test]
    fn delimiter_follows_extension() {
        assert_eq!(resolve_input_delimiter(Path::new("a.TSV"), None), b'\t');
        assert_eq!(resolve_input_delimiter(Path::new("a.csv"), None), b',');
        assert_eq!(resolve_input_delimiter(Path::new("a.csv"), Some(b';')), b';');
        assert!(is_delimited_path(Path::new("x.Csv")));
        assert!(!is_delimited_path(Path::new("x.xlsx")));
    }

    #[test]
    fn digest_is_stable_hex() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("d.csv");
        fs::write(&path, b"abc").expect("write");
        assert_eq!(
            file_digest(&path).expect("digest"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(resolve_encoding(Some("not-a-charset")).is_err());
    }
}
