//! Delimited source reader.
//!
//! [`DelimitedSource`] streams records out of any [`Read`]er one at a time, so sources far
//! larger than memory can be loaded. Delimiter, header presence, character encoding and the
//! blank-row policy come from [`LoadOptions`].

mod decode;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::config::LoadOptions;
use crate::error::{LoadError, LoadResult};

pub use decode::DecodeReader;

/// One data record read from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRow {
    /// 1-based record number, not counting the header row.
    pub line: u64,
    /// 1-based physical line the record starts on.
    pub physical_line: u64,
    /// The record re-serialized with the source delimiter, quoted where a field needs it, so
    /// the text parses back to the same fields.
    pub raw: String,
    pub fields: Vec<String>,
}

/// Streaming reader over delimited text.
pub struct DelimitedSource<R: Read> {
    reader: csv::Reader<DecodeReader<R>>,
    header: Option<Vec<String>>,
    delimiter: u8,
    skip_blank_lines: bool,
    record: csv::StringRecord,
    next_line: u64,
    blank_skipped: u64,
    done: bool,
}

impl DelimitedSource<BufReader<File>> {
    /// Open a file-backed source.
    pub fn from_path(path: impl AsRef<Path>, options: &LoadOptions) -> LoadResult<Self> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file), options)
    }
}

impl<R: Read> DelimitedSource<R> {
    /// Wrap `inner`. When `options.has_header` is set the header row is read immediately.
    pub fn new(inner: R, options: &LoadOptions) -> LoadResult<Self> {
        let encoding = encoding_rs::Encoding::for_label(options.encoding.trim().as_bytes())
            .ok_or_else(|| LoadError::config(format!("unknown encoding '{}'", options.encoding)))?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(options.delimiter_byte())
            .has_headers(options.has_header)
            .flexible(true)
            .from_reader(DecodeReader::new(inner, encoding));

        let header = if options.has_header {
            Some(reader.headers()?.iter().map(str::to_string).collect())
        } else {
            None
        };

        Ok(Self {
            reader,
            header,
            delimiter: options.delimiter_byte(),
            skip_blank_lines: options.skip_blank_lines,
            record: csv::StringRecord::new(),
            next_line: 1,
            blank_skipped: 0,
            done: false,
        })
    }

    /// The header row, if the source was configured to have one.
    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    /// Rows skipped because every field was blank.
    pub fn blank_lines_skipped(&self) -> u64 {
        self.blank_skipped
    }

    /// Whether any malformed byte sequence has been replaced so far.
    pub fn had_decode_errors(&self) -> bool {
        self.reader.get_ref().had_errors()
    }
}

impl<R: Read> Iterator for DelimitedSource<R> {
    type Item = LoadResult<SourceRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.reader.read_record(&mut self.record) {
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
                Ok(true) => {}
            }

            let line = self.next_line;
            self.next_line += 1;

            if self.skip_blank_lines && self.record.iter().all(|f| f.trim().is_empty()) {
                self.blank_skipped += 1;
                continue;
            }

            let fields: Vec<String> = self.record.iter().map(str::to_string).collect();
            let raw = render_raw(&self.record, self.delimiter);
            let physical_line = self.record.position().map_or(0, |p| p.line());
            return Some(Ok(SourceRow {
                line,
                physical_line,
                raw,
                fields,
            }));
        }
    }
}

fn render_raw(record: &csv::StringRecord, delimiter: u8) -> String {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    let written = writer
        .write_record(record)
        .ok()
        .and_then(|()| writer.into_inner().ok())
        .and_then(|bytes| String::from_utf8(bytes).ok());
    match written {
        Some(mut text) => {
            text.truncate(text.trim_end_matches('\n').len());
            text
        }
        None => {
            let sep = char::from(delimiter).to_string();
            record.iter().collect::<Vec<_>>().join(&sep)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(input: &str, options: &LoadOptions) -> Vec<SourceRow> {
        DelimitedSource::new(input.as_bytes(), options)
            .unwrap()
            .collect::<LoadResult<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn reads_header_and_rows_with_line_numbers() {
        let opts = LoadOptions::default();
        let mut src = DelimitedSource::new("Member ID,Quarter\nA,Q1\nB,Q2\n".as_bytes(), &opts).unwrap();
        assert_eq!(src.header().unwrap(), &["Member ID".to_string(), "Quarter".to_string()]);

        let first = src.next().unwrap().unwrap();
        assert_eq!(first.line, 1);
        assert_eq!(first.physical_line, 2);
        assert_eq!(first.raw, "A,Q1");
        let second = src.next().unwrap().unwrap();
        assert_eq!(second.line, 2);
        assert_eq!(second.fields, vec!["B", "Q2"]);
        assert!(src.next().is_none());
    }

    #[test]
    fn raw_text_keeps_quoting_for_embedded_delimiters() {
        let out = rows("a,b,c\n\"Smith, J\",\"say \"\"hi\"\"\",3\n", &LoadOptions::default());
        assert_eq!(out[0].fields, vec!["Smith, J", "say \"hi\"", "3"]);
        assert_eq!(out[0].raw, "\"Smith, J\",\"say \"\"hi\"\"\",3");

        let reparsed = rows(&format!("a,b,c\n{}\n", out[0].raw), &LoadOptions::default());
        assert_eq!(reparsed[0].fields, out[0].fields);
    }

    #[test]
    fn custom_delimiter_and_no_header() {
        let opts = LoadOptions {
            delimiter: '|',
            has_header: false,
            ..Default::default()
        };
        let src = DelimitedSource::new("A|Q1|2024\n".as_bytes(), &opts).unwrap();
        assert!(src.header().is_none());
        let out: Vec<_> = src.map(Result::unwrap).collect();
        assert_eq!(out[0].fields, vec!["A", "Q1", "2024"]);
        assert_eq!(out[0].raw, "A|Q1|2024");
    }

    #[test]
    fn blank_rows_follow_policy() {
        let input = "a,b\n1,2\n , \n3,4\n";
        let skipping = LoadOptions::default();
        let mut src = DelimitedSource::new(input.as_bytes(), &skipping).unwrap();
        let got: Vec<_> = src.by_ref().map(Result::unwrap).map(|r| r.line).collect();
        assert_eq!(got, vec![1, 3]);
        assert_eq!(src.blank_lines_skipped(), 1);

        let keeping = LoadOptions {
            skip_blank_lines: false,
            ..Default::default()
        };
        assert_eq!(rows(input, &keeping).len(), 3);
    }

    #[test]
    fn ragged_rows_are_passed_through() {
        let out = rows("a,b,c\n1\n1,2,3,4\n", &LoadOptions::default());
        assert_eq!(out[0].fields.len(), 1);
        assert_eq!(out[1].fields.len(), 4);
    }

    #[test]
    fn empty_source_has_empty_header() {
        let src = DelimitedSource::new("".as_bytes(), &LoadOptions::default()).unwrap();
        assert!(src.header().unwrap().is_empty());
    }

    #[test]
    fn latin1_source_is_decoded() {
        let opts = LoadOptions {
            encoding: "windows-1252".to_string(),
            ..Default::default()
        };
        let input: &[u8] = b"Drug Name\nCaf\xe9\n";
        let out: Vec<_> = DelimitedSource::new(input, &opts).unwrap().map(Result::unwrap).collect();
        assert_eq!(out[0].fields, vec!["Café"]);
    }
}
