//! Streaming reader for large delimited extracts
//!
//! The national roster arrives as a multi-gigabyte pipe- or comma-separated
//! dump. It is never held in memory: the header line is buffered until its
//! newline, then the remaining bytes go through an incremental `csv_core`
//! reader that only holds the record currently being assembled. Each record
//! is transformed and dropped, so memory is bounded by the number of distinct
//! keys plus one record.

use csv_core::{ReadRecordResult, Reader, ReaderBuilder};
use medsync_common::text::decode_text;

use super::dedup::Deduplicator;
use super::error::{ImportError, Result};
use super::header::match_row;
use super::pipeline::Collected;
use super::sources::SourceSpec;
use super::transform::{RowOutcome, RowTransformer};

/// Largest single record (or header line) accepted
pub const DEFAULT_MAX_RECORD_BYTES: usize = 1024 * 1024;

const INITIAL_RECORD_BYTES: usize = 4 * 1024;
const INITIAL_FIELDS: usize = 64;

/// Delimiters tried on the header line, in tie-break order
const DELIMITERS: [u8; 4] = [b'|', b';', b'\t', b','];

/// Pick the candidate delimiter that occurs most often outside quotes
pub fn sniff_delimiter(header: &str) -> u8 {
    let mut counts = [0usize; DELIMITERS.len()];
    let mut quoted = false;
    for b in header.bytes() {
        if b == b'"' {
            quoted = !quoted;
        } else if !quoted {
            if let Some(idx) = DELIMITERS.iter().position(|d| *d == b) {
                counts[idx] += 1;
            }
        }
    }

    let mut best = DELIMITERS.len() - 1;
    for idx in 0..DELIMITERS.len() {
        if counts[idx] > counts[best] || (counts[idx] == counts[best] && counts[idx] > 0 && idx < best) {
            best = idx;
        }
    }
    DELIMITERS[best]
}

/// Split the header line into cells
pub fn header_fields(line: &str, delimiter: u8) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(line.as_bytes());

    match reader.records().next() {
        Some(record) => {
            let record = record.map_err(|e| ImportError::Format(format!("Unreadable header: {e}")))?;
            Ok(record.iter().map(str::to_string).collect())
        }
        None => Ok(Vec::new()),
    }
}

fn record_too_long(max: usize) -> ImportError {
    ImportError::Format(format!("Delimited record longer than {max} bytes"))
}

/// Incremental record assembly over `csv_core`
///
/// Output buffers start small and double up to `max_bytes`; a record that
/// needs more is a structural error.
struct RecordReader {
    reader: Reader,
    data: Vec<u8>,
    ends: Vec<usize>,
    data_len: usize,
    ends_len: usize,
    max_bytes: usize,
}

impl RecordReader {
    fn new(delimiter: u8, max_bytes: usize) -> Self {
        Self {
            reader: ReaderBuilder::new().delimiter(delimiter).build(),
            data: vec![0; INITIAL_RECORD_BYTES.min(max_bytes)],
            ends: vec![0; INITIAL_FIELDS.min(max_bytes)],
            data_len: 0,
            ends_len: 0,
            max_bytes,
        }
    }

    /// Parse `input`, calling `emit` for every record it completes
    ///
    /// `csv_core` reads empty input as end of stream, so an empty chunk is
    /// only passed through when `eof` is set.
    fn feed(&mut self, mut input: &[u8], eof: bool, mut emit: impl FnMut(Vec<String>)) -> Result<()> {
        loop {
            if input.is_empty() && !eof {
                return Ok(());
            }
            let (res, nin, nout, nend) = self.reader.read_record(
                input,
                &mut self.data[self.data_len..],
                &mut self.ends[self.ends_len..],
            );
            input = &input[nin..];
            self.data_len += nout;
            self.ends_len += nend;

            match res {
                ReadRecordResult::InputEmpty | ReadRecordResult::End => return Ok(()),
                ReadRecordResult::OutputFull => grow(&mut self.data, self.max_bytes)?,
                ReadRecordResult::OutputEndsFull => grow(&mut self.ends, self.max_bytes)?,
                ReadRecordResult::Record => emit(self.take_fields()),
            }
        }
    }

    fn take_fields(&mut self) -> Vec<String> {
        let mut start = 0;
        let fields = self.ends[..self.ends_len]
            .iter()
            .map(|&end| {
                let field = decode_text(&self.data[start..end]);
                start = end;
                field
            })
            .collect();
        self.data_len = 0;
        self.ends_len = 0;
        fields
    }
}

fn grow<T: Default + Clone>(buf: &mut Vec<T>, max: usize) -> Result<()> {
    if buf.len() >= max {
        return Err(record_too_long(max));
    }
    let next = (buf.len() * 2).clamp(1, max);
    buf.resize(next, T::default());
    Ok(())
}

/// Incremental collector fed with raw byte chunks
pub struct DelimitedCollector<'a> {
    spec: &'a SourceSpec,
    state: State<'a>,
    dedup: Deduplicator,
    skipped: u64,
    bytes_read: u64,
    max_record_bytes: usize,
}

enum State<'a> {
    /// Bytes up to the first non-blank line
    AwaitingHeader { head: Vec<u8> },
    Rows {
        records: RecordReader,
        transformer: RowTransformer<'a>,
    },
}

impl<'a> DelimitedCollector<'a> {
    pub fn new(spec: &'a SourceSpec) -> Self {
        Self {
            spec,
            state: State::AwaitingHeader { head: Vec::new() },
            dedup: Deduplicator::new(),
            skipped: 0,
            bytes_read: 0,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
        }
    }

    pub fn with_max_record_bytes(mut self, max: usize) -> Self {
        self.max_record_bytes = max.max(1);
        self
    }

    /// Consume one chunk of the body
    pub fn push(&mut self, chunk: &[u8]) -> Result<()> {
        self.bytes_read += chunk.len() as u64;
        if let State::AwaitingHeader { head } = &mut self.state {
            head.extend_from_slice(chunk);
            return match self.take_header()? {
                Some(rest) => self.feed(&rest, false),
                None => Ok(()),
            };
        }
        self.feed(chunk, false)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn header_found(&self) -> bool {
        matches!(self.state, State::Rows { .. })
    }

    /// Flush the last record and hand over what was collected
    pub fn finish(mut self) -> Result<Collected> {
        if let State::AwaitingHeader { head } = &mut self.state {
            let line = decode_text(&std::mem::take(head));
            if !is_blank_line(&line) {
                self.start_rows(&line)?;
            }
        }
        self.feed(&[], true)?;

        match self.state {
            State::AwaitingHeader { .. } if self.bytes_read == 0 => Err(ImportError::EmptyFile),
            State::AwaitingHeader { .. } => Err(ImportError::HeaderNotFound {
                expected: self.spec.required_headers.join(", "),
            }),
            State::Rows { transformer, .. } => Ok(Collected {
                dedup: self.dedup,
                skipped: self.skipped,
                transform: transformer.into_stats(),
            }),
        }
    }

    /// Resolve the header once its line is complete
    ///
    /// Returns the bytes buffered past the header line.
    fn take_header(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let State::AwaitingHeader { head } = &mut self.state else {
                return Ok(None);
            };
            let Some(newline) = head.iter().position(|b| *b == b'\n') else {
                if head.len() > self.max_record_bytes {
                    return Err(record_too_long(self.max_record_bytes));
                }
                return Ok(None);
            };

            let rest = head.split_off(newline + 1);
            let line = decode_text(&head[..newline]);
            if is_blank_line(&line) {
                *head = rest;
                continue;
            }
            self.start_rows(&line)?;
            return Ok(Some(rest));
        }
    }

    fn start_rows(&mut self, line: &str) -> Result<()> {
        let line = line.trim_start_matches('\u{feff}').trim_end_matches('\r');
        let delimiter = sniff_delimiter(line);
        let header = header_fields(line, delimiter)?;
        let columns = match_row(&header, self.spec).ok_or_else(|| ImportError::HeaderNotFound {
            expected: self.spec.required_headers.join(", "),
        })?;
        columns.ensure_keys(self.spec)?;
        tracing::debug!(
            source = self.spec.id,
            delimiter = %char::from(delimiter).escape_default(),
            resolved = columns.len(),
            "Delimited header resolved"
        );
        self.state = State::Rows {
            records: RecordReader::new(delimiter, self.max_record_bytes),
            transformer: RowTransformer::new(self.spec, columns),
        };
        Ok(())
    }

    fn feed(&mut self, input: &[u8], eof: bool) -> Result<()> {
        let State::Rows { records, transformer } = &mut self.state else {
            return Ok(());
        };
        let dedup = &mut self.dedup;
        let skipped = &mut self.skipped;
        records.feed(input, eof, |fields| match transformer.transform(&fields) {
            RowOutcome::Row(row) => {
                dedup.insert(row);
            }
            RowOutcome::Skip => *skipped += 1,
            RowOutcome::Blank => {}
        })
    }
}

fn is_blank_line(line: &str) -> bool {
    line.trim_start_matches('\u{feff}').trim().is_empty()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ingest::sources::SourceCatalog;

    fn roster() -> SourceSpec {
        SourceCatalog::builtin().get("roster_federal").unwrap().clone()
    }

    fn collect(spec: &SourceSpec, body: &[u8], size: usize) -> Collected {
        let mut collector = DelimitedCollector::new(spec);
        for chunk in body.chunks(size) {
            collector.push(chunk).unwrap();
        }
        collector.finish().unwrap()
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("TIPO_ID|NUMERO_ID|SEXO"), b'|');
        assert_eq!(sniff_delimiter("tipo id;numero id;\"a,b,c\""), b';');
        assert_eq!(sniff_delimiter("a\tb\tc"), b'\t');
        assert_eq!(sniff_delimiter("a,b"), b',');
        assert_eq!(sniff_delimiter("single"), b',');
    }

    #[test]
    fn test_header_fields_honour_quotes() {
        assert_eq!(header_fields("a|\"b|c\"|d", b'|').unwrap(), vec!["a", "b|c", "d"]);
        assert_eq!(header_fields("\"say \"\"hi\"\"\",x", b',').unwrap(), vec!["say \"hi\"", "x"]);
        assert_eq!(header_fields("a||", b'|').unwrap(), vec!["a", "", ""]);
    }

    #[test]
    fn test_collects_across_arbitrary_chunk_boundaries() {
        let spec = roster();
        let body = "\u{feff}TIPO_ID|NUMERO_ID|PRIMER_NOMBRE|MUNICIPIO\r\n\
                    CC|1|ANA|5001\r\n\
                    \r\n\
                    CC|2|JOSÉ|11001\r\n\
                    CC|1|ANA MARIA|5001\r\n\
                    |3|SIN TIPO|5001\r\n\
                    TI|4|LUZ|05001";

        for size in [1, 3, 7, 64] {
            let collected = collect(&spec, body.as_bytes(), size);
            assert_eq!(collected.dedup.seen(), 4, "chunk size {size}");
            assert_eq!(collected.dedup.duplicates(), 1);
            assert_eq!(collected.skipped, 1);

            let rows = collected.dedup.into_rows();
            assert_eq!(rows.len(), 3);
            assert_eq!(rows[0].get("first_name"), Some("ANA MARIA"));
            assert_eq!(rows[1].get("first_name"), Some("JOSÉ"));
            assert_eq!(rows[0].get("municipality"), Some("05001"));
        }
    }

    #[test]
    fn test_quoted_field_may_span_lines() {
        let spec = roster();
        let body = "TIPO_ID|NUMERO_ID|PRIMER_NOMBRE|MUNICIPIO\n\
                    CC|1|\"ANA\nMARIA\"|05001\n\
                    CC|2|\"LUZ \"\"LA\"\" PAZ\"|11001\n";

        for size in [1, 5, 64] {
            let collected = collect(&spec, body.as_bytes(), size);
            assert_eq!(collected.dedup.seen(), 2, "chunk size {size}");
            assert_eq!(collected.skipped, 0);

            let rows = collected.dedup.into_rows();
            assert_eq!(rows[0].get("first_name"), Some("ANA\nMARIA"));
            assert_eq!(rows[1].get("first_name"), Some("LUZ \"LA\" PAZ"));
        }
    }

    #[test]
    fn test_oversized_record_is_a_format_error() {
        let spec = roster();

        let mut collector = DelimitedCollector::new(&spec).with_max_record_bytes(32);
        collector.push(b"TIPO_ID|NUMERO_ID\n").unwrap();
        let unterminated = format!("CC|\"{}", "A".repeat(64));
        let err = collector.push(unterminated.as_bytes()).unwrap_err();
        assert!(matches!(err, ImportError::Format(_)));

        // Same bound while still looking for the header line
        let mut collector = DelimitedCollector::new(&spec).with_max_record_bytes(32);
        let err = collector.push(&[b'x'; 64]).unwrap_err();
        assert!(matches!(err, ImportError::Format(_)));
    }

    #[test]
    fn test_first_non_empty_line_must_be_the_header() {
        let spec = roster();
        let mut collector = DelimitedCollector::new(&spec);
        let err = collector.push(b"\n\nreporte generado|2024\nTIPO_ID|NUMERO_ID\n").unwrap_err();
        assert!(matches!(err, ImportError::HeaderNotFound { .. }));
    }

    #[test]
    fn test_header_without_rows_or_newline() {
        let collected = collect(&roster(), b"TIPO_ID|NUMERO_ID", 4);
        assert_eq!(collected.total_processed(), 0);
    }

    #[test]
    fn test_empty_body() {
        assert!(matches!(
            DelimitedCollector::new(&roster()).finish(),
            Err(ImportError::EmptyFile)
        ));
        assert!(matches!(
            collect_err(b"\r\n\n"),
            ImportError::HeaderNotFound { .. }
        ));
    }

    fn collect_err(body: &[u8]) -> ImportError {
        let spec = roster();
        let mut collector = DelimitedCollector::new(&spec);
        collector.push(body).unwrap();
        collector.finish().unwrap_err()
    }
}
