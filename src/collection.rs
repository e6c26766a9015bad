//! The persisted collection: a single JSON array written one page at a time
//! and read back one chunk at a time.
//!
//! The array is only valid once its closing `\n]` has been written. Readers
//! reject any file that lacks it, so an interrupted harvest can never be
//! mistaken for a complete history. A raw newline never appears inside an
//! encoded string, so a file cut in the middle of content ending in `]]`
//! still fails the check.

use crate::config::IO_BUFFER_SIZE;
use crate::models::Revision;
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, trace};

const START_MARKER: &[u8] = b"[\n";
const SEPARATOR: &[u8] = b",\n";
const END_MARKER: &[u8] = b"\n]";
const RECORD_INDENT: &[u8] = b"    ";

/// Bytes read per step when scanning back from the end of a file
const TAIL_WINDOW: u64 = 4096;

#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("failed to encode record")]
    Encode(#[source] serde_json::Error),
    #[error("collection is truncated: terminal marker `]` is missing")]
    Truncated,
    #[error("malformed record at position {index}")]
    MalformedRecord {
        index: u64,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed collection after {index} records: {reason}")]
    Malformed { index: u64, reason: String },
    #[error("collection writer is already closed")]
    AlreadyClosed,
    #[error("collection writer was never closed")]
    NotClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    NotStarted,
    Open { records: u64 },
    Closed,
}

/// Append-only writer for a JSON array of records.
///
/// Holds nothing but the current page in memory. The sink can only be taken
/// back with [`CollectionWriter::into_inner`] once the array was closed.
pub struct CollectionWriter<W: Write> {
    out: W,
    state: WriterState,
}

impl<W: Write> CollectionWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            state: WriterState::NotStarted,
        }
    }

    /// Records written so far
    pub fn records(&self) -> u64 {
        match self.state {
            WriterState::Open { records } => records,
            _ => 0,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == WriterState::Closed
    }

    /// Appends one page of records and returns the running record count.
    pub fn write_page<T: Serialize>(&mut self, records: &[T]) -> Result<u64, CollectionError> {
        let mut count = match self.state {
            WriterState::Closed => return Err(CollectionError::AlreadyClosed),
            WriterState::NotStarted => {
                self.out.write_all(START_MARKER)?;
                self.state = WriterState::Open { records: 0 };
                0
            }
            WriterState::Open { records } => records,
        };

        for record in records {
            // Separate records, not pages: a page whose revisions were all
            // dropped must not leave a dangling comma.
            if count > 0 {
                self.out.write_all(SEPARATOR)?;
            }
            let mut ser = serde_json::Serializer::with_formatter(
                &mut self.out,
                PrettyFormatter::with_indent(RECORD_INDENT),
            );
            record.serialize(&mut ser).map_err(CollectionError::Encode)?;
            count += 1;
            self.state = WriterState::Open { records: count };
        }

        trace!(records = count, "Page appended");
        Ok(count)
    }

    /// Writes the terminal marker and flushes. Returns the final record count.
    pub fn finish(&mut self) -> Result<u64, CollectionError> {
        let records = match self.state {
            WriterState::Closed => return Err(CollectionError::AlreadyClosed),
            WriterState::NotStarted => {
                self.out.write_all(START_MARKER)?;
                0
            }
            WriterState::Open { records } => records,
        };
        self.out.write_all(END_MARKER)?;
        self.out.flush()?;
        self.state = WriterState::Closed;
        debug!(records, "Collection closed");
        Ok(records)
    }

    /// Returns the sink of a closed collection.
    pub fn into_inner(self) -> Result<W, CollectionError> {
        if self.state != WriterState::Closed {
            return Err(CollectionError::NotClosed);
        }
        Ok(self.out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    BeforeFirst,
    InArray,
    Done,
}

/// Streams a closed collection back as chunks of at most `chunk_size`
/// revisions. Non-restartable; fused after the last chunk or an error.
pub struct ChunkedReader<R: BufRead> {
    reader: R,
    chunk_size: usize,
    state: ReaderState,
    records_read: u64,
}

impl ChunkedReader<BufReader<File>> {
    /// Opens a collection file, failing fast when its end marker is missing.
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self, CollectionError> {
        let mut file = File::open(path)?;
        ensure_terminated(&mut file)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(Self::from_reader(
            BufReader::with_capacity(IO_BUFFER_SIZE, file),
            chunk_size,
        ))
    }
}

impl<R: BufRead> ChunkedReader<R> {
    /// Wraps an arbitrary reader. Truncation is then only detected when the
    /// stream ends early.
    pub fn from_reader(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            state: ReaderState::BeforeFirst,
            records_read: 0,
        }
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Skips whitespace and returns the next byte without consuming it.
    fn peek_byte(&mut self) -> std::io::Result<Option<u8>> {
        loop {
            let (skip, found) = {
                let buf = self.reader.fill_buf()?;
                if buf.is_empty() {
                    return Ok(None);
                }
                match buf.iter().position(|b| !b.is_ascii_whitespace()) {
                    Some(i) => (i, Some(buf[i])),
                    None => (buf.len(), None),
                }
            };
            self.reader.consume(skip);
            if found.is_some() {
                return Ok(found);
            }
        }
    }

    fn unexpected(&self, expected: &str, found: u8) -> CollectionError {
        CollectionError::Malformed {
            index: self.records_read,
            reason: format!("expected {}, found `{}`", expected, found as char),
        }
    }

    fn next_record(&mut self) -> Result<Option<Revision>, CollectionError> {
        match self.state {
            ReaderState::Done => return Ok(None),
            ReaderState::BeforeFirst => {
                match self.peek_byte()? {
                    Some(b'[') => self.reader.consume(1),
                    Some(other) => return Err(self.unexpected("`[`", other)),
                    None => return Err(CollectionError::Truncated),
                }
                match self.peek_byte()? {
                    Some(b']') => {
                        self.reader.consume(1);
                        self.state = ReaderState::Done;
                        return Ok(None);
                    }
                    Some(_) => self.state = ReaderState::InArray,
                    None => return Err(CollectionError::Truncated),
                }
            }
            ReaderState::InArray => match self.peek_byte()? {
                Some(b',') => self.reader.consume(1),
                Some(b']') => {
                    self.reader.consume(1);
                    self.state = ReaderState::Done;
                    return Ok(None);
                }
                Some(other) => return Err(self.unexpected("`,` or `]`", other)),
                None => return Err(CollectionError::Truncated),
            },
        }

        // Objects are self-delimiting, so the deserializer stops right after
        // the closing brace and leaves the rest of the stream untouched.
        let index = self.records_read;
        let mut de = serde_json::Deserializer::from_reader(&mut self.reader);
        let record = Revision::deserialize(&mut de).map_err(|source| {
            if source.is_eof() {
                CollectionError::Truncated
            } else {
                CollectionError::MalformedRecord { index, source }
            }
        })?;
        self.records_read += 1;
        Ok(Some(record))
    }
}

impl<R: BufRead> Iterator for ChunkedReader<R> {
    type Item = Result<Vec<Revision>, CollectionError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut chunk = Vec::with_capacity(self.chunk_size);
        while chunk.len() < self.chunk_size {
            match self.next_record() {
                Ok(Some(record)) => chunk.push(record),
                Ok(None) => break,
                Err(e) => {
                    self.state = ReaderState::Done;
                    return Some(Err(e));
                }
            }
        }
        if chunk.is_empty() {
            None
        } else {
            Some(Ok(chunk))
        }
    }
}

/// Checks that the file ends with [`END_MARKER`], optionally followed by
/// blank bytes.
fn ensure_terminated(file: &mut File) -> Result<(), CollectionError> {
    let Some(last) = last_non_blank(file)? else {
        return Err(CollectionError::Truncated);
    };
    let Some(start) = last.checked_sub(1) else {
        return Err(CollectionError::Truncated);
    };

    let mut tail = [0u8; 2];
    file.seek(SeekFrom::Start(start))?;
    file.read_exact(&mut tail)?;
    if &tail[..] == END_MARKER {
        Ok(())
    } else {
        Err(CollectionError::Truncated)
    }
}

/// Offset of the last non-blank byte, scanning backwards one window at a time.
fn last_non_blank(file: &mut File) -> Result<Option<u64>, CollectionError> {
    let mut end = file.metadata()?.len();
    let mut buf = [0u8; TAIL_WINDOW as usize];

    while end > 0 {
        let start = end.saturating_sub(TAIL_WINDOW);
        let len = (end - start) as usize;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf[..len])?;
        if let Some(pos) = buf[..len].iter().rposition(|b| !b.is_ascii_whitespace()) {
            return Ok(Some(start + pos as u64));
        }
        end = start;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CleanedRevision;
    use chrono::{TimeZone, Utc};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn rev(secs: i64, content: &str) -> Revision {
        Revision {
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            content: content.to_string(),
        }
    }

    fn write_all(pages: &[Vec<Revision>]) -> String {
        let mut writer = CollectionWriter::new(Vec::new());
        for page in pages {
            writer.write_page(page).unwrap();
        }
        writer.finish().unwrap();
        String::from_utf8(writer.into_inner().unwrap()).unwrap()
    }

    fn read_all(text: &str, chunk_size: usize) -> Result<Vec<Vec<Revision>>, CollectionError> {
        ChunkedReader::from_reader(Cursor::new(text.as_bytes().to_vec()), chunk_size).collect()
    }

    #[test]
    fn writer_emits_pretty_records() {
        let text = write_all(&[vec![rev(1577836800, "Hello [1] 2020 world")]]);
        assert_eq!(
            text,
            "[\n{\n    \"timestamp\": 1577836800,\n    \"content\": \"Hello [1] 2020 world\"\n}\n]"
        );
    }

    #[test]
    fn writer_output_is_valid_json_across_pages() {
        let text = write_all(&[
            vec![rev(1, "a"), rev(2, "b")],
            vec![],
            vec![rev(3, "c")],
        ]);
        let parsed: Vec<Revision> = serde_json::from_str(&text).unwrap();
        let contents: Vec<_> = parsed.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
    }

    #[test]
    fn empty_collection_is_valid_json() {
        let text = write_all(&[]);
        let parsed: Vec<Revision> = serde_json::from_str(&text).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn writer_counts_records() {
        let mut writer = CollectionWriter::new(Vec::new());
        assert_eq!(writer.write_page(&[rev(1, "a"), rev(2, "b")]).unwrap(), 2);
        assert_eq!(writer.write_page(&[rev(3, "c")]).unwrap(), 3);
        assert_eq!(writer.records(), 3);
        assert_eq!(writer.finish().unwrap(), 3);
    }

    #[test]
    fn writer_rejects_use_after_close() {
        let mut writer = CollectionWriter::new(Vec::new());
        writer.finish().unwrap();
        assert!(matches!(
            writer.write_page(&[rev(1, "a")]),
            Err(CollectionError::AlreadyClosed)
        ));
        assert!(matches!(writer.finish(), Err(CollectionError::AlreadyClosed)));
    }

    #[test]
    fn unclosed_writer_keeps_its_sink() {
        let mut writer = CollectionWriter::new(Vec::new());
        writer.write_page(&[rev(1, "a")]).unwrap();
        assert!(matches!(writer.into_inner(), Err(CollectionError::NotClosed)));
    }

    #[test]
    fn writer_accepts_cleaned_records() {
        let mut writer = CollectionWriter::new(Vec::new());
        writer
            .write_page(&[CleanedRevision {
                timestamp: 5,
                content: "x".to_string(),
            }])
            .unwrap();
        writer.finish().unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let parsed: Vec<CleanedRevision> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[0].timestamp, 5);
    }

    #[test]
    fn reader_chunks_in_order() {
        let records: Vec<_> = (0..7).map(|i| rev(i, &format!("r{}", i))).collect();
        let text = write_all(&[records[..3].to_vec(), records[3..].to_vec()]);
        let chunks = read_all(&text, 3).unwrap();
        let sizes: Vec<_> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        let flat: Vec<_> = chunks.into_iter().flatten().collect();
        assert_eq!(flat, records);
    }

    #[test]
    fn reader_handles_empty_array() {
        assert!(read_all("[\n\n]", 10).unwrap().is_empty());
        assert!(read_all("[]", 10).unwrap().is_empty());
    }

    #[test]
    fn reader_handles_compact_json() {
        let chunks = read_all(
            r#"[{"timestamp":1,"content":"a"},{"timestamp":2,"content":"b"}]"#,
            10,
        )
        .unwrap();
        assert_eq!(chunks[0].len(), 2);
    }

    #[test]
    fn reader_detects_truncation_mid_record() {
        let text = write_all(&[vec![rev(1, "a"), rev(2, "b")]]);
        let cut = &text[..text.len() - 10];
        assert!(matches!(read_all(cut, 10), Err(CollectionError::Truncated)));
    }

    #[test]
    fn reader_detects_missing_end_marker() {
        let text = write_all(&[vec![rev(1, "a")]]);
        let cut = text.trim_end_matches(']');
        assert!(matches!(read_all(cut, 10), Err(CollectionError::Truncated)));
    }

    #[test]
    fn reader_rejects_garbage_between_records() {
        let result = read_all(
            r#"[{"timestamp":1,"content":"a"} x {"timestamp":2,"content":"b"}]"#,
            10,
        );
        assert!(matches!(
            result,
            Err(CollectionError::Malformed { index: 1, .. })
        ));
    }

    #[test]
    fn reader_rejects_malformed_record() {
        let result = read_all(r#"[{"timestamp":"soon","content":"a"}]"#, 10);
        assert!(matches!(
            result,
            Err(CollectionError::MalformedRecord { index: 0, .. })
        ));
    }

    #[test]
    fn reader_is_fused_after_error() {
        let mut reader = ChunkedReader::from_reader(Cursor::new(b"[{\"timest".to_vec()), 10);
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }

    #[test]
    fn open_fails_fast_without_end_marker() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.json");
        let text = write_all(&[vec![rev(1, "a")]]);
        std::fs::write(&path, text.trim_end_matches(']')).unwrap();

        assert!(matches!(
            ChunkedReader::open(&path, 10),
            Err(CollectionError::Truncated)
        ));
    }

    #[test]
    fn open_fails_on_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.json");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(
            ChunkedReader::open(&path, 10),
            Err(CollectionError::Truncated)
        ));
    }

    #[test]
    fn open_reads_closed_file_with_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("done.json");
        let text = write_all(&[vec![rev(1, "a"), rev(2, "b")]]);
        std::fs::write(&path, format!("{}\n\n", text)).unwrap();

        let reader = ChunkedReader::open(&path, 1).unwrap();
        let chunks: Vec<_> = reader.collect::<Result<_, _>>().unwrap();
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn open_scans_back_past_long_blank_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.json");
        let page: Vec<_> = (0..200).map(|i| rev(i, &"x".repeat(100))).collect();
        let text = write_all(&[page]);
        assert!(text.len() as u64 > TAIL_WINDOW);
        std::fs::write(&path, format!("{}{}", text, " ".repeat(5000))).unwrap();

        let reader = ChunkedReader::open(&path, 100).unwrap();
        assert_eq!(reader.map(|c| c.unwrap().len()).sum::<usize>(), 200);
    }

    #[test]
    fn open_rejects_file_cut_inside_link_markup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cut.json");
        let records: Vec<_> = (0..5).map(|i| rev(i, &format!("r{}", i))).collect();
        let text = write_all(&[records]);
        let body = text.strip_suffix("\n]").unwrap();
        std::fs::write(
            &path,
            format!("{},\n{{\"timestamp\": 9, \"content\": \"See [[Foo]]", body),
        )
        .unwrap();

        assert!(matches!(
            ChunkedReader::open(&path, 2),
            Err(CollectionError::Truncated)
        ));
    }

    #[test]
    fn open_rejects_closing_bracket_without_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("compact.json");
        std::fs::write(&path, r#"[{"timestamp":1,"content":"[[a]]"}]"#).unwrap();
        assert!(matches!(
            ChunkedReader::open(&path, 10),
            Err(CollectionError::Truncated)
        ));
    }

    #[test]
    fn open_finds_marker_split_across_windows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("split.json");
        let text = write_all(&[vec![rev(1, "a")]]);
        // `]` opens the last window and its `\n` closes the one before.
        let padding = " ".repeat(TAIL_WINDOW as usize - 1);
        std::fs::write(&path, format!("{}{}", text, padding)).unwrap();

        let reader = ChunkedReader::open(&path, 10).unwrap();
        assert_eq!(reader.map(|c| c.unwrap().len()).sum::<usize>(), 1);
    }
}
