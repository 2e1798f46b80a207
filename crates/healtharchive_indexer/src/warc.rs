//! Streaming reader for gzipped WARC files (ISO 28500).
//!
//! Each record in a `.warc.gz` is its own gzip member, so the compressed
//! byte offset and length of the member locate the record for replay. The
//! off-the-shelf readers don't surface those offsets, which is the whole
//! point of storing them, so the parsing lives here. Files are never loaded
//! whole; one record block at a time.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek};
use std::path::{Path, PathBuf};

use flate2::bufread::GzDecoder;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WarcError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed WARC data in {path} at offset {offset}: {reason}")]
    Malformed {
        path: PathBuf,
        offset: u64,
        reason: String,
    },
}

/// One WARC record with its replay locator.
#[derive(Debug, Clone)]
pub struct WarcRecord {
    pub warc_type: String,
    pub target_uri: Option<String>,
    /// `WARC-Date` as written (ISO 8601).
    pub warc_date: Option<String>,
    pub record_id: Option<String>,
    /// Record-level Content-Type (e.g. `application/http; msgtype=response`).
    pub content_type: Option<String>,
    /// Compressed byte offset of the gzip member holding this record.
    pub offset: u64,
    /// Compressed length of that member in bytes.
    pub length: u64,
    /// The record block (for response records: raw HTTP response bytes).
    pub body: Vec<u8>,
}

/// A parsed HTTP response payload from a `response` record block.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Streaming iterator over the records of one `.warc.gz` file.
pub struct WarcGzReader {
    path: PathBuf,
    reader: BufReader<File>,
    /// Records already parsed from the current member (writers occasionally
    /// pack several records into one member; they share its locator).
    pending: Vec<WarcRecord>,
}

impl WarcGzReader {
    pub fn open(path: &Path) -> Result<Self, WarcError> {
        let file = File::open(path).map_err(|source| WarcError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            pending: Vec::new(),
        })
    }

    fn read_member(&mut self) -> Result<Option<()>, WarcError> {
        // Cloned up front so error closures don't borrow `self` while the
        // reader is mutably borrowed.
        let path = self.path.clone();
        let io_err = |source: std::io::Error, path: &PathBuf| WarcError::Io {
            path: path.clone(),
            source,
        };

        let offset = self
            .reader
            .stream_position()
            .map_err(|e| io_err(e, &path))?;

        // EOF check before starting a decoder.
        let at_end = self
            .reader
            .fill_buf()
            .map_err(|e| io_err(e, &path))?
            .is_empty();
        if at_end {
            return Ok(None);
        }

        let mut decompressed = Vec::new();
        {
            let mut decoder = GzDecoder::new(&mut self.reader);
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|source| WarcError::Malformed {
                    path: path.clone(),
                    offset,
                    reason: format!("gzip member failed to decode: {source}"),
                })?;
        }
        let end = self
            .reader
            .stream_position()
            .map_err(|e| io_err(e, &path))?;
        let length = end - offset;

        let mut cursor = 0usize;
        let mut parsed_any = false;
        while cursor < decompressed.len() {
            // Skip inter-record CRLF padding.
            while cursor < decompressed.len()
                && (decompressed[cursor] == b'\r' || decompressed[cursor] == b'\n')
            {
                cursor += 1;
            }
            if cursor >= decompressed.len() {
                break;
            }
            let (record, consumed) =
                parse_record(&decompressed[cursor..], offset, length).map_err(|reason| {
                    WarcError::Malformed {
                        path: self.path.clone(),
                        offset,
                        reason,
                    }
                })?;
            self.pending.push(record);
            parsed_any = true;
            cursor += consumed;
        }

        if !parsed_any {
            return Err(WarcError::Malformed {
                path: self.path.clone(),
                offset,
                reason: "gzip member contains no WARC record".to_string(),
            });
        }
        // Oldest-first delivery.
        self.pending.reverse();
        Ok(Some(()))
    }
}

impl Iterator for WarcGzReader {
    type Item = Result<WarcRecord, WarcError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.pop() {
                return Some(Ok(record));
            }
            match self.read_member() {
                Ok(Some(())) => continue,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Parse one WARC record at the start of `data`. Returns the record and the
/// number of bytes consumed.
fn parse_record(data: &[u8], offset: u64, length: u64) -> Result<(WarcRecord, usize), String> {
    let header_end = find_blank_line(data).ok_or("record header is not terminated")?;
    let header_text = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = header_text.split("\r\n").filter(|l| !l.is_empty());

    let version = lines.next().ok_or("empty record header")?;
    if !version.starts_with("WARC/") {
        return Err(format!("expected WARC version line, found {version:?}"));
    }

    let mut warc_type = None;
    let mut target_uri = None;
    let mut warc_date = None;
    let mut record_id = None;
    let mut content_type = None;
    let mut content_length: Option<usize> = None;

    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "warc-type" => warc_type = Some(value.to_string()),
            "warc-target-uri" => target_uri = Some(value.to_string()),
            "warc-date" => warc_date = Some(value.to_string()),
            "warc-record-id" => record_id = Some(value.to_string()),
            "content-type" => content_type = Some(value.to_string()),
            "content-length" => {
                content_length = Some(
                    value
                        .parse()
                        .map_err(|_| format!("bad Content-Length {value:?}"))?,
                )
            }
            _ => {}
        }
    }

    let content_length = content_length.ok_or("record has no Content-Length")?;
    let body_start = header_end + 4;
    let body_end = body_start + content_length;
    if body_end > data.len() {
        return Err(format!(
            "record block truncated: need {} bytes, have {}",
            content_length,
            data.len().saturating_sub(body_start)
        ));
    }

    let record = WarcRecord {
        warc_type: warc_type.ok_or("record has no WARC-Type")?,
        target_uri,
        warc_date,
        record_id,
        content_type,
        offset,
        length,
        body: data[body_start..body_end].to_vec(),
    };
    Ok((record, body_end))
}

fn find_blank_line(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parse the HTTP response inside a `response` record block.
///
/// Returns None when the block does not start with an HTTP status line.
pub fn parse_http_response(block: &[u8]) -> Option<HttpResponse> {
    let header_end = find_blank_line(block)?;
    let header_text = String::from_utf8_lossy(&block[..header_end]);
    let mut lines = header_text.split("\r\n");

    let status_line = lines.next()?;
    let mut parts = status_line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    let status: u16 = parts.next()?.parse().ok()?;

    let mut content_type = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-type") {
                content_type = Some(value.trim().to_string());
            }
        }
    }

    Some(HttpResponse {
        status,
        content_type,
        body: block[header_end + 4..].to_vec(),
    })
}

/// Whether an HTTP Content-Type names HTML.
pub fn is_html(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.trim().to_ascii_lowercase().starts_with("text/html"))
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    /// Build the bytes of one WARC response record.
    pub(crate) fn response_record(uri: &str, date: &str, status: u16, html: &str) -> Vec<u8> {
        let http = format!(
            "HTTP/1.1 {status} X\r\nContent-Type: text/html; charset=utf-8\r\n\r\n{html}"
        );
        let mut record = Vec::new();
        record.extend_from_slice(b"WARC/1.0\r\n");
        record.extend_from_slice(b"WARC-Type: response\r\n");
        record.extend_from_slice(format!("WARC-Target-URI: {uri}\r\n").as_bytes());
        record.extend_from_slice(format!("WARC-Date: {date}\r\n").as_bytes());
        record.extend_from_slice(b"WARC-Record-ID: <urn:uuid:11111111-2222-3333-4444-555555555555>\r\n");
        record.extend_from_slice(b"Content-Type: application/http; msgtype=response\r\n");
        record.extend_from_slice(format!("Content-Length: {}\r\n", http.len()).as_bytes());
        record.extend_from_slice(b"\r\n");
        record.extend_from_slice(http.as_bytes());
        record.extend_from_slice(b"\r\n\r\n");
        record
    }

    pub(crate) fn info_record() -> Vec<u8> {
        let block = b"software: test-crawler\r\n";
        let mut record = Vec::new();
        record.extend_from_slice(b"WARC/1.0\r\n");
        record.extend_from_slice(b"WARC-Type: warcinfo\r\n");
        record.extend_from_slice(b"Content-Type: application/warc-fields\r\n");
        record.extend_from_slice(format!("Content-Length: {}\r\n", block.len()).as_bytes());
        record.extend_from_slice(b"\r\n");
        record.extend_from_slice(block);
        record.extend_from_slice(b"\r\n\r\n");
        record
    }

    fn gz_member(record: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(record).unwrap();
        encoder.finish().unwrap()
    }

    /// Write a `.warc.gz` with one gzip member per record.
    pub(crate) fn write_warc_gz(path: &Path, records: &[Vec<u8>]) {
        let mut out = Vec::new();
        for record in records {
            out.extend_from_slice(&gz_member(record));
        }
        std::fs::write(path, out).unwrap();
    }

    #[test]
    fn reads_records_with_member_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.warc.gz");
        write_warc_gz(
            &path,
            &[
                info_record(),
                response_record(
                    "https://example.ca/a",
                    "2026-08-01T12:00:00Z",
                    200,
                    "<html><title>A</title></html>",
                ),
                response_record(
                    "https://example.ca/b",
                    "2026-08-01T12:00:05Z",
                    200,
                    "<html><title>B</title></html>",
                ),
            ],
        );

        let records: Vec<_> = WarcGzReader::open(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].warc_type, "warcinfo");
        assert_eq!(records[1].target_uri.as_deref(), Some("https://example.ca/a"));
        assert_eq!(records[2].target_uri.as_deref(), Some("https://example.ca/b"));

        // Offsets partition the file: contiguous, non-overlapping, covering.
        assert_eq!(records[0].offset, 0);
        for pair in records.windows(2) {
            assert_eq!(pair[0].offset + pair[0].length, pair[1].offset);
        }
        let file_len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(records[2].offset + records[2].length, file_len);
    }

    #[test]
    fn member_at_offset_reproduces_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.warc.gz");
        write_warc_gz(
            &path,
            &[
                info_record(),
                response_record(
                    "https://example.ca/a",
                    "2026-08-01T12:00:00Z",
                    200,
                    "<html><title>Replay me</title></html>",
                ),
            ],
        );

        let records: Vec<_> = WarcGzReader::open(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        let target = &records[1];

        // Re-read just the located member, as the replay service would.
        let bytes = std::fs::read(&path).unwrap();
        let member = &bytes[target.offset as usize..(target.offset + target.length) as usize];
        let mut decoder = GzDecoder::new(member);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        let (reparsed, _) = parse_record(&decompressed, target.offset, target.length).unwrap();
        assert_eq!(reparsed.target_uri, target.target_uri);
        assert_eq!(reparsed.body, target.body);
    }

    #[test]
    fn http_response_parses_status_and_content_type() {
        let record = response_record(
            "https://example.ca/a",
            "2026-08-01T12:00:00Z",
            301,
            "<html>moved</html>",
        );
        let (parsed, _) = parse_record(&record, 0, 0).unwrap();
        let response = parse_http_response(&parsed.body).unwrap();
        assert_eq!(response.status, 301);
        assert!(is_html(response.content_type.as_deref()));
        assert_eq!(response.body, b"<html>moved</html>");
    }

    #[test]
    fn empty_http_body_parses() {
        let record =
            response_record("https://example.ca/empty", "2026-08-01T12:00:00Z", 200, "");
        let (parsed, _) = parse_record(&record, 0, 0).unwrap();
        let response = parse_http_response(&parsed.body).unwrap();
        assert_eq!(response.status, 200);
        assert!(response.body.is_empty());
    }

    #[test]
    fn garbage_file_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.warc.gz");
        std::fs::write(&path, b"this is not gzip").unwrap();

        let mut reader = WarcGzReader::open(&path).unwrap();
        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(err, WarcError::Malformed { .. }), "{err:?}");
    }

    #[test]
    fn truncated_record_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.warc.gz");
        let mut record = response_record(
            "https://example.ca/a",
            "2026-08-01T12:00:00Z",
            200,
            "<html>full</html>",
        );
        record.truncate(record.len() - 12);
        write_warc_gz(&path, &[record]);

        let mut reader = WarcGzReader::open(&path).unwrap();
        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(err, WarcError::Malformed { .. }), "{err:?}");
    }
}
