//! CBOR encoding of history objects.
//!
//! A history object is a CBOR sequence: the list of headers it contains,
//! then one item per database version in the same order. Readers that
//! only need headers stop after the first item.

use crate::error::{ProtocolError, ProtocolResult};
use crate::header::DatabaseVersionHeader;
use crate::vector_clock::VectorClock;
use crate::version::DatabaseVersion;
use std::io::{Read, Write};

/// Writes `versions` as a history object.
pub fn write_versions<W: Write>(mut writer: W, versions: &[DatabaseVersion]) -> ProtocolResult<()> {
    let headers: Vec<&DatabaseVersionHeader> = versions.iter().map(|v| &v.header).collect();
    ciborium::into_writer(&headers, &mut writer).map_err(ProtocolError::codec)?;
    for version in versions {
        ciborium::into_writer(version, &mut writer).map_err(ProtocolError::codec)?;
    }
    writer.flush()?;
    Ok(())
}

/// Encodes `versions` as a history object into a buffer.
pub fn encode_versions(versions: &[DatabaseVersion]) -> ProtocolResult<Vec<u8>> {
    let mut buf = Vec::new();
    write_versions(&mut buf, versions)?;
    Ok(buf)
}

/// Reads only the headers of a history object.
pub fn read_headers<R: Read>(mut reader: R) -> ProtocolResult<Vec<DatabaseVersionHeader>> {
    ciborium::from_reader(&mut reader).map_err(ProtocolError::codec)
}

/// Reads every version of a history object.
pub fn read_versions<R: Read>(reader: R) -> ProtocolResult<Vec<DatabaseVersion>> {
    read_filtered(reader, |_| true)
}

/// Reads the versions whose clock lies causally within `[from, to]`.
///
/// Versions outside the range are decoded one at a time and dropped, so
/// memory stays bounded by the size of the range.
pub fn read_versions_in_range<R: Read>(
    reader: R,
    from: &VectorClock,
    to: &VectorClock,
) -> ProtocolResult<Vec<DatabaseVersion>> {
    read_filtered(reader, |header| header.vector_clock.is_within(from, to))
}

fn read_filtered<R, F>(mut reader: R, keep: F) -> ProtocolResult<Vec<DatabaseVersion>>
where
    R: Read,
    F: Fn(&DatabaseVersionHeader) -> bool,
{
    let headers: Vec<DatabaseVersionHeader> =
        ciborium::from_reader(&mut reader).map_err(ProtocolError::codec)?;
    let mut versions = Vec::new();

    for expected in &headers {
        let version: DatabaseVersion =
            ciborium::from_reader(&mut reader).map_err(ProtocolError::codec)?;
        if &version.header != expected {
            return Err(ProtocolError::Codec(format!(
                "history object lists {expected} but contains {}",
                version.header
            )));
        }
        if keep(&version.header) {
            versions.push(version);
        }
    }

    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{FileHistory, FileHistoryId, FileType, FileVersion};

    fn version(clock: &str, timestamp: u64) -> DatabaseVersion {
        let header = DatabaseVersionHeader::new("A", clock.parse().unwrap(), timestamp);
        let mut version = DatabaseVersion::new(header);
        let mut history = FileHistory::new(FileHistoryId::random());
        history.versions.push(FileVersion::new("f", FileType::File));
        version.file_histories.push(history);
        version
    }

    #[test]
    fn headers_only() {
        let versions = vec![version("A1", 1), version("A2", 2)];
        let bytes = encode_versions(&versions).unwrap();
        let headers = read_headers(bytes.as_slice()).unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[1], versions[1].header);
    }

    #[test]
    fn full_read() {
        let versions = vec![version("A1", 1), version("A2", 2)];
        let bytes = encode_versions(&versions).unwrap();
        assert_eq!(read_versions(bytes.as_slice()).unwrap(), versions);
    }

    #[test]
    fn range_read() {
        let versions = vec![version("A1", 1), version("A2", 2), version("A3", 3)];
        let bytes = encode_versions(&versions).unwrap();
        let from = "A2".parse().unwrap();
        let to = "A3".parse().unwrap();
        let loaded = read_versions_in_range(bytes.as_slice(), &from, &to).unwrap();
        assert_eq!(loaded, versions[1..].to_vec());
    }

    #[test]
    fn truncated_object_fails() {
        let bytes = encode_versions(&[version("A1", 1)]).unwrap();
        let truncated = &bytes[..bytes.len() - 3];
        assert!(read_versions(truncated).is_err());
    }
}
