//! Bencode decoding of torrent metadata and info hash calculation

use sha1::{Digest, Sha1};

use super::types::{TorrentFile, TorrentInfo};
use super::InfoHash;

type BencodeDict<'a> = std::collections::HashMap<&'a [u8], bencode_rs::Value<'a>>;
type DecodeResult<T> = Result<T, DecodeFailure>;

/// Reason a payload could not be decoded.
///
/// Carries no source location; the descriptor attaches the originating URL
/// or path when it converts this into a `TorrentError`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct DecodeFailure {
    pub reason: String,
}

impl DecodeFailure {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Bencode metadata decoder.
pub struct BencodeDecoder;

impl BencodeDecoder {
    /// Decodes a `.torrent` payload into owned metadata.
    ///
    /// # Errors
    ///
    /// - `DecodeFailure` - Malformed bencode, non-dictionary root, missing
    ///   `info` dictionary or an unusable file layout
    pub fn decode(torrent_bytes: &[u8]) -> DecodeResult<TorrentInfo> {
        let parsed = bencode_rs::Value::parse(torrent_bytes)
            .map_err(|e| DecodeFailure::new(format!("Bencode parsing failed: {e:?}")))?;

        let Some(root) = parsed.first() else {
            return Err(DecodeFailure::new("Empty bencode data"));
        };

        let bencode_rs::Value::Dictionary(dict) = root else {
            return Err(DecodeFailure::new("Root element must be dictionary"));
        };

        Self::extract_info(dict, torrent_bytes)
    }

    fn extract_info(dict: &BencodeDict<'_>, original_data: &[u8]) -> DecodeResult<TorrentInfo> {
        let Some(info_value) = dict.get(b"info".as_slice()) else {
            return Err(DecodeFailure::new("Missing 'info' field"));
        };
        let bencode_rs::Value::Dictionary(info) = info_value else {
            return Err(DecodeFailure::new("Info field must be dictionary"));
        };

        let info_hash = Self::calculate_info_hash(original_data)?;
        let name = Self::optional_string(info, b"name")?;
        let files = Self::extract_files(info, name.as_deref())?;

        let creation_date = match dict.get(b"creation date".as_slice()) {
            Some(bencode_rs::Value::Integer(seconds)) => {
                chrono::DateTime::from_timestamp(*seconds, 0)
            }
            _ => None,
        };

        let is_private = matches!(
            info.get(b"private".as_slice()),
            Some(bencode_rs::Value::Integer(flag)) if *flag != 0
        );

        Ok(TorrentInfo {
            info_hash,
            name,
            announce: Self::optional_string(dict, b"announce")?,
            announce_list: Self::extract_announce_list(dict),
            comment: Self::optional_string(dict, b"comment")?,
            created_by: Self::optional_string(dict, b"created by")?,
            creation_date,
            is_private,
            files,
        })
    }

    fn extract_files(info: &BencodeDict<'_>, name: Option<&str>) -> DecodeResult<Vec<TorrentFile>> {
        match info.get(b"files".as_slice()) {
            Some(bencode_rs::Value::List(entries)) => entries
                .iter()
                .enumerate()
                .map(|(index, entry)| Self::extract_file_entry(index, entry))
                .collect(),
            Some(_) => Err(DecodeFailure::new("Invalid files structure")),
            None => {
                let name =
                    name.ok_or_else(|| DecodeFailure::new("Single-file torrent without name"))?;
                let length = Self::extract_length(info)?;
                Ok(vec![TorrentFile {
                    index: 0,
                    path: name.to_string(),
                    length,
                    md5sum: Self::optional_string(info, b"md5sum")?,
                }])
            }
        }
    }

    fn extract_file_entry(index: usize, entry: &bencode_rs::Value<'_>) -> DecodeResult<TorrentFile> {
        let bencode_rs::Value::Dictionary(file) = entry else {
            return Err(DecodeFailure::new("Invalid file entry type"));
        };

        let Some(bencode_rs::Value::List(segments)) = file.get(b"path".as_slice()) else {
            return Err(DecodeFailure::new("Missing or invalid path in file"));
        };

        let mut path = Vec::with_capacity(segments.len());
        for segment in segments {
            let bencode_rs::Value::Bytes(bytes) = segment else {
                return Err(DecodeFailure::new("Invalid path component type"));
            };
            let segment = std::str::from_utf8(bytes)
                .map_err(|_| DecodeFailure::new("Invalid UTF-8 in file path"))?;
            path.push(segment);
        }

        if path.is_empty() {
            return Err(DecodeFailure::new(format!("Empty path for file {index}")));
        }

        Ok(TorrentFile {
            index,
            path: path.join("/"),
            length: Self::extract_length(file)?,
            md5sum: Self::optional_string(file, b"md5sum")?,
        })
    }

    fn extract_length(dict: &BencodeDict<'_>) -> DecodeResult<u64> {
        match dict.get(b"length".as_slice()) {
            Some(bencode_rs::Value::Integer(length)) if *length >= 0 => Ok(*length as u64),
            Some(bencode_rs::Value::Integer(length)) => {
                Err(DecodeFailure::new(format!("Negative file length: {length}")))
            }
            _ => Err(DecodeFailure::new("Missing or invalid integer field: \"length\"")),
        }
    }

    fn optional_string(dict: &BencodeDict<'_>, key: &[u8]) -> DecodeResult<Option<String>> {
        match dict.get(key) {
            Some(bencode_rs::Value::Bytes(bytes)) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|_| {
                    DecodeFailure::new(format!(
                        "Invalid UTF-8 in field: {:?}",
                        String::from_utf8_lossy(key)
                    ))
                }),
            Some(_) => Err(DecodeFailure::new(format!(
                "Field {:?} must be a byte string",
                String::from_utf8_lossy(key)
            ))),
            None => Ok(None),
        }
    }

    fn extract_announce_list(dict: &BencodeDict<'_>) -> Vec<String> {
        let Some(bencode_rs::Value::List(tiers)) = dict.get(b"announce-list".as_slice()) else {
            return Vec::new();
        };

        let mut urls = Vec::new();
        for tier in tiers {
            if let bencode_rs::Value::List(tier_urls) = tier {
                for url_value in tier_urls {
                    if let bencode_rs::Value::Bytes(url_bytes) = url_value
                        && let Ok(url) = std::str::from_utf8(url_bytes)
                    {
                        urls.push(url.to_string());
                    }
                }
            }
        }
        urls
    }

    /// SHA-1 over the raw bytes of the top-level `info` dictionary.
    fn calculate_info_hash(original_data: &[u8]) -> DecodeResult<InfoHash> {
        let info_data = Self::locate_info(original_data)?;

        let digest = Sha1::digest(info_data);
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&digest);
        Ok(InfoHash::new(hash))
    }

    /// Walks the root dictionary's keys, skipping every other value whole.
    fn locate_info(data: &[u8]) -> DecodeResult<&[u8]> {
        if data.first() != Some(&b'd') {
            return Err(DecodeFailure::new("Expected dictionary start"));
        }

        let mut pos = 1;
        while pos < data.len() && data[pos] != b'e' {
            let (key, value_start) = Self::read_string(data, pos)?;
            let value_end = value_start + Self::value_len(&data[value_start..])?;
            if key == b"info" {
                if data.get(value_start) != Some(&b'd') {
                    return Err(DecodeFailure::new("Info field is not a dictionary"));
                }
                return Ok(&data[value_start..value_end]);
            }
            pos = value_end;
        }

        Err(DecodeFailure::new("Could not find info dictionary in data"))
    }

    /// Returns the string starting at `pos` and the offset just past it.
    fn read_string(data: &[u8], pos: usize) -> DecodeResult<(&[u8], usize)> {
        let colon = data[pos..]
            .iter()
            .position(|byte| *byte == b':')
            .map(|offset| pos + offset)
            .ok_or_else(|| DecodeFailure::new("Invalid string format"))?;
        let length: usize = std::str::from_utf8(&data[pos..colon])
            .ok()
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| DecodeFailure::new("Invalid string length"))?;
        let end = colon
            .checked_add(1 + length)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| DecodeFailure::new("Truncated string"))?;
        Ok((&data[colon + 1..end], end))
    }

    /// Encoded length of the value at the start of `data`.
    fn value_len(data: &[u8]) -> DecodeResult<usize> {
        match data.first() {
            Some(b'd' | b'l') => Self::find_container_end(data),
            Some(b'i') => data
                .iter()
                .position(|byte| *byte == b'e')
                .map(|end| end + 1)
                .ok_or_else(|| DecodeFailure::new("Unterminated integer")),
            Some(b'0'..=b'9') => Self::read_string(data, 0).map(|(_, end)| end),
            _ => Err(DecodeFailure::new("Invalid bencode character")),
        }
    }

    /// Finds the byte offset just past the end of a bencode dictionary.
    ///
    /// # Errors
    ///
    /// - `DecodeFailure` - Input does not start with a dictionary or is truncated
    pub fn find_dictionary_end(data: &[u8]) -> DecodeResult<usize> {
        if data.first() != Some(&b'd') {
            return Err(DecodeFailure::new("Expected dictionary start"));
        }
        Self::find_container_end(data)
    }

    fn find_container_end(data: &[u8]) -> DecodeResult<usize> {
        let mut pos = 1;
        let mut depth = 1;

        while pos < data.len() && depth > 0 {
            match data[pos] {
                b'd' | b'l' => {
                    depth += 1;
                    pos += 1;
                }
                b'e' => {
                    depth -= 1;
                    pos += 1;
                }
                b'i' => {
                    pos += 1;
                    while pos < data.len() && data[pos] != b'e' {
                        pos += 1;
                    }
                    pos += 1;
                }
                b'0'..=b'9' => {
                    let start = pos;
                    while pos < data.len() && data[pos] != b':' {
                        pos += 1;
                    }
                    if pos >= data.len() {
                        return Err(DecodeFailure::new("Invalid string format"));
                    }
                    let length: usize = std::str::from_utf8(&data[start..pos])
                        .ok()
                        .and_then(|digits| digits.parse().ok())
                        .ok_or_else(|| DecodeFailure::new("Invalid string length"))?;
                    pos += 1 + length;
                }
                _ => return Err(DecodeFailure::new("Invalid bencode character")),
            }
        }

        if depth != 0 || pos > data.len() {
            return Err(DecodeFailure::new("Incomplete bencode dictionary"));
        }

        Ok(pos)
    }
}
