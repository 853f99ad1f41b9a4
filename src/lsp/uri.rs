use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tower_lsp_server::lsp_types::Uri;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UriError {
    #[error("not a file:// URI or malformed percent encoding")]
    InvalidUri,
}

/// Bytes that pass through the codec unescaped.
fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'/' | b'.' | b'_' | b'~' | b'-')
}

/// `file://` URI for an absolute path. Separators are normalized to forward
/// slashes and everything outside the unreserved set is `%HH`-encoded with
/// upper-case hex.
pub fn path_to_uri(path: &Path) -> Result<Uri, UriError> {
    let raw = path.to_str().ok_or(UriError::InvalidUri)?;
    let mut out = String::with_capacity(raw.len() + "file://".len());
    out.push_str("file://");
    for &byte in raw.as_bytes() {
        let byte = if byte == b'\\' { b'/' } else { byte };
        if is_unreserved(byte) {
            out.push(byte as char);
        } else {
            const HEX: &[u8; 16] = b"0123456789ABCDEF";
            out.push('%');
            out.push(HEX[(byte >> 4) as usize] as char);
            out.push(HEX[(byte & 0xf) as usize] as char);
        }
    }
    Uri::from_str(&out).map_err(|_| UriError::InvalidUri)
}

pub fn uri_to_path(uri: &Uri) -> Result<PathBuf, UriError> {
    decode_file_uri(uri.as_str())
}

fn hex_value(byte: u8) -> Result<u8, UriError> {
    match byte {
        b'0'..=b'9' => Ok(byte - b'0'),
        b'a'..=b'f' => Ok(byte - b'a' + 10),
        b'A'..=b'F' => Ok(byte - b'A' + 10),
        _ => Err(UriError::InvalidUri),
    }
}

fn decode_file_uri(raw: &str) -> Result<PathBuf, UriError> {
    let rest = raw.strip_prefix("file://").ok_or(UriError::InvalidUri)?;
    let bytes = rest.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() {
                return Err(UriError::InvalidUri);
            }
            let value = (hex_value(bytes[i + 1])? << 4) | hex_value(bytes[i + 2])?;
            decoded.push(value);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    let path = String::from_utf8(decoded).map_err(|_| UriError::InvalidUri)?;
    if path.is_empty() {
        return Err(UriError::InvalidUri);
    }
    Ok(PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_reserved_bytes_upper_case() {
        let uri = path_to_uri(Path::new("/tmp/a b#c.zig")).unwrap();
        assert_eq!(uri.as_str(), "file:///tmp/a%20b%23c.zig");
    }

    #[test]
    fn decodes_back_to_path() {
        let uri = Uri::from_str("file:///tmp/a%20b.zig").unwrap();
        assert_eq!(uri_to_path(&uri).unwrap(), PathBuf::from("/tmp/a b.zig"));
    }

    #[test]
    fn round_trips_well_formed_file_uris() {
        for raw in ["file:///src/main.zig", "file:///a/b%20c/d%C3%A9.zig"] {
            let uri = Uri::from_str(raw).unwrap();
            let path = uri_to_path(&uri).unwrap();
            let back = path_to_uri(&path).unwrap();
            assert_eq!(back.as_str(), raw);
        }
    }

    #[test]
    fn rejects_non_file_schemes_and_bad_escapes() {
        let http = Uri::from_str("http://example.com/a.zig").unwrap();
        assert_eq!(uri_to_path(&http), Err(UriError::InvalidUri));
        assert_eq!(decode_file_uri("file:///bad%2"), Err(UriError::InvalidUri));
        assert_eq!(decode_file_uri("file:///bad%zz"), Err(UriError::InvalidUri));
    }
}
