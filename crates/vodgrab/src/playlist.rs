// M3U8 media-playlist parsing, restricted to what the segment engine
// consumes: segment URIs and the AES-128 key directive. Every other
// directive is ignored.

use crate::error::DownloadError;
use url::Url;

/// Encryption directive from `#EXT-X-KEY`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionInfo {
    pub method: String,
    pub key_url: Url,
    /// Explicit IV from `IV=0x<hex32>`, honoured verbatim when present.
    pub iv: Option<[u8; 16]>,
}

/// Parsed playlist: ordered absolute segment URLs plus optional encryption.
#[derive(Debug, Clone)]
pub struct Playlist {
    pub segments: Vec<Url>,
    pub encryption: Option<EncryptionInfo>,
}

/// Parse a media playlist body against its absolute URL.
///
/// Lines starting with `#EXT-X-KEY:` set the encryption directive; other
/// `#` lines and blanks are skipped; anything else is a segment reference,
/// resolved against `base_url` when relative. An empty segment list is a
/// parse failure.
pub fn parse_media_playlist(body: &str, base_url: &Url) -> Result<Playlist, DownloadError> {
    let mut segments = Vec::new();
    let mut encryption = None;

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(attrs) = line.strip_prefix("#EXT-X-KEY:") {
            encryption = parse_key_directive(attrs, base_url)?;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        segments.push(resolve(line, base_url)?);
    }

    if segments.is_empty() {
        return Err(DownloadError::playlist(format!(
            "no segments in playlist {base_url}"
        )));
    }

    Ok(Playlist {
        segments,
        encryption,
    })
}

fn resolve(reference: &str, base_url: &Url) -> Result<Url, DownloadError> {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        Url::parse(reference).map_err(|e| DownloadError::invalid_url(reference, e.to_string()))
    } else {
        base_url
            .join(reference)
            .map_err(|e| DownloadError::invalid_url(reference, e.to_string()))
    }
}

/// Parse the attribute list of an `#EXT-X-KEY:` line.
///
/// `METHOD` is required. `METHOD=NONE` clears encryption; any other method
/// requires a `URI`. Returns the directive to store.
fn parse_key_directive(
    attrs: &str,
    base_url: &Url,
) -> Result<Option<EncryptionInfo>, DownloadError> {
    let mut method = None;
    let mut uri = None;
    let mut iv = None;

    for (name, value) in split_attributes(attrs) {
        match name {
            "METHOD" => method = Some(value.to_owned()),
            "URI" => uri = Some(value.trim_matches('"').to_owned()),
            "IV" => iv = Some(parse_iv(value)?),
            _ => {}
        }
    }

    let method = method
        .ok_or_else(|| DownloadError::playlist("#EXT-X-KEY without METHOD attribute"))?;
    if method == "NONE" {
        return Ok(None);
    }

    let uri = uri.ok_or_else(|| {
        DownloadError::playlist(format!("#EXT-X-KEY METHOD={method} without URI attribute"))
    })?;
    let key_url = resolve(&uri, base_url)?;

    Ok(Some(EncryptionInfo {
        method,
        key_url,
        iv,
    }))
}

/// Split `A=1,B="x,y",C=2` into (name, value) pairs, commas inside quotes
/// preserved.
fn split_attributes(attrs: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();
    let mut rest = attrs;
    while !rest.is_empty() {
        let end = match rest.find(',') {
            Some(comma) => {
                // A quoted value may contain the comma; skip past the close quote.
                match rest.find('"') {
                    Some(q) if q < comma => {
                        let close = rest[q + 1..].find('"').map(|c| q + 1 + c);
                        match close {
                            Some(close) => rest[close..].find(',').map(|c| close + c),
                            None => None,
                        }
                    }
                    _ => Some(comma),
                }
            }
            None => None,
        };
        let (item, remainder) = match end {
            Some(end) => (&rest[..end], &rest[end + 1..]),
            None => (rest, ""),
        };
        if let Some((name, value)) = item.split_once('=') {
            pairs.push((name.trim(), value.trim()));
        }
        rest = remainder;
    }
    pairs
}

fn parse_iv(literal: &str) -> Result<[u8; 16], DownloadError> {
    let hex_str = literal
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    let mut iv = [0u8; 16];
    hex::decode_to_slice(hex_str, &mut iv)
        .map_err(|e| DownloadError::playlist(format!("bad IV literal `{literal}`: {e}")))?;
    Ok(iv)
}
