//! HTTP/1.x `Host` header extraction (§4.2). Looks forward up to 4 KiB for
//! the end of the header block; falls back to a byte-level `Host:` scan if
//! no terminator shows up in that window (a client pipelining a huge header
//! block, or a non-HTTP binary protocol that happens to start with an
//! uppercase letter).

const MAX_SCAN: usize = 4096;

pub fn sniff_http_host(buf: &[u8]) -> Option<String> {
    let window = &buf[..buf.len().min(MAX_SCAN)];

    if window.is_empty() || !window[0].is_ascii_uppercase() {
        return None;
    }

    match find_headers_end(window) {
        Some(headers_end) => extract_host_from_headers(&window[..headers_end]),
        None => scan_host_prefix(window),
    }
}

/// Returns the byte offset of the start of the blank line terminating the
/// header block (`\r\n\r\n` or `\n\n`), i.e. `buf[..offset]` is the header
/// block with its line terminators intact.
fn find_headers_end(buf: &[u8]) -> Option<usize> {
    let mut best: Option<usize> = None;
    if let Some(pos) = find_subslice(buf, b"\r\n\r\n") {
        best = Some(pos);
    }
    if let Some(pos) = find_subslice(buf, b"\n\n") {
        best = Some(match best {
            Some(b) => b.min(pos),
            None => pos,
        });
    }
    best
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
}

fn extract_host_from_headers(headers: &[u8]) -> Option<String> {
    let mut found: Option<String> = None;
    for line in headers.split(|&b| b == b'\n') {
        let line = trim_trailing_cr(line);
        if line.len() < 5 {
            continue;
        }
        if !line[..5].eq_ignore_ascii_case(b"host:") {
            continue;
        }
        let value = trim_ascii_whitespace(&line[5..]);
        let value = std::str::from_utf8(value).ok()?.to_string();
        if found.is_some() {
            // Multiple Host headers: spec says return empty.
            return None;
        }
        found = Some(value);
    }
    found
}

/// Fallback when no header terminator was found within the scan window:
/// a raw search for `\nHost:` / `\nhost:`.
fn scan_host_prefix(window: &[u8]) -> Option<String> {
    let patterns: [&[u8]; 2] = [b"\nHost:", b"\nhost:"];
    for pattern in patterns {
        if let Some(pos) = find_subslice(window, pattern) {
            let start = pos + pattern.len();
            let rest = &window[start..];
            let end = rest
                .iter()
                .position(|&b| b == b'\r' || b == b'\n')
                .unwrap_or(rest.len());
            let value = trim_ascii_whitespace(&rest[..end]);
            return std::str::from_utf8(value).ok().map(String::from);
        }
    }
    None
}

fn trim_trailing_cr(line: &[u8]) -> &[u8] {
    if line.last() == Some(&b'\r') {
        &line[..line.len() - 1]
    } else {
        line
    }
}

fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|p| p + 1)
        .unwrap_or(start);
    &bytes[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_host_from_well_formed_request() {
        let req = b"GET / HTTP/1.1\r\nHost: example.com\r\nUser-Agent: x\r\n\r\n";
        assert_eq!(sniff_http_host(req).as_deref(), Some("example.com"));
    }

    #[test]
    fn aborts_when_leading_byte_not_uppercase() {
        assert_eq!(sniff_http_host(b"get / http/1.1\r\n\r\n"), None);
    }

    #[test]
    fn returns_none_for_multiple_host_headers() {
        let req = b"GET / HTTP/1.1\r\nHost: a.com\r\nHost: b.com\r\n\r\n";
        assert_eq!(sniff_http_host(req), None);
    }

    #[test]
    fn falls_back_to_byte_scan_without_terminator() {
        let mut req = b"GET / HTTP/1.1\r\nHost: example.com\r\n".to_vec();
        req.extend(std::iter::repeat(b'X').take(MAX_SCAN)); // no blank line anywhere
        assert_eq!(sniff_http_host(&req).as_deref(), Some("example.com"));
    }
}
