//! E2E Test Suite 04: HTTP Content Negotiation

use brotli::{negotiate_content_encoding, select_encoding, ContentEncoding};

#[test]
fn test_browser_style_headers() {
    // Typical modern browser header.
    let (enc, headers) = select_encoding(&["gzip, deflate, br, zstd"]);
    assert_eq!(enc, ContentEncoding::Brotli);
    assert_eq!(enc.token(), Some("br"));
    assert!(headers.contains(&("Vary", "Accept-Encoding")));

    // Older client without brotli support.
    let (enc, _) = select_encoding(&["gzip, deflate"]);
    assert_eq!(enc, ContentEncoding::Gzip);
    assert_eq!(enc.token(), Some("gzip"));
}

#[test]
fn test_explicit_identity_only() {
    let (enc, headers) = select_encoding(&["identity"]);
    assert_eq!(enc, ContentEncoding::Identity);
    assert_eq!(enc.token(), None);
    // No Content-Encoding header for identity responses.
    assert!(!headers.iter().any(|(k, _)| *k == "Content-Encoding"));
}

#[test]
fn test_weighted_preferences() {
    assert_eq!(
        negotiate_content_encoding(&["br;q=1.0, gzip;q=0.8"], &["br", "gzip"]),
        Some("br")
    );
    assert_eq!(
        negotiate_content_encoding(&["br;q=0.4, gzip;q=0.9"], &["br", "gzip"]),
        Some("gzip")
    );
    // Ties go to the earlier offer.
    assert_eq!(
        negotiate_content_encoding(&["br;q=0.5, gzip;q=0.5"], &["br", "gzip"]),
        Some("br")
    );
}

#[test]
fn test_multiple_header_lines() {
    assert_eq!(
        negotiate_content_encoding(&["gzip;q=0.7", "br;q=0.9"], &["br", "gzip"]),
        Some("br")
    );
}

#[test]
fn test_rejections() {
    // All offers at q=0: nothing acceptable.
    assert_eq!(
        negotiate_content_encoding(&["br;q=0, gzip;q=0, identity;q=0"], &["br", "gzip"]),
        None
    );
}

#[test]
fn test_whitespace_tolerance() {
    assert_eq!(
        negotiate_content_encoding(&["br ; q=0.9 ,  gzip ; q=1.0"], &["br", "gzip"]),
        Some("gzip")
    );
}
