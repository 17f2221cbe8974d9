//! Content-encoding negotiation over the `Accept-Encoding` header.
//!
//! Picks the best supported encoding (`br`, `gzip`, or `identity`) per the
//! request's quality values and reports the response headers to set. The
//! gzip coder itself is out of scope here; callers pair the decision with
//! their own gzip writer.

/// The negotiated response encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentEncoding {
    Brotli,
    Gzip,
    Identity,
}

impl ContentEncoding {
    /// Token for the `Content-Encoding` header; `None` for identity (the
    /// header is omitted then).
    pub fn token(self) -> Option<&'static str> {
        match self {
            ContentEncoding::Brotli => Some("br"),
            ContentEncoding::Gzip => Some("gzip"),
            ContentEncoding::Identity => None,
        }
    }
}

/// One `Accept-*` alternative with its quality value.
#[derive(Clone, Debug, PartialEq)]
struct AcceptSpec {
    value: String,
    q: f64,
}

/// Chooses the best offer for the given `Accept-Encoding` header values.
/// Equal weights prefer the earlier offer; an unacceptable set returns
/// `None` (the caller should send 406 or uncompressed content).
pub fn negotiate_content_encoding<'a>(
    header_values: &[&str],
    offers: &[&'a str],
) -> Option<&'a str> {
    let mut best_offer = Some("identity");
    let mut best_q = -1.0f64;
    let specs = parse_accept(header_values);
    for &offer in offers {
        for spec in &specs {
            if spec.q > best_q && (spec.value == "*" || spec.value == offer) {
                best_q = spec.q;
                best_offer = Some(offer);
            }
        }
    }
    if best_q == 0.0 {
        best_offer = None;
    }
    best_offer
}

/// Negotiates among the encodings this crate knows, with `Vary` handling:
/// returns the chosen encoding plus the headers a response should carry.
pub fn select_encoding(accept_encoding: &[&str]) -> (ContentEncoding, Vec<(&'static str, &'static str)>) {
    let mut headers = vec![("Vary", "Accept-Encoding")];
    let encoding = match negotiate_content_encoding(accept_encoding, &["br", "gzip"]) {
        Some("br") => {
            headers.push(("Content-Encoding", "br"));
            ContentEncoding::Brotli
        }
        Some("gzip") => {
            headers.push(("Content-Encoding", "gzip"));
            ContentEncoding::Gzip
        }
        _ => ContentEncoding::Identity,
    };
    (encoding, headers)
}

fn parse_accept(header_values: &[&str]) -> Vec<AcceptSpec> {
    let mut specs = Vec::new();
    for s in header_values {
        let mut s: &str = s;
        'outer: loop {
            let (value, rest) = expect_token_slash(s);
            if value.is_empty() {
                break 'outer;
            }
            let mut spec = AcceptSpec {
                value: value.to_ascii_lowercase(),
                q: 1.0,
            };
            s = skip_space(rest);
            if let Some(stripped) = s.strip_prefix(';') {
                s = skip_space(stripped);
                match s.strip_prefix("q=") {
                    Some(qs) => {
                        let (q, rest) = expect_quality(qs);
                        if q < 0.0 {
                            break 'outer;
                        }
                        spec.q = q;
                        s = rest;
                    }
                    None => break 'outer,
                }
            }
            specs.push(spec);
            s = skip_space(s);
            match s.strip_prefix(',') {
                Some(stripped) => s = skip_space(stripped),
                None => break 'outer,
            }
        }
    }
    specs
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

fn is_token_char(b: u8) -> bool {
    // RFC 2616 token: printable ASCII minus separators.
    b.is_ascii() && !b.is_ascii_control() && !b" \t\"(),/:;<=>?@[]\\{}".contains(&b)
}

fn skip_space(s: &str) -> &str {
    let i = s.bytes().position(|b| !is_space(b)).unwrap_or(s.len());
    &s[i..]
}

fn expect_token_slash(s: &str) -> (&str, &str) {
    let i = s
        .bytes()
        .position(|b| !is_token_char(b) && b != b'/')
        .unwrap_or(s.len());
    (&s[..i], &s[i..])
}

fn expect_quality(s: &str) -> (f64, &str) {
    let mut bytes = s.bytes();
    let q: f64 = match bytes.next() {
        Some(b'0') => 0.0,
        Some(b'1') => 1.0,
        _ => return (-1.0, ""),
    };
    let s = &s[1..];
    let Some(s) = s.strip_prefix('.') else {
        return (q, s);
    };
    let mut n = 0u32;
    let mut d = 1u32;
    let mut i = 0;
    for b in s.bytes() {
        if !b.is_ascii_digit() {
            break;
        }
        n = n * 10 + u32::from(b - b'0');
        d *= 10;
        i += 1;
    }
    (q + f64::from(n) / f64::from(d), &s[i..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brotli_preferred_when_accepted() {
        assert_eq!(
            negotiate_content_encoding(&["gzip, deflate, br"], &["br", "gzip"]),
            Some("br")
        );
        let (enc, headers) = select_encoding(&["gzip, br"]);
        assert_eq!(enc, ContentEncoding::Brotli);
        assert!(headers.contains(&("Content-Encoding", "br")));
        assert!(headers.contains(&("Vary", "Accept-Encoding")));
    }

    #[test]
    fn quality_values_steer_the_choice() {
        assert_eq!(
            negotiate_content_encoding(&["br;q=0.5, gzip;q=0.8"], &["br", "gzip"]),
            Some("gzip")
        );
        assert_eq!(
            negotiate_content_encoding(&["br;q=0, gzip;q=0"], &["br", "gzip"]),
            None
        );
    }

    #[test]
    fn wildcard_matches_first_offer() {
        assert_eq!(negotiate_content_encoding(&["*"], &["br", "gzip"]), Some("br"));
    }

    #[test]
    fn no_header_means_identity() {
        assert_eq!(negotiate_content_encoding(&[], &["br", "gzip"]), Some("identity"));
        let (enc, headers) = select_encoding(&[]);
        assert_eq!(enc, ContentEncoding::Identity);
        assert_eq!(headers, vec![("Vary", "Accept-Encoding")]);
    }

    #[test]
    fn malformed_quality_falls_back_to_identity() {
        // A bad q-value invalidates the rest of that header value.
        assert_eq!(
            negotiate_content_encoding(&["br;q=broken, gzip"], &["br", "gzip"]),
            Some("identity")
        );
    }
}
