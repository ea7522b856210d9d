use crate::error::{ParseErrorKind, StreamError};

/// A parsed RTSP request (RFC 2326 §6).
///
/// RTSP requests follow HTTP/1.1 syntax:
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2. For SAT>IP the
/// interesting payload is not a body but the URI query string
/// ([`uri_query`](Self::uri_query)), which carries the tuning and PID
/// parameters.
#[derive(Debug)]
pub struct RtspRequest {
    /// RTSP method (OPTIONS, SETUP, PLAY, TEARDOWN, ...).
    pub method: String,
    /// Request-URI (e.g. `rtsp://host/?freq=11836&msys=dvbs2`).
    pub uri: String,
    /// Protocol version (expected: `RTSP/1.0`).
    pub version: String,
    /// Headers as ordered (name, value) pairs. Names are stored
    /// as-received; lookups are case-insensitive.
    pub headers: Vec<(String, String)>,
}

impl RtspRequest {
    /// Parse an RTSP request from its text representation.
    ///
    /// SAT>IP requests are header-only: the tuning payload always travels
    /// in the URI query string, never in a message body. Parsing therefore
    /// stops at the first blank line and anything after it is discarded.
    /// Returns [`StreamError::Parse`] on malformed input.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let mut lines = raw.lines();

        let (method, uri, version) = match lines.next().map(str::trim) {
            None | Some("") => {
                return Err(StreamError::Parse {
                    kind: ParseErrorKind::EmptyRequest,
                });
            }
            Some(line) => {
                let mut words = line.split_whitespace();
                match (words.next(), words.next(), words.next(), words.next()) {
                    (Some(method), Some(uri), Some(version), None) => (method, uri, version),
                    _ => {
                        return Err(StreamError::Parse {
                            kind: ParseErrorKind::InvalidRequestLine,
                        });
                    }
                }
            }
        };

        if version != "RTSP/1.0" {
            tracing::warn!(version, "unexpected RTSP version");
        }

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                // end of the header section; no body follows in SAT>IP
                break;
            }
            let (field, rest) = line.split_once(':').ok_or(StreamError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            headers.push((field.trim().to_string(), rest.trim().to_string()));
        }

        Ok(RtspRequest {
            method: method.to_string(),
            uri: uri.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    /// Build a request directly from its parts (for dispatchers that do
    /// their own wire parsing).
    pub fn from_parts(method: &str, uri: &str, headers: Vec<(String, String)>) -> Self {
        Self {
            method: method.to_string(),
            uri: uri.to_string(),
            version: "RTSP/1.0".to_string(),
            headers,
        }
    }

    /// Look up a header value by name (case-insensitive, RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The CSeq header value (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<u32> {
        self.get_header("CSeq").and_then(|v| v.trim().parse().ok())
    }

    /// The session ID from the Session header, with any `;timeout=`
    /// suffix stripped.
    pub fn session_id(&self) -> Option<&str> {
        self.get_header("Session")
            .map(|s| s.split(';').next().unwrap_or(s).trim())
    }

    /// The SAT>IP query string of the request URI (everything after `?`).
    pub fn uri_query(&self) -> Option<&str> {
        self.uri.split_once('?').map(|(_, query)| query)
    }
}
