//! Minimal HTTP/1.1 request parsing and response serialization.
//!
//! The parser works on a window of raw bytes and never copies: the parsed
//! [`Request`] borrows from the window. It can be called again and again on a
//! growing window until the request is complete.

use std::fmt::Write as _;
use std::str;
use thiserror::Error;

/// Upper bound on header lines per request.
pub const MAX_HEADERS: usize = 40;

const LINE_END: &[u8] = b"\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<'a> {
    pub method: &'a str,
    pub uri: &'a str,
    pub headers: Vec<(&'a str, &'a str)>,
    pub payload: &'a [u8],
}

impl<'a> Request<'a> {
    /// Value of the first header called `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| *value)
    }

    /// True if the client asked for the connection to end after this request.
    /// The value must be exactly `close`.
    pub fn wants_close(&self) -> bool {
        self.header("Connection") == Some("close")
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Parsed<'a> {
    /// A whole request, and how many bytes of the window it used.
    Complete { request: Request<'a>, len: usize },
    /// More bytes are needed.
    Incomplete,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed request line")]
    RequestLine,
    #[error("request line is not valid UTF-8")]
    Encoding,
    #[error("malformed header line")]
    Header,
    #[error("more than {} headers", MAX_HEADERS)]
    TooManyHeaders,
    #[error("invalid Content-Length")]
    ContentLength,
    #[error("{0} request without Content-Length")]
    MissingContentLength(String),
}

fn find_line_end(buf: &[u8]) -> Option<usize> {
    buf.windows(LINE_END.len()).position(|w| w == LINE_END)
}

fn parse_request_line(line: &[u8]) -> Result<(&str, &str), ParseError> {
    let line = str::from_utf8(line).map_err(|_| ParseError::Encoding)?;
    let mut parts = line.splitn(3, ' ');
    let method = parts.next().unwrap_or_default();
    let uri = parts.next().unwrap_or_default();
    let version = parts.next().ok_or(ParseError::RequestLine)?;

    if method.is_empty() || uri.is_empty() || version.is_empty() {
        return Err(ParseError::RequestLine);
    }
    Ok((method, uri))
}

fn parse_header(line: &[u8]) -> Result<(&str, &str), ParseError> {
    let line = str::from_utf8(line).map_err(|_| ParseError::Header)?;
    let (key, value) = line.split_once(':').ok_or(ParseError::Header)?;
    if key.is_empty() {
        return Err(ParseError::Header);
    }
    Ok((key, value.trim_start_matches([' ', '\t'])))
}

/// Tries to parse one request from the start of `buf`.
pub fn parse_request(buf: &[u8]) -> Result<Parsed<'_>, ParseError> {
    let Some(line_end) = find_line_end(buf) else {
        return Ok(Parsed::Incomplete);
    };
    let (method, uri) = parse_request_line(&buf[..line_end])?;
    let mut pos = line_end + LINE_END.len();

    let mut headers = Vec::new();
    loop {
        let Some(line_len) = find_line_end(&buf[pos..]) else {
            return Ok(Parsed::Incomplete);
        };
        let line = &buf[pos..pos + line_len];
        pos += line_len + LINE_END.len();
        if line.is_empty() {
            break;
        }
        if headers.len() == MAX_HEADERS {
            return Err(ParseError::TooManyHeaders);
        }
        headers.push(parse_header(line)?);
    }

    let mut request = Request {
        method,
        uri,
        headers,
        payload: &[],
    };

    let payload_len = match request.header("Content-Length") {
        Some(value) => value
            .trim()
            .parse::<usize>()
            .map_err(|_| ParseError::ContentLength)?,
        None if method == "PUT" => {
            return Err(ParseError::MissingContentLength(method.to_string()))
        }
        None => 0,
    };

    let end = pos
        .checked_add(payload_len)
        .ok_or(ParseError::ContentLength)?;
    let Some(payload) = buf.get(pos..end) else {
        return Ok(Parsed::Incomplete);
    };
    request.payload = payload;

    Ok(Parsed::Complete { request, len: end })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    Created,
    NoContent,
    SeeOther,
    BadRequest,
    NotFound,
    NotImplemented,
    ServiceUnavailable,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Created => 201,
            Status::NoContent => 204,
            Status::SeeOther => 303,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::NotImplemented => 501,
            Status::ServiceUnavailable => 503,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Created => "Created",
            Status::NoContent => "No Content",
            Status::SeeOther => "See Other",
            Status::BadRequest => "Bad Request",
            Status::NotFound => "Not Found",
            Status::NotImplemented => "Not Implemented",
            Status::ServiceUnavailable => "Service Unavailable",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn ok(body: Vec<u8>) -> Self {
        Self::new(Status::Ok).with_body(body)
    }

    pub fn see_other(location: String) -> Self {
        Self::new(Status::SeeOther).with_header("Location", location)
    }

    pub fn service_unavailable() -> Self {
        Self::new(Status::ServiceUnavailable).with_header("Retry-After", "1")
    }

    /// Wire form: status line, headers, `Content-Length`, blank line, body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\n",
            self.status.code(),
            self.status.reason()
        );
        for (name, value) in &self.headers {
            // writing into a String cannot fail
            let _ = write!(head, "{name}: {value}\r\n");
        }
        let _ = write!(head, "Content-Length: {}\r\n\r\n", self.body.len());

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

#[cfg(test)]
impl Response {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
