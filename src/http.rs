use std::collections::HashMap;
use std::io::ErrorKind;

use bytes::Bytes;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Longest request or header line accepted.
const MAX_LINE: u64 = 8 * 1024;
const MAX_HEADERS: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Malformed request line '{0}'")]
    BadRequestLine(String),
    #[error("Request header section too large")]
    HeadersTooLarge,
    #[error("Connection closed in the middle of a request")]
    Truncated,
    #[error("HTTP I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    InternalServerError,
}

#[derive(Debug)]
pub struct Response {
    pub status: Status,
    pub content_type: &'static str,
    pub body: Bytes,
}

impl Request {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::MethodNotAllowed => 405,
            Status::InternalServerError => 500,
        }
    }

    fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::NotFound => "Not Found",
            Status::MethodNotAllowed => "Method Not Allowed",
            Status::InternalServerError => "Internal Server Error",
        }
    }
}

impl Response {
    pub fn json<T: Serialize>(status: Status, value: &T) -> Self {
        // serializing plain derive structs cannot fail
        let body = serde_json::to_vec(value).unwrap_or_default();
        Response {
            status,
            content_type: "application/json",
            body: body.into(),
        }
    }

    pub fn html(body: impl Into<Bytes>) -> Self {
        Response {
            status: Status::Ok,
            content_type: "text/html; charset=utf-8",
            body: body.into(),
        }
    }

    pub fn jpeg(body: Bytes) -> Self {
        Response {
            status: Status::Ok,
            content_type: "image/jpeg",
            body,
        }
    }

    pub fn text(status: Status, body: &'static str) -> Self {
        Response {
            status,
            content_type: "text/plain; charset=utf-8",
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    pub fn not_found() -> Self {
        Self::text(Status::NotFound, "Not Found\n")
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n",
            self.status.code(),
            self.status.reason(),
            self.content_type,
            self.body.len()
        );
        writer.write_all(head.as_bytes()).await?;
        writer.write_all(&self.body).await?;
        writer.flush().await
    }
}

/// Head of an open-ended response whose body follows as a stream of parts.
pub async fn write_stream_head<W>(writer: &mut W, content_type: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nCache-Control: no-cache, private\r\nPragma: no-cache\r\nConnection: close\r\n\r\n"
    );
    writer.write_all(head.as_bytes()).await?;
    writer.flush().await
}

/// Reads one request head. Returns `None` if the peer closed the connection
/// before sending anything. Request bodies are not supported and ignored.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<Request>, Error>
where
    R: AsyncBufRead + Unpin,
{
    let Some(request_line) = read_line(reader).await? else {
        return Ok(None);
    };

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::BadRequestLine(request_line));
    };
    if !version.starts_with("HTTP/") || parts.next().is_some() {
        return Err(Error::BadRequestLine(request_line));
    }

    let mut headers = 0;
    loop {
        match read_line(reader).await? {
            Some(line) if line.is_empty() => break,
            Some(_) if headers < MAX_HEADERS => headers += 1,
            Some(_) => return Err(Error::HeadersTooLarge),
            None => return Err(Error::Truncated),
        }
    }

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, parse_query(query)),
        None => (target, HashMap::new()),
    };
    Ok(Some(Request {
        method: method.to_owned(),
        path: path.to_owned(),
        query,
    }))
}

async fn read_line<R>(reader: &mut R) -> Result<Option<String>, Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = match (&mut *reader).take(MAX_LINE).read_line(&mut line).await {
        Ok(read) => read,
        Err(e) if e.kind() == ErrorKind::InvalidData => {
            return Err(Error::BadRequestLine("<invalid UTF-8>".to_owned()))
        }
        Err(e) => return Err(e.into()),
    };
    if read == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') {
        return Err(if read as u64 >= MAX_LINE {
            Error::HeadersTooLarge
        } else {
            Error::Truncated
        });
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_owned()))
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_owned(), value.replace('+', " ")),
            None => (pair.to_owned(), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(raw: &str) -> Result<Option<Request>, Error> {
        let mut reader = tokio::io::BufReader::new(raw.as_bytes());
        read_request(&mut reader).await
    }

    #[tokio::test]
    async fn parses_path_and_query() {
        let request = parse("GET /api/move?dir=up&x HTTP/1.1\r\nHost: pi\r\nAccept: */*\r\n\r\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/api/move");
        assert_eq!(request.param("dir"), Some("up"));
        assert_eq!(request.param("x"), Some(""));
        assert_eq!(request.param("y"), None);
    }

    #[tokio::test]
    async fn accepts_bare_newlines() {
        let request = parse("GET / HTTP/1.0\n\n").await.unwrap().unwrap();
        assert_eq!(request.path, "/");
        assert!(request.query.is_empty());
    }

    #[tokio::test]
    async fn empty_connection_is_not_an_error() {
        assert!(parse("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_garbage() {
        assert!(matches!(
            parse("hello\r\n\r\n").await,
            Err(Error::BadRequestLine(_))
        ));
        assert!(matches!(
            parse("GET / HTTP/1.1\r\nHost: pi\r\n").await,
            Err(Error::Truncated)
        ));
    }

    #[tokio::test]
    async fn non_utf8_request_is_malformed() {
        let raw: &[u8] = b"GET /\xFF\xFE HTTP/1.1\r\n\r\n";
        let mut reader = tokio::io::BufReader::new(raw);
        assert!(matches!(
            read_request(&mut reader).await,
            Err(Error::BadRequestLine(_))
        ));
    }

    #[tokio::test]
    async fn writes_complete_response() {
        let mut out = Vec::new();
        Response::text(Status::NotFound, "gone")
            .write_to(&mut out)
            .await
            .unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(out.contains("Content-Length: 4\r\n"));
        assert!(out.ends_with("\r\n\r\ngone"));
    }
}
