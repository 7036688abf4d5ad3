//! Pseudo-HTTP framing for the bridge wire protocol.
//!
//! Requests look like `POST / HTTP/1.1` with a `Content-Length` header and a
//! JSON body; responses are `200 OK` with a JSON body and permissive CORS
//! headers so browser-hosted controllers can talk to the bridge directly.
//! Only the `OPTIONS` method token and `Content-Length` are interpreted;
//! everything else in the request line and headers is ignored.

use std::io::{Read, Write};

use serde_json::Value;

use crate::errors::{BridgeError, Result};
use crate::types::{CommandEnvelope, ResponseEnvelope};

const READ_CHUNK: usize = 4096;
const WRITE_CHUNK: usize = 16 * 1024;

/// Upper bound on the header block. A well-formed client sends a few dozen
/// bytes of headers; anything past this is not our protocol.
const MAX_HEADER_BYTES: usize = 64 * 1024;

const HEADER_END: &[u8] = b"\r\n\r\n";

/// A framed request read off a connection.
#[derive(Debug)]
pub enum Request {
    /// A CORS preflight; answered with a fixed response, body never parsed.
    Preflight,
    /// A decoded command envelope.
    Command(CommandEnvelope),
}

/// Reads one complete request from the stream.
///
/// Accumulates bytes until the header-end marker, parses `Content-Length`
/// case-insensitively, then keeps reading until that many body bytes have
/// arrived. The body may be split across any number of reads.
pub fn read_request<S: Read>(stream: &mut S) -> Result<Request> {
    let (head, mut body) = read_head(stream)?;
    let head_text = String::from_utf8_lossy(&head);

    let method = head_text.split_whitespace().next().unwrap_or("");
    if method.eq_ignore_ascii_case("OPTIONS") {
        return Ok(Request::Preflight);
    }

    let content_length = parse_content_length(&head_text)?;
    read_body(stream, &mut body, content_length)?;

    let envelope: CommandEnvelope = serde_json::from_slice(&body[..content_length])
        .map_err(|e| BridgeError::Protocol(format!("malformed JSON body: {}", e)))?;
    Ok(Request::Command(envelope))
}

/// Writes a response envelope with the standard framing.
pub fn write_response<S: Write>(stream: &mut S, response: &ResponseEnvelope) -> Result<()> {
    // serde_json emits UTF-8 without escaping non-ASCII text.
    let body = serde_json::to_vec(response)?;
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nAccess-Control-Allow-Origin: *\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes())?;
    write_chunked(stream, &body)
}

/// Writes the fixed CORS preflight response.
pub fn write_preflight<S: Write>(stream: &mut S) -> Result<()> {
    stream.write_all(
        b"HTTP/1.1 200 OK\r\nAccess-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: POST\r\nAccess-Control-Allow-Headers: Content-Type\r\nContent-Length: 0\r\n\r\n",
    )?;
    stream.flush()?;
    Ok(())
}

/// Client side: writes a command with the same framing the server reads.
pub fn write_command<S: Write>(stream: &mut S, envelope: &CommandEnvelope) -> Result<()> {
    let body = serde_json::to_vec(envelope)?;
    let head = format!(
        "POST / HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes())?;
    write_chunked(stream, &body)
}

/// Client side: reads a framed response and returns its JSON body.
pub fn read_response<S: Read>(stream: &mut S) -> Result<Value> {
    let (head, mut body) = read_head(stream)?;
    let head_text = String::from_utf8_lossy(&head);
    let content_length = parse_content_length(&head_text)?;
    read_body(stream, &mut body, content_length)?;

    serde_json::from_slice(&body[..content_length])
        .map_err(|e| BridgeError::Protocol(format!("malformed JSON response: {}", e)))
}

/// Reads until the header-end marker. Returns the header block and whatever
/// body bytes arrived in the same reads.
fn read_head<S: Read>(stream: &mut S) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut data: Vec<u8> = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        if let Some(pos) = find_header_end(&data) {
            let body = data.split_off(pos + HEADER_END.len());
            data.truncate(pos);
            return Ok((data, body));
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(BridgeError::Protocol(
                "header block exceeds maximum size".to_string(),
            ));
        }

        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(BridgeError::Protocol(
                "connection closed before a complete request arrived".to_string(),
            ));
        }
        data.extend_from_slice(&chunk[..n]);
    }
}

/// Keeps reading until `body` holds at least `content_length` bytes.
fn read_body<S: Read>(stream: &mut S, body: &mut Vec<u8>, content_length: usize) -> Result<()> {
    let mut chunk = [0u8; READ_CHUNK];
    while body.len() < content_length {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(BridgeError::Protocol(format!(
                "connection closed mid-body: got {} of {} bytes",
                body.len(),
                content_length
            )));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    Ok(())
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(HEADER_END.len())
        .position(|w| w == HEADER_END)
}

/// Extracts `Content-Length` from the header block, case-insensitively.
/// A request without one is treated as having an empty body.
fn parse_content_length(head: &str) -> Result<usize> {
    for line in head.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            return value.trim().parse::<usize>().map_err(|_| {
                BridgeError::Protocol(format!("invalid Content-Length: '{}'", value.trim()))
            });
        }
    }
    Ok(0)
}

/// Writes the body in bounded chunks with a final flush, so a large payload
/// never depends on a single atomic write.
fn write_chunked<S: Write>(stream: &mut S, body: &[u8]) -> Result<()> {
    for chunk in body.chunks(WRITE_CHUNK) {
        stream.write_all(chunk)?;
    }
    stream.flush()?;
    Ok(())
}
