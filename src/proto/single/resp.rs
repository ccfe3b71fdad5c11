use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::{self, Error};

/// A single decoded server response.
///
/// Faktory replies follow RESP framing: simple status lines, error lines,
/// and length-prefixed bulk strings whose body is JSON. On top of that raw
/// framing, two shapes are recognized by prefix: the `HI {...}` greeting,
/// and JSON objects delivered as a status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Frame {
    /// A simple status line, e.g. `OK` or `PONG`.
    Inline(String),

    /// A JSON payload, length-prefixed or delivered inline.
    Bulk(Bytes),

    /// The server greeting; carries the raw JSON text following `HI `.
    Hello(String),

    /// The null bulk: the server has nothing for us.
    Empty,

    /// An error response. Fails the operation it is a reply to, nothing
    /// else.
    Error(String),
}

/// Incremental decoder for server response frames.
///
/// Bytes are accumulated in the read buffer until a complete frame is
/// available; a partial frame consumes nothing and yields `None`. Framing
/// errors (an unknown type prefix, an unparseable length) leave the stream
/// unusable and must bring the session down.
pub(crate) struct RespCodec;

impl Decoder for RespCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Error> {
        let Some(&prefix) = src.first() else {
            return Ok(None);
        };
        // every frame begins with a CRLF-terminated line after the prefix
        let Some((line_end, next)) = find_crlf(src, 1) else {
            return Ok(None);
        };
        match prefix {
            b'+' => {
                // Simple String
                // https://redis.io/topics/protocol#resp-simple-strings
                let text = text_line(&src[1..line_end], "simple string")?;
                let frame = if let Some(raw) = text.strip_prefix("HI ") {
                    Frame::Hello(raw.to_string())
                } else if text.starts_with('{') {
                    Frame::Bulk(Bytes::copy_from_slice(text.as_bytes()))
                } else {
                    Frame::Inline(text.to_string())
                };
                src.advance(next);
                Ok(Some(frame))
            }
            b'-' => {
                // Error
                // https://redis.io/topics/protocol#resp-errors
                let text = text_line(&src[1..line_end], "error")?.to_string();
                src.advance(next);
                Ok(Some(Frame::Error(text)))
            }
            b'$' => {
                // Bulk String
                // https://redis.io/topics/protocol#resp-bulk-strings
                let text = text_line(&src[1..line_end], "bulk string")?;
                let size =
                    text.parse::<isize>()
                        .map_err(|_| error::Protocol::BadResponse {
                            typed_as: "bulk string",
                            error: "server bulk response size prefix is not an integer",
                            bytes: text.as_bytes().to_vec(),
                        })?;

                if size == -1 {
                    src.advance(next);
                    return Ok(Some(Frame::Empty));
                }

                let size =
                    usize::try_from(size).map_err(|_| error::Protocol::BadResponse {
                        typed_as: "bulk string",
                        error: "server bulk response size prefix is negative",
                        bytes: text.as_bytes().to_vec(),
                    })?;

                let total = next + size + 2;
                if src.len() < total {
                    src.reserve(total - src.len());
                    return Ok(None);
                }
                if &src[next + size..total] != b"\r\n" {
                    return Err(error::Protocol::BadResponse {
                        typed_as: "bulk string",
                        error: "bulk payload is not CRLF-terminated",
                        bytes: src[next + size..total].to_vec(),
                    }
                    .into());
                }

                let payload = Bytes::copy_from_slice(&src[next..next + size]);
                src.advance(total);
                Ok(Some(Frame::Bulk(payload)))
            }
            c => Err(error::Protocol::BadResponse {
                typed_as: "unknown",
                error: "invalid response type prefix",
                bytes: vec![c],
            }
            .into()),
        }
    }
}

fn find_crlf(buf: &[u8], start: usize) -> Option<(usize, usize)> {
    let mut index = start;
    while index + 1 < buf.len() {
        if buf[index] == b'\r' && buf[index + 1] == b'\n' {
            return Some((index, index + 2));
        }
        index += 1;
    }
    None
}

fn text_line<'a>(line: &'a [u8], typed_as: &'static str) -> Result<&'a str, Error> {
    std::str::from_utf8(line).map_err(|_| {
        error::Protocol::BadResponse {
            typed_as,
            error: "server response contains non-utf8 bytes",
            bytes: line.to_vec(),
        }
        .into()
    })
}

// ----------------------------------------------

/// The payload of the server's `HI` greeting.
#[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq, Eq)]
pub(crate) struct Hi {
    #[serde(rename = "v")]
    pub version: usize,

    #[serde(rename = "i")]
    pub iterations: Option<usize>,

    #[serde(rename = "s")]
    pub salt: Option<String>,
}

// ----------------------------------------------

pub(crate) fn bad(expected: &'static str, got: &Frame) -> error::Protocol {
    let stringy = match *got {
        Frame::Inline(ref s) | Frame::Hello(ref s) | Frame::Error(ref s) => Some(&**s),
        Frame::Bulk(ref b) => std::str::from_utf8(b).ok(),
        Frame::Empty => None,
    };

    match stringy {
        Some(s) => error::Protocol::BadType {
            expected,
            received: s.to_string(),
        },
        None => error::Protocol::BadType {
            expected,
            received: format!("{:?}", got),
        },
    }
}

pub(crate) fn read_json<T: serde::de::DeserializeOwned>(frame: Frame) -> Result<Option<T>, Error> {
    match frame {
        Frame::Inline(ref s) if s == "OK" => Ok(None),
        Frame::Inline(ref s) => serde_json::from_str(s).map(Some).map_err(Error::Serialization),
        Frame::Bulk(ref b) if &b[..] == b"OK" => Ok(None),
        Frame::Bulk(ref b) => {
            if b.is_empty() {
                return Ok(None);
            }
            serde_json::from_slice(b).map(Some).map_err(Error::Serialization)
        }
        Frame::Empty => Ok(None),
        ref other => Err(bad("json", other).into()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::{Map, Value};

    fn decode_all(bytes: &[u8]) -> Result<Vec<Frame>, Error> {
        let mut buf = BytesMut::from(bytes);
        let mut codec = RespCodec;
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut buf)? {
            frames.push(frame);
        }
        assert!(buf.is_empty(), "decoder left unconsumed bytes: {:?}", buf);
        Ok(frames)
    }

    fn decode_one(bytes: &[u8]) -> Result<Frame, Error> {
        Ok(decode_all(bytes)?.remove(0))
    }

    #[test]
    fn it_parses_simple_strings() {
        assert_eq!(
            decode_one(b"+OK\r\n").unwrap(),
            Frame::Inline("OK".to_string())
        );
    }

    #[test]
    fn it_recognizes_the_greeting() {
        assert_eq!(
            decode_one(b"+HI {\"v\":2}\r\n").unwrap(),
            Frame::Hello("{\"v\":2}".to_string())
        );
    }

    #[test]
    fn it_promotes_inline_json_to_bulk() {
        assert_eq!(
            decode_one(b"+{\"hello\":1}\r\n").unwrap(),
            Frame::Bulk(Bytes::from_static(b"{\"hello\":1}"))
        );
    }

    #[test]
    fn it_parses_errors() {
        assert_eq!(
            decode_one(b"-ERR foo\r\n").unwrap(),
            Frame::Error("ERR foo".to_string())
        );
    }

    #[test]
    fn it_parses_nills() {
        assert_eq!(decode_one(b"$-1\r\n").unwrap(), Frame::Empty);
    }

    #[test]
    fn it_parses_empty_bulk() {
        assert_eq!(
            decode_one(b"$0\r\n\r\n").unwrap(),
            Frame::Bulk(Bytes::new())
        );
    }

    #[test]
    fn it_parses_non_empty_bulk() {
        assert_eq!(
            decode_one(b"$11\r\nHELLO WORLD\r\n").unwrap(),
            Frame::Bulk(Bytes::from_static(b"HELLO WORLD"))
        );
    }

    #[test]
    fn it_errors_on_bad_sizes() {
        let err = decode_one(b"$x\r\n\r\n").unwrap_err();
        if let Error::Protocol(error::Protocol::BadResponse { typed_as, error, .. }) = err {
            assert_eq!(typed_as, "bulk string");
            assert_eq!(error, "server bulk response size prefix is not an integer");
        } else {
            unreachable!();
        }
    }

    #[test]
    fn it_errors_on_unknown_resp_type() {
        let err = decode_one(b"^\r\n").unwrap_err();
        if let Error::Protocol(error::Protocol::BadResponse { typed_as, error, .. }) = err {
            assert_eq!(typed_as, "unknown");
            assert_eq!(error, "invalid response type prefix");
        } else {
            unreachable!();
        }
    }

    #[test]
    fn it_waits_for_complete_frames() {
        let mut codec = RespCodec;
        let mut buf = BytesMut::new();

        // a frame delivered byte by byte only materializes at the CRLF
        for &b in b"+OK\r" {
            buf.extend_from_slice(&[b]);
            assert_eq!(codec.decode(&mut buf).unwrap(), None);
        }
        buf.extend_from_slice(b"\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Inline("OK".to_string()))
        );

        // a bulk split between its length line and payload
        buf.extend_from_slice(b"$11\r\nHELLO");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b" WORLD\r\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Bulk(Bytes::from_static(b"HELLO WORLD")))
        );
    }

    #[test]
    fn it_decodes_pipelined_frames_in_order() {
        let frames = decode_all(b"+OK\r\n$-1\r\n-ERR broken\r\n").unwrap();
        assert_eq!(
            frames,
            vec![
                Frame::Inline("OK".to_string()),
                Frame::Empty,
                Frame::Error("ERR broken".to_string()),
            ]
        );
    }

    #[test]
    fn it_decodes_json_ok_string() {
        let frame = decode_one(b"+OK\r\n").unwrap();
        assert_eq!(read_json::<Value>(frame).unwrap(), None);
    }

    #[test]
    fn it_decodes_json_ok_blob() {
        let frame = decode_one(b"$2\r\nOK\r\n").unwrap();
        assert_eq!(read_json::<Value>(frame).unwrap(), None);
    }

    #[test]
    fn it_decodes_json_nill() {
        let frame = decode_one(b"$-1\r\n").unwrap();
        assert_eq!(read_json::<Value>(frame).unwrap(), None);
    }

    #[test]
    fn it_decodes_json_empty() {
        let frame = decode_one(b"$0\r\n\r\n").unwrap();
        assert_eq!(read_json::<Value>(frame).unwrap(), None);
    }

    #[test]
    fn it_decodes_string_json() {
        let frame = decode_one(b"+{\"hello\":1}\r\n").unwrap();
        let mut m = Map::new();
        m.insert("hello".to_string(), Value::from(1));
        assert_eq!(read_json(frame).unwrap(), Some(Value::Object(m)));
    }

    #[test]
    fn it_decodes_blob_json() {
        let frame = decode_one(b"$11\r\n{\"hello\":1}\r\n").unwrap();
        let mut m = Map::new();
        m.insert("hello".to_string(), Value::from(1));
        assert_eq!(read_json(frame).unwrap(), Some(Value::Object(m)));
    }

    #[test]
    fn it_errors_on_bad_json_blob() {
        let frame = decode_one(b"$9\r\n{\"hello\"}\r\n").unwrap();
        if let Error::Serialization(err) = read_json::<Value>(frame).unwrap_err() {
            let _: serde_json::Error = err;
        } else {
            unreachable!();
        }
    }

    #[test]
    fn json_error_on_greeting() {
        let frame = decode_one(b"+HI {\"v\":2}\r\n").unwrap();
        if let Error::Protocol(error::Protocol::BadType { expected, .. }) =
            read_json::<Value>(frame).unwrap_err()
        {
            assert_eq!(expected, "json");
        } else {
            unreachable!();
        }
    }
}
