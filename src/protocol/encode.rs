//! Frontend message encoding

use super::constants::SSL_REQUEST_CODE;
use super::message::FrontendMessage;
use bytes::{BufMut, BytesMut};
use std::io;

/// Encode a frontend message into bytes
pub fn encode_message(msg: &FrontendMessage) -> io::Result<BytesMut> {
    let mut buf = BytesMut::new();

    match msg {
        FrontendMessage::Startup { version, params } => {
            // Startup packets carry no type byte
            framed(&mut buf, None, |buf| {
                buf.put_i32(*version);
                for (key, value) in params {
                    put_cstr(buf, key)?;
                    put_cstr(buf, value)?;
                }
                buf.put_u8(0);
                Ok(())
            })?;
        }
        FrontendMessage::Password(password) => {
            framed(&mut buf, Some(b'p'), |buf| put_cstr(buf, password))?;
        }
        FrontendMessage::SaslInitialResponse { mechanism, data } => {
            framed(&mut buf, Some(b'p'), |buf| {
                put_cstr(buf, mechanism)?;
                buf.put_i32(frame_len(data.len())?);
                buf.put_slice(data);
                Ok(())
            })?;
        }
        FrontendMessage::SaslResponse { data } => {
            framed(&mut buf, Some(b'p'), |buf| {
                buf.put_slice(data);
                Ok(())
            })?;
        }
        FrontendMessage::SslRequest => {
            buf.put_i32(8);
            buf.put_i32(SSL_REQUEST_CODE);
        }
        FrontendMessage::Terminate => {
            buf.put_u8(b'X');
            buf.put_i32(4);
        }
    }

    Ok(buf)
}

/// Write an optional tag, a length placeholder, the body, then patch the length
fn framed<F>(buf: &mut BytesMut, tag: Option<u8>, body: F) -> io::Result<()>
where
    F: FnOnce(&mut BytesMut) -> io::Result<()>,
{
    if let Some(tag) = tag {
        buf.put_u8(tag);
    }
    let len_pos = buf.len();
    buf.put_i32(0);

    body(buf)?;

    let len = frame_len(buf.len() - len_pos)?;
    buf[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

fn put_cstr(buf: &mut BytesMut, s: &str) -> io::Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "string contains a NUL byte",
        ));
    }
    buf.put(s.as_bytes());
    buf.put_u8(0);
    Ok(())
}

fn frame_len(len: usize) -> io::Result<i32> {
    i32::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "message too large"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::PROTOCOL_VERSION;

    #[test]
    fn test_encode_startup() {
        let msg = FrontendMessage::Startup {
            version: PROTOCOL_VERSION,
            params: vec![("user".into(), "app".into())],
        };
        let buf = encode_message(&msg).unwrap();

        let len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(len as usize, buf.len());
        assert_eq!(&buf[4..8], &PROTOCOL_VERSION.to_be_bytes());
        assert_eq!(&buf[8..], b"user\0app\0\0");
    }

    #[test]
    fn test_encode_password() {
        let buf = encode_message(&FrontendMessage::Password("pw".into())).unwrap();
        assert_eq!(&buf[..], &[b'p', 0, 0, 0, 7, b'p', b'w', 0]);
    }

    #[test]
    fn test_encode_sasl_initial_response() {
        let msg = FrontendMessage::SaslInitialResponse {
            mechanism: "SCRAM-SHA-256".into(),
            data: b"n,,n=,r=abc".to_vec(),
        };
        let buf = encode_message(&msg).unwrap();

        assert_eq!(buf[0], b'p');
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len as usize, buf.len() - 1);
        let data_len_at = 5 + "SCRAM-SHA-256".len() + 1;
        let data_len = i32::from_be_bytes([
            buf[data_len_at],
            buf[data_len_at + 1],
            buf[data_len_at + 2],
            buf[data_len_at + 3],
        ]);
        assert_eq!(data_len, 11);
    }

    #[test]
    fn test_encode_rejects_nul_in_parameter() {
        let msg = FrontendMessage::Startup {
            version: PROTOCOL_VERSION,
            params: vec![("user".into(), "a\0b".into())],
        };
        let err = encode_message(&msg).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_encode_terminate() {
        let buf = encode_message(&FrontendMessage::Terminate).unwrap();
        assert_eq!(&buf[..], &[b'X', 0, 0, 0, 4]);
    }

    #[test]
    fn test_encode_ssl_request() {
        let buf = encode_message(&FrontendMessage::SslRequest).unwrap();

        // SSLRequest is exactly 8 bytes: 4-byte length (8) + 4-byte code (80877103)
        assert_eq!(&buf[..], &[0x00, 0x00, 0x00, 0x08, 0x04, 0xD2, 0x16, 0x2F]);
    }
}
