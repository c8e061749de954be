//! Backend message decoding

use super::constants::{auth, tags};
use super::message::{AuthenticationMessage, BackendMessage, ErrorFields};
use std::io;

/// Upper bound on a startup-phase message.
///
/// Nothing the server sends before `ReadyForQuery` comes close; a larger
/// length header means we are not talking to a Postgres server.
const MAX_MESSAGE_LENGTH: usize = 1024 * 1024;

/// Decode one backend message from the front of `data`
///
/// # Returns
/// `Ok(Some((msg, consumed)))` - a complete message and the bytes it occupied
/// `Ok(None)` - more bytes are needed
/// `Err(e)` - the stream is malformed and cannot be resynchronized
pub fn decode_message(data: &[u8]) -> io::Result<Option<(BackendMessage, usize)>> {
    if data.len() < 5 {
        return Ok(None);
    }

    let tag = data[0];
    let len = i32::from_be_bytes([data[1], data[2], data[3], data[4]]);

    if len < 4 {
        return Err(invalid(format!("invalid message length {}", len)));
    }
    let len = len as usize;
    if len > MAX_MESSAGE_LENGTH {
        return Err(invalid(format!(
            "message length {} exceeds maximum allowed {}",
            len, MAX_MESSAGE_LENGTH
        )));
    }

    if data.len() < len + 1 {
        return Ok(None);
    }

    let body = &data[5..len + 1];
    let msg = match tag {
        tags::AUTHENTICATION => decode_authentication(body)?,
        tags::BACKEND_KEY_DATA => decode_backend_key_data(body)?,
        tags::ERROR_RESPONSE => BackendMessage::ErrorResponse(decode_error_fields(body)?),
        tags::NOTICE_RESPONSE => BackendMessage::NoticeResponse(decode_error_fields(body)?),
        tags::NEGOTIATE_PROTOCOL_VERSION => decode_negotiate_protocol_version(body)?,
        tags::PARAMETER_STATUS => decode_parameter_status(body)?,
        tags::READY_FOR_QUERY => decode_ready_for_query(body)?,
        _ => {
            return Err(invalid(format!(
                "unexpected message tag during startup: 0x{:02X}",
                tag
            )))
        }
    };

    Ok(Some((msg, len + 1)))
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Bounds-checked cursor over a message body
struct Reader<'a> {
    data: &'a [u8],
    what: &'static str,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], what: &'static str) -> Self {
        Self { data, what }
    }

    fn i32(&mut self) -> io::Result<i32> {
        if self.data.len() < 4 {
            return Err(invalid(format!("truncated {}", self.what)));
        }
        let (head, rest) = self.data.split_at(4);
        self.data = rest;
        Ok(i32::from_be_bytes([head[0], head[1], head[2], head[3]]))
    }

    fn u8(&mut self) -> io::Result<u8> {
        let (&b, rest) = self
            .data
            .split_first()
            .ok_or_else(|| invalid(format!("truncated {}", self.what)))?;
        self.data = rest;
        Ok(b)
    }

    fn cstr(&mut self) -> io::Result<String> {
        let end = self.data.iter().position(|&b| b == 0).ok_or_else(|| {
            invalid(format!("missing null terminator in {}", self.what))
        })?;
        let s = String::from_utf8_lossy(&self.data[..end]).into_owned();
        self.data = &self.data[end + 1..];
        Ok(s)
    }

    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.data)
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn decode_authentication(body: &[u8]) -> io::Result<BackendMessage> {
    let mut r = Reader::new(body, "authentication request");
    let auth_type = r.i32()?;

    let auth_msg = match auth_type {
        auth::OK => AuthenticationMessage::Ok,
        auth::CLEARTEXT_PASSWORD => AuthenticationMessage::CleartextPassword,
        auth::MD5_PASSWORD => {
            let salt = r.i32()?.to_be_bytes();
            AuthenticationMessage::Md5Password { salt }
        }
        auth::SASL => {
            // Mechanism list: C strings terminated by an empty one
            let mut mechanisms = Vec::new();
            while !r.is_empty() {
                let mechanism = r.cstr()?;
                if mechanism.is_empty() {
                    break;
                }
                mechanisms.push(mechanism);
            }
            AuthenticationMessage::Sasl { mechanisms }
        }
        auth::SASL_CONTINUE => AuthenticationMessage::SaslContinue {
            data: r.rest().to_vec(),
        },
        auth::SASL_FINAL => AuthenticationMessage::SaslFinal {
            data: r.rest().to_vec(),
        },
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported authentication method {}", auth_type),
            ))
        }
    };

    Ok(BackendMessage::Authentication(auth_msg))
}

fn decode_backend_key_data(body: &[u8]) -> io::Result<BackendMessage> {
    let mut r = Reader::new(body, "backend key data");
    Ok(BackendMessage::BackendKeyData {
        process_id: r.i32()?,
        secret_key: r.i32()?,
    })
}

fn decode_error_fields(body: &[u8]) -> io::Result<ErrorFields> {
    let mut r = Reader::new(body, "error field");
    let mut fields = ErrorFields::default();

    while !r.is_empty() {
        let field_type = r.u8()?;
        if field_type == 0 {
            break;
        }
        let value = r.cstr()?;

        match field_type {
            // 'V' is the non-localized severity; prefer it when present
            b'V' => fields.severity = Some(value),
            b'S' if fields.severity.is_none() => fields.severity = Some(value),
            b'C' => fields.code = Some(value),
            b'M' => fields.message = Some(value),
            b'D' => fields.detail = Some(value),
            b'H' => fields.hint = Some(value),
            _ => {}
        }
    }

    Ok(fields)
}

fn decode_negotiate_protocol_version(body: &[u8]) -> io::Result<BackendMessage> {
    let mut r = Reader::new(body, "protocol negotiation");
    let minor_version = r.i32()?;
    let count = r.i32()?.max(0);
    let mut unrecognized = Vec::new();
    for _ in 0..count {
        unrecognized.push(r.cstr()?);
    }
    Ok(BackendMessage::NegotiateProtocolVersion {
        minor_version,
        unrecognized,
    })
}

fn decode_parameter_status(body: &[u8]) -> io::Result<BackendMessage> {
    let mut r = Reader::new(body, "parameter status");
    Ok(BackendMessage::ParameterStatus {
        name: r.cstr()?,
        value: r.cstr()?,
    })
}

fn decode_ready_for_query(body: &[u8]) -> io::Result<BackendMessage> {
    let mut r = Reader::new(body, "ready for query");
    Ok(BackendMessage::ReadyForQuery { status: r.u8()? })
}
