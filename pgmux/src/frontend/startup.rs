//! Startup packet parsing.

use crate::net::messages::hello::{
    CANCEL_REQUEST_CODE, GSSENC_REQUEST_CODE, SSL_REQUEST_CODE,
};
use crate::net::messages::NegotiateProtocolVersion;

use super::Error;

/// Postgres truncates identifiers to `NAMEDATALEN - 1` bytes.
pub const NAMEDATALEN: usize = 64;

/// What the client asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum StartupRequest {
    /// CancelRequest. The engine doesn't forward these.
    Cancel { pid: i32, secret: i32 },
    /// SSLRequest.
    Ssl,
    /// GSSENCRequest.
    GssEnc,
    /// Regular startup packet.
    Startup(StartupParams),
}

/// Parameters of a regular startup packet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartupParams {
    pub database: String,
    pub user: String,
    /// Command-line options passed in the `options` parameter.
    pub cmdline_options: Option<String>,
    pub application_name: Option<String>,
    /// Everything else, in the order the client sent it.
    pub options: Vec<(String, String)>,
    /// Set when the client asked for a newer minor version or
    /// protocol options we don't know.
    pub negotiate: Option<NegotiateProtocolVersion>,
}

/// Parses startup packets.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartupNegotiator;

impl StartupNegotiator {
    /// Parse a complete startup packet, length included.
    ///
    /// A second SSLRequest or GSSENCRequest on the same connection
    /// fails the version check, the same way Postgres rejects it.
    pub fn parse(
        &self,
        packet: &[u8],
        ssl_done: bool,
        gss_done: bool,
    ) -> Result<StartupRequest, Error> {
        if packet.len() < 8 {
            return Err(Error::InvalidLayout);
        }

        let code = read_i32(packet, 4);

        match code {
            CANCEL_REQUEST_CODE => {
                if packet.len() != 16 {
                    return Err(Error::CancelLength(packet.len()));
                }
                return Ok(StartupRequest::Cancel {
                    pid: read_i32(packet, 8),
                    secret: read_i32(packet, 12),
                });
            }
            SSL_REQUEST_CODE if !ssl_done => return Ok(StartupRequest::Ssl),
            GSSENC_REQUEST_CODE if !gss_done => return Ok(StartupRequest::GssEnc),
            _ => (),
        }

        let major = (code >> 16) as u16;
        let minor = (code & 0xffff) as u16;

        if major != 3 {
            return Err(Error::UnsupportedProtocol { major, minor });
        }

        let mut params = StartupParams::default();
        let mut unrecognized = vec![];
        let mut replication = None;
        let mut offset = 8;

        loop {
            let Some(name) = c_str(packet, offset) else {
                return Err(Error::InvalidLayout);
            };
            offset += name.len() + 1;

            if name.is_empty() {
                break;
            }

            let Some(value) = c_str(packet, offset) else {
                return Err(Error::InvalidLayout);
            };
            offset += value.len() + 1;

            let name = String::from_utf8_lossy(name).to_string();
            let value = String::from_utf8_lossy(value).to_string();

            match name.as_str() {
                "database" => params.database = value,
                "user" => params.user = value,
                "options" => params.cmdline_options = Some(value),
                "replication" => replication = Some(value),
                _ if name.starts_with("_pq_.") => unrecognized.push(name),
                _ => {
                    if name == "application_name" {
                        params.application_name = Some(value.clone());
                    }
                    params.options.push((name, value));
                }
            }
        }

        // The terminator has to be the last byte of the packet.
        if offset != packet.len() {
            return Err(Error::InvalidLayout);
        }

        if let Some(value) = replication {
            if value == "database" || parse_bool(&value).ok_or_else(|| Error::InvalidParameter {
                name: "replication".into(),
                value: value.clone(),
            })? {
                return Err(Error::Replication);
            }
        }

        if params.user.is_empty() {
            return Err(Error::NoUser);
        }

        if params.database.is_empty() {
            params.database = params.user.clone();
        }

        truncate_identifier(&mut params.database);
        truncate_identifier(&mut params.user);

        if minor > 0 || !unrecognized.is_empty() {
            params.negotiate = Some(NegotiateProtocolVersion {
                minor: 0,
                unrecognized,
            });
        }

        Ok(StartupRequest::Startup(params))
    }
}

fn read_i32(buf: &[u8], at: usize) -> i32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    i32::from_be_bytes(bytes)
}

/// Null-terminated string starting at `offset`, without the terminator.
fn c_str(buf: &[u8], offset: usize) -> Option<&[u8]> {
    let rest = buf.get(offset..)?;
    let end = memchr::memchr(0, rest)?;
    Some(&rest[..end])
}

/// Postgres boolean spellings.
fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "on" | "yes" | "1" | "t" | "y" => Some(true),
        "false" | "off" | "no" | "0" | "f" | "n" => Some(false),
        _ => None,
    }
}

fn truncate_identifier(name: &mut String) {
    if name.len() >= NAMEDATALEN {
        let mut end = NAMEDATALEN - 1;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
}
