//! Query (F) message.

use crate::net::{
    c_string_buf,
    messages::{code, prelude::*},
};

/// Simple query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub query: String,
}

impl Query {
    pub fn new(query: impl ToString) -> Self {
        Self {
            query: query.to_string(),
        }
    }

    /// Statement text of a complete, raw Query message,
    /// without the null terminator.
    pub fn text(message: &[u8]) -> &[u8] {
        let body = message.get(5..).unwrap_or_default();
        body.strip_suffix(&[0]).unwrap_or(body)
    }
}

impl ToBytes for Query {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = Payload::named(self.code());
        payload.put_string(&self.query);

        Ok(payload.freeze())
    }
}

impl FromBytes for Query {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'Q');

        if bytes.remaining() < 4 {
            return Err(Error::Eof);
        }
        let _len = bytes.get_i32();
        let query = c_string_buf(&mut bytes);

        Ok(Query { query })
    }
}

impl Protocol for Query {
    fn code(&self) -> char {
        'Q'
    }
}
