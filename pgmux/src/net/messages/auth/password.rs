//! Password messages.

use super::super::prelude::*;

/// PasswordMessage (F).
#[derive(Debug, Clone, PartialEq)]
pub struct Password {
    pub response: String,
}

impl Password {
    pub fn cleartext(password: &str) -> Self {
        Self {
            response: password.to_string(),
        }
    }

    /// Answer to an MD5 challenge: `"md5" + md5(md5(password + user) + salt)`.
    pub fn md5(user: &str, password: &str, salt: &[u8]) -> Self {
        let inner = format!("{:x}", md5::compute(format!("{}{}", password, user)));
        let mut outer = inner.into_bytes();
        outer.extend_from_slice(salt);

        Self {
            response: format!("md5{:x}", md5::compute(outer)),
        }
    }
}

impl ToBytes for Password {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = Payload::named('p');
        payload.put_string(&self.response);

        Ok(payload.freeze())
    }
}
