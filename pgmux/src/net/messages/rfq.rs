//! ReadyForQuery (B) message.

use crate::net::messages::{code, prelude::*};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Error,
    InTransaction,
}

impl TryFrom<u8> for TransactionState {
    type Error = Error;

    fn try_from(status: u8) -> Result<Self, <TransactionState as TryFrom<u8>>::Error> {
        match status {
            b'E' => Ok(TransactionState::Error),
            b'T' => Ok(TransactionState::InTransaction),
            b'I' => Ok(TransactionState::Idle),
            c => Err(Error::UnknownTransactionStateIdentifier(c as char)),
        }
    }
}

// ReadyForQuery (B).
#[derive(Debug, Clone, Copy)]
pub struct ReadyForQuery {
    pub status: char,
}

impl ReadyForQuery {
    /// New idle message.
    pub fn idle() -> Self {
        ReadyForQuery { status: 'I' }
    }

    /// In transaction message.
    pub fn in_transaction(in_transaction: bool) -> Self {
        if in_transaction {
            ReadyForQuery { status: 'T' }
        } else {
            Self::idle()
        }
    }

    /// Get transaction state.
    pub fn state(&self) -> Result<TransactionState, Error> {
        TransactionState::try_from(self.status as u8)
    }

    /// Transaction status of a complete, raw ReadyForQuery message.
    pub fn peek(message: &[u8]) -> Option<TransactionState> {
        if message.first() != Some(&b'Z') {
            return None;
        }
        message
            .get(5)
            .and_then(|status| TransactionState::try_from(*status).ok())
    }
}

impl ToBytes for ReadyForQuery {
    fn to_bytes(&self) -> Result<bytes::Bytes, Error> {
        let mut payload = Payload::named(self.code());
        payload.put_u8(self.status as u8);

        Ok(payload.freeze())
    }
}

impl FromBytes for ReadyForQuery {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'Z');

        if bytes.remaining() < 5 {
            return Err(Error::Eof);
        }
        let _len = bytes.get_i32();
        let status = bytes.get_u8() as char;

        Ok(Self { status })
    }
}

impl Protocol for ReadyForQuery {
    fn code(&self) -> char {
        'Z'
    }
}
