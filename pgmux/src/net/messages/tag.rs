//! Message tags the engine tells apart.
//!
//! Everything else is relayed without being looked at.

/// Tag of a message sent by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontendTag {
    Query,
    FunctionCall,
    Sync,
    Flush,
    CopyDone,
    CopyFail,
    CopyData,
    Parse,
    Bind,
    Describe,
    Execute,
    Close,
    Terminate,
    Password,
    Unknown(u8),
}

impl From<u8> for FrontendTag {
    fn from(tag: u8) -> Self {
        use FrontendTag::*;

        match tag {
            b'Q' => Query,
            b'F' => FunctionCall,
            b'S' => Sync,
            b'H' => Flush,
            b'c' => CopyDone,
            b'f' => CopyFail,
            b'd' => CopyData,
            b'P' => Parse,
            b'B' => Bind,
            b'D' => Describe,
            b'E' => Execute,
            b'C' => Close,
            b'X' => Terminate,
            b'p' => Password,
            other => Unknown(other),
        }
    }
}

/// Tag of a message sent by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendTag {
    ReadyForQuery,
    ErrorResponse,
    Authentication,
    BackendKeyData,
    ParameterStatus,
    NoticeResponse,
    Other(u8),
}

impl From<u8> for BackendTag {
    fn from(tag: u8) -> Self {
        use BackendTag::*;

        match tag {
            b'Z' => ReadyForQuery,
            b'E' => ErrorResponse,
            b'R' => Authentication,
            b'K' => BackendKeyData,
            b'S' => ParameterStatus,
            b'N' => NoticeResponse,
            other => Other(other),
        }
    }
}
