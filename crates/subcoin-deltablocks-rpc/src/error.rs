use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::types::error::ErrorObject;

/// Delta blocks RPC errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("delta blocks are disabled")]
    Disabled,
}

/// Base error code for RPC modules.
pub mod base {
    pub const DELTABLOCKS: i32 = 12000;
}

/// Base error code for all delta blocks errors.
const BASE_ERROR: i32 = base::DELTABLOCKS;

impl From<Error> for ErrorObjectOwned {
    fn from(e: Error) -> ErrorObjectOwned {
        match e {
            Error::Disabled => ErrorObject::owned(BASE_ERROR + 1, e.to_string(), None::<()>),
        }
    }
}
