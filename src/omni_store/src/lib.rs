mod bitmap;
mod layout;
mod volume;

pub use bitmap::*;
pub use layout::*;
pub use volume::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OmniError {
    #[error("internal error: {0}")]
    Internal(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("invalid volume: {0}")]
    InvalidVolume(String),
    #[error("invalid param: {0}")]
    InvalidParam(String),
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Access denied / invalid session")]
    AccessDenied,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("Directory not empty")]
    DirectoryNotEmpty,
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("user table full")]
    UserTableFull,
    #[error("disk full")]
    DiskFull,
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
}

impl OmniError {
    /// Numeric code carried in error responses. Codes are advisory and not
    /// part of the stable interface; messages are.
    pub fn code(&self) -> i32 {
        match self {
            OmniError::Internal(_) => -1,
            OmniError::InvalidCredentials => -2,
            OmniError::AccessDenied => -3,
            OmniError::NotFound(_) => -4,
            OmniError::NotADirectory(_) => -5,
            OmniError::DirectoryNotEmpty => -6,
            OmniError::AlreadyExists(_) => -7,
            OmniError::UserTableFull => -8,
            OmniError::DiskFull => -9,
            OmniError::UnknownOperation(_) => -10,
            OmniError::InvalidParam(_) => -11,
            OmniError::InvalidVolume(_) => -12,
            OmniError::IoError(_) => -13,
        }
    }
}

pub type OmniResult<T> = std::result::Result<T, OmniError>;

impl From<std::io::Error> for OmniError {
    fn from(err: std::io::Error) -> Self {
        OmniError::IoError(err.to_string())
    }
}
