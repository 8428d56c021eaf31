//! Error types for the HLS key server

use std::io;

use thiserror::Error;

use crate::auth::AuthError;
use crate::key_store::KeyStoreError;

/// Result type alias for the key server
pub type Result<T> = std::result::Result<T, Error>;

/// Key server errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key store error (lookup or reload)
    #[error("Key store error: {0}")]
    KeyStore(#[from] KeyStoreError),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenRejection;
    use crate::key_store::InvalidIdentifier;

    #[test]
    fn key_store_errors_convert_with_context() {
        let err: Error = KeyStoreError::InvalidIdentifier(InvalidIdentifier::Empty).into();
        assert!(matches!(err, Error::KeyStore(KeyStoreError::InvalidIdentifier(_))));
        assert_eq!(
            err.to_string(),
            "Key store error: invalid key identifier: identifier is empty"
        );
    }

    #[test]
    fn auth_errors_convert_with_context() {
        let err: Error = AuthError::TokenInvalid(TokenRejection::Expired).into();
        assert!(matches!(err, Error::Auth(AuthError::TokenInvalid(_))));

        let err: Error = AuthError::Signing("bad key".to_string()).into();
        assert_eq!(
            err.to_string(),
            "Authentication error: failed to sign token: bad key"
        );
    }

    #[test]
    fn display_includes_context() {
        let err = Error::Config("jwt.secret must not be empty".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: jwt.secret must not be empty"
        );
    }
}
