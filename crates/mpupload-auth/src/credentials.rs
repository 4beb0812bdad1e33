//! Static signing credentials.
//!
//! [`Credentials`] is created once at startup and passed by reference to every
//! signing call. Nothing in this crate reads the process environment.

use std::fmt;

use crate::error::AuthError;

/// An access key id / secret access key pair.
///
/// Both fields are guaranteed non-empty. The secret never appears in `Debug`
/// output.
///
/// # Examples
///
/// ```
/// use mpupload_auth::Credentials;
///
/// let creds = Credentials::new("AKID", "secret").unwrap();
/// assert_eq!(creds.access_key_id(), "AKID");
/// assert!(!format!("{creds:?}").contains("secret"));
///
/// assert!(Credentials::new("", "secret").is_err());
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
}

impl Credentials {
    /// Create credentials, rejecting empty fields.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::EmptyCredential`] if either value is empty or blank.
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let access_key_id = access_key_id.into();
        let secret_access_key = secret_access_key.into();

        if access_key_id.trim().is_empty() {
            return Err(AuthError::EmptyCredential("access key id"));
        }
        if secret_access_key.trim().is_empty() {
            return Err(AuthError::EmptyCredential("secret access key"));
        }

        Ok(Self {
            access_key_id,
            secret_access_key,
        })
    }

    /// The access key id placed in the credential scope.
    #[must_use]
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// The secret used to seed the signing key derivation.
    #[must_use]
    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}
