//! Account credentials: password hashing, input validation and access tokens.

pub mod credentials;
pub mod error;
pub mod password;
pub mod token;

pub use credentials::{normalize_email, validate_registration, Registration};
pub use error::AuthError;
pub use password::{hash_password, verify_password};
pub use token::{Claims, TokenIssuer};
