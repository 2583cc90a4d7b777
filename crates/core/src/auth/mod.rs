//! Request authentication. Resolves the user a request acts for.

mod api_key;
mod none;
mod traits;
mod types;

pub use api_key::ApiKeyAuthenticator;
pub use none::NoneAuthenticator;
pub use traits::{AuthError, Authenticator};
pub use types::{AuthRequest, Identity, ANONYMOUS_USER, API_KEY_HEADER, USER_ID_HEADER};

use crate::config::{AuthConfig, AuthMethod};

/// Build the authenticator selected in `[auth]`.
pub fn create_authenticator(config: &AuthConfig) -> Result<Box<dyn Authenticator>, AuthError> {
    match config.method {
        AuthMethod::None => Ok(Box::new(NoneAuthenticator::new())),
        AuthMethod::ApiKey => {
            let api_key = config
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| {
                    AuthError::ConfigurationError(
                        "auth.api_key must be set when method = \"api_key\"".to_string(),
                    )
                })?;
            Ok(Box::new(ApiKeyAuthenticator::new(api_key)))
        }
    }
}
