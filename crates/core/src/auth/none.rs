use async_trait::async_trait;

use super::{AuthError, AuthRequest, Authenticator, Identity};

/// Trusts the user header as is; requests without one act as `anonymous`.
/// Only for deployments where a gateway already authenticated the caller.
#[derive(Debug, Default)]
pub struct NoneAuthenticator;

impl NoneAuthenticator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Authenticator for NoneAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError> {
        Ok(match request.user_id() {
            Some(user_id) => Identity::new(user_id, self.method_name()),
            None => Identity::anonymous(),
        })
    }

    fn method_name(&self) -> &'static str {
        "none"
    }
}
