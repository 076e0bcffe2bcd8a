use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use ulid::Ulid;

/// Shared-password auth. The startup `user` must also be a valid user id,
/// since it is the identity every booking and listing is attributed to.
#[derive(Debug)]
pub struct StaydAuthSource {
    password: String,
}

impl StaydAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for StaydAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        if let Err(e) = user_id(login.user()) {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            tracing::warn!("rejected login for user {:?}", login.user());
            return Err(e);
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

/// Parse the connection user name as a ULID user id.
pub fn user_id(user: Option<&str>) -> PgWireResult<Ulid> {
    let user = user.unwrap_or_default();
    Ulid::from_string(user).map_err(|_| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "FATAL".into(),
            "28000".into(),
            format!("user name must be a ULID user id, got {user:?}"),
        )))
    })
}
