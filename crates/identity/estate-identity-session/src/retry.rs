use estate_auth_core::{AuthError, AuthResult};
use tracing::warn;

/// Run `operation`, running it a second time if the first attempt failed transiently.
pub async fn retry_transient_once<T, F, Fut>(mut operation: F) -> AuthResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AuthResult<T>>,
{
    match operation().await {
        Err(AuthError::Transient(cause)) => {
            warn!(cause = %cause, "transient failure, retrying once");
            operation().await
        }
        result => result,
    }
}
