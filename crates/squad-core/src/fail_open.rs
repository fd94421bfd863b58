//! Best-effort side writes.
//!
//! Some files exist only for humans poking around a session directory: the
//! last-known `agent.json` mirror, message payload files left for `file`
//! transport providers. Losing one of those must not fail the command that
//! produced it. The session log itself is never written through here.

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Run `f`, logging a failure with `warn!` and returning `None` instead of the error.
///
/// ```no_run
/// use squad_core::fail_open::fail_open;
/// use squad_core::Result;
///
/// async fn mirror_agent() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let written = fail_open("agent_mirror", || mirror_agent()).await;
///     assert!(written.is_some());
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (ignored): {}", operation_name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SquadError;

    #[tokio::test]
    async fn test_fail_open_passes_value_through() {
        let result = fail_open("mirror", || async { Ok::<_, SquadError>("written") }).await;
        assert_eq!(result, Some("written"));
    }

    #[tokio::test]
    async fn test_fail_open_swallows_error() {
        let result = fail_open("mirror", || async {
            Err::<(), _>(SquadError::Process("disk full".to_string()))
        })
        .await;
        assert_eq!(result, None);
    }
}
