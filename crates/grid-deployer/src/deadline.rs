//! Per-call deadlines for remote operations

use crate::error::{DeployError, Result};
use std::future::Future;
use std::time::Duration;

/// Run `call` with a deadline; expiry is reported as unreachable
pub(crate) async fn within<T, E>(
    limit: Duration,
    what: &str,
    call: impl Future<Output = std::result::Result<T, E>>,
) -> Result<T>
where
    E: Into<DeployError>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(DeployError::RemoteUnreachable(format!(
            "{} timed out after {:?}",
            what, limit
        ))),
    }
}
