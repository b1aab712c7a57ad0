use std::future::Future;
use std::time::Duration;

use crate::error::QueryError;

/// Run two independent fallible futures concurrently and wait for both.
///
/// Both always run to completion. If either failed the join fails; when both
/// failed the left error wins and any successful sibling result is dropped.
pub async fn join_pair<A, B, E, FA, FB>(left: FA, right: FB) -> Result<(A, B), E>
where
    FA: Future<Output = Result<A, E>>,
    FB: Future<Output = Result<B, E>>,
{
    let (left, right) = tokio::join!(left, right);
    match (left, right) {
        (Ok(a), Ok(b)) => Ok((a, b)),
        (Err(e), _) | (_, Err(e)) => Err(e),
    }
}

/// Bound a gateway call; expiry surfaces as [`QueryError::Timeout`].
pub async fn with_timeout<T, F>(operation: &'static str, after: Duration, call: F) -> Result<T, QueryError>
where
    F: Future<Output = Result<T, QueryError>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => Err(QueryError::Timeout { operation, after }),
    }
}
