//! First-error-wins join of the build and progress tasks.

use crate::patch::cancel::CancelToken;
use crate::patch::error::PatchError;
use std::future::Future;
use tokio::task::JoinSet;
use tracing::debug;

enum Joined<A, B> {
    First(A),
    Second(B),
}

/// Runs both futures as tasks under `token` and waits for both to exit.
///
/// The first task to fail cancels `token` so its peer unwinds; the first
/// error observed is returned and later ones are discarded.
pub async fn join_first_error<FA, FB, A, B>(
    token: &CancelToken,
    first: FA,
    second: FB,
) -> Result<(A, B), PatchError>
where
    FA: Future<Output = Result<A, PatchError>> + Send + 'static,
    FB: Future<Output = Result<B, PatchError>> + Send + 'static,
    A: Send + 'static,
    B: Send + 'static,
{
    let mut tasks = JoinSet::new();
    tasks.spawn(async move { first.await.map(Joined::First) });
    tasks.spawn(async move { second.await.map(Joined::Second) });

    let mut first_value = None;
    let mut second_value = None;
    let mut first_error: Option<PatchError> = None;

    while let Some(joined) = tasks.join_next().await {
        let result = joined
            .map_err(|e| PatchError::Task(e.to_string()))
            .and_then(|r| r);

        match result {
            Ok(Joined::First(value)) => first_value = Some(value),
            Ok(Joined::Second(value)) => second_value = Some(value),
            Err(err) if first_error.is_none() => {
                token.cancel();
                first_error = Some(err);
            }
            Err(err) => debug!(error = %err, "Discarding error from peer task"),
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }
    match (first_value, second_value) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(PatchError::Task("task exited without a result".to_string())),
    }
}
