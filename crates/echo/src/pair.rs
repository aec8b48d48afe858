//! Structured join for two cooperating tasks.
//!
//! The two halves of a duplex exchange must live and die together: when one
//! fails the other is aborted, and the caller never observes a half that
//! outlives the pair.

use std::future::Future;
use tokio::task::{JoinError, JoinHandle};

/// Aborts the task when dropped, so early returns never leak a running half.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run `first` and `second` concurrently on the runtime.
///
/// Returns both results once both succeed. The first error (or panic,
/// converted through `From<JoinError>`) is returned immediately and the other
/// task is aborted before this function returns.
pub async fn join_pair<A, B, TA, TB, E>(first: A, second: B) -> Result<(TA, TB), E>
where
    A: Future<Output = Result<TA, E>> + Send + 'static,
    B: Future<Output = Result<TB, E>> + Send + 'static,
    TA: Send + 'static,
    TB: Send + 'static,
    E: From<JoinError> + Send + 'static,
{
    let mut first_task = AbortOnDrop(tokio::spawn(first));
    let mut second_task = AbortOnDrop(tokio::spawn(second));
    let mut first_out: Option<TA> = None;
    let mut second_out: Option<TB> = None;

    loop {
        tokio::select! {
            joined = &mut first_task.0, if first_out.is_none() => {
                first_out = Some(joined??);
            }
            joined = &mut second_task.0, if second_out.is_none() => {
                second_out = Some(joined??);
            }
        }

        match (first_out.take(), second_out.take()) {
            (Some(a), Some(b)) => return Ok((a, b)),
            (a, b) => {
                first_out = a;
                second_out = b;
            }
        }
    }
}
