//! Cooperative cancellation of a pending or running instance.

use std::time::Duration;

pub use tokio_util::sync::CancellationToken;

/// Sleep for `duration` unless cancelled first. Returns `false` on cancellation.
pub async fn sleep_unless_cancelled(cancel: &CancellationToken, duration: Duration) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => !cancel.is_cancelled(),
        _ = cancel.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_when_not_cancelled() {
        let token = CancellationToken::new();
        assert!(sleep_unless_cancelled(&token, Duration::from_secs(60)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_sleep() {
        let token = CancellationToken::new();
        let other = token.clone();
        let handle = tokio::spawn(async move {
            sleep_unless_cancelled(&other, Duration::from_secs(3600)).await
        });
        tokio::task::yield_now().await;
        token.cancel();
        assert!(!handle.await.unwrap());
    }

    #[tokio::test]
    async fn already_cancelled_token_skips_sleep() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancelled().await;
        assert!(!sleep_unless_cancelled(&token, Duration::from_secs(1)).await);
    }
}
