use super::*;
use std::sync::atomic::{AtomicU32, Ordering};

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        jitter: 0.0,
    }
}

#[test]
fn exponential_backoff_is_capped() {
    let policy = RetryPolicy {
        max_attempts: 10,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(1000),
        jitter: 0.0,
    };

    assert_eq!(policy.backoff(1), Duration::from_millis(100));
    assert_eq!(policy.backoff(2), Duration::from_millis(200));
    assert_eq!(policy.backoff(3), Duration::from_millis(400));
    assert_eq!(policy.backoff(5), Duration::from_millis(1000));
    assert_eq!(policy.backoff(40), Duration::from_millis(1000));
    assert_eq!(policy.delay_for(2), Duration::from_millis(200));
}

#[test]
fn jitter_stays_within_bounds() {
    let policy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1000),
        max_delay: Duration::from_secs(10),
        jitter: 0.25,
    };

    for _ in 0..100 {
        let delay = policy.delay_for(1);
        assert!(delay >= Duration::from_millis(750), "{:?}", delay);
        assert!(delay <= Duration::from_millis(1250), "{:?}", delay);
    }
}

#[tokio::test]
async fn succeeds_after_transient_failures() {
    let calls = AtomicU32::new(0);

    let result = fast_policy(3)
        .run("embed", || {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if call < 3 {
                    Err(EmbedError::Transient("connection reset".to_string()))
                } else {
                    Ok(vec![1.0_f32, 2.0])
                }
            }
        })
        .await;

    assert_eq!(result, Ok(vec![1.0, 2.0]));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let calls = AtomicU32::new(0);

    let result: Result<(), EmbedError> = fast_policy(4)
        .run("embed", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EmbedError::Transient("HTTP 503".to_string())) }
        })
        .await;

    assert_eq!(result, Err(EmbedError::Transient("HTTP 503".to_string())));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn permanent_errors_are_not_retried() {
    let calls = AtomicU32::new(0);

    let result: Result<(), EmbedError> = fast_policy(5)
        .run("embed", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EmbedError::Permanent("HTTP 404".to_string())) }
        })
        .await;

    assert!(matches!(result, Err(EmbedError::Permanent(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn no_retry_policy_runs_once() {
    let calls = AtomicU32::new(0);

    let result: Result<(), EmbedError> = RetryPolicy::no_retry()
        .run("embed", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EmbedError::Transient("timeout".to_string())) }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
