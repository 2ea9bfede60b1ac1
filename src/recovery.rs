//! Panic containment for agent stream draining.
//!
//! A panic while decoding or handling a stream event must not take down a
//! multi-hour unattended campaign. The panic is captured, logged, and turned
//! into an `Agent` error, which the session adapter then classifies like any
//! other stream failure.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use crate::types::{Error, Result};

/// Run a future, converting a panic into `Error::Agent`.
pub async fn with_recovery_async<Fut, T>(operation: Fut, operation_name: &str) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(operation).catch_unwind().await {
        Ok(result) => result,
        Err(panic_payload) => {
            let panic_msg = extract_panic_message(panic_payload.as_ref());
            tracing::error!(
                operation = operation_name,
                panic = %panic_msg,
                "panic recovered"
            );
            Err(Error::agent(format!("panic in {operation_name}: {panic_msg}")))
        }
    }
}

/// Extract the message from a panic payload.
pub(crate) fn extract_panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic (no message)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success_passes_through() {
        let result = with_recovery_async(async { Ok(42) }, "drain").await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_error_preserved() {
        let result: Result<()> =
            with_recovery_async(async { Err(Error::agent("specific failure")) }, "drain").await;
        assert!(result.unwrap_err().to_string().contains("specific failure"));
    }

    fn explode() -> Result<()> {
        panic!("{}", "decoder exploded");
    }

    #[tokio::test]
    async fn test_panic_becomes_agent_error() {
        let result = with_recovery_async(async { explode() }, "drain").await;
        let err = result.unwrap_err();
        assert!(matches!(err, Error::Agent(_)));
        let msg = err.to_string();
        assert!(msg.contains("panic in drain"));
        assert!(msg.contains("decoder exploded"));
    }

    #[test]
    fn test_extract_panic_message_str() {
        let payload = std::panic::catch_unwind(|| {
            panic!("static message");
        })
        .unwrap_err();
        assert_eq!(extract_panic_message(payload.as_ref()), "static message");
    }
}
