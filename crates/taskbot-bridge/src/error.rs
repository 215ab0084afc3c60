use std::any::Any;
use std::time::Duration;

/// Boxed error carried by [`BridgeError::Execution`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("execution context failed to start: {0}")]
    ContextInit(String),

    #[error("work item did not finish within {0:?}")]
    Timeout(Duration),

    #[error("work item failed: {0}")]
    Execution(#[source] BoxError),

    #[error("work item was cancelled before it resolved")]
    Cancelled,
}

impl BridgeError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ContextInit(_) => "context_init",
            Self::Timeout(_) => "timeout",
            Self::Execution(_) => "execution",
            Self::Cancelled => "cancelled",
        }
    }

    /// The work item's own error, if this is an `Execution` failure of type `E`.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Execution(source) => source.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// A work item panicked. Carries the panic message when it was a string.
#[derive(Debug, thiserror::Error)]
#[error("work item panicked: {message}")]
pub struct WorkPanicked {
    pub message: String,
}

impl WorkPanicked {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("quota exceeded")]
    struct QuotaExceeded;

    #[test]
    fn kinds() {
        assert_eq!(BridgeError::ContextInit("x".into()).kind(), "context_init");
        assert_eq!(BridgeError::Timeout(Duration::from_secs(1)).kind(), "timeout");
        assert_eq!(BridgeError::Execution(Box::new(QuotaExceeded)).kind(), "execution");
        assert_eq!(BridgeError::Cancelled.kind(), "cancelled");
    }

    #[test]
    fn execution_source_is_preserved() {
        let err = BridgeError::Execution(Box::new(QuotaExceeded));
        assert!(err.downcast_ref::<QuotaExceeded>().is_some());
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "work item failed: quota exceeded");
        assert!(BridgeError::Cancelled.downcast_ref::<QuotaExceeded>().is_none());
    }

    #[test]
    fn panic_payloads() {
        assert_eq!(WorkPanicked::from_payload(Box::new("static")).message, "static");
        assert_eq!(WorkPanicked::from_payload(Box::new(String::from("owned"))).message, "owned");
        assert_eq!(
            WorkPanicked::from_payload(Box::new(42u8)).message,
            "non-string panic payload"
        );
    }
}
