//! Renderer error types

use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendError;

/// Errors reported by the frame scheduler, clustering and the engine.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Device lost; no further frames can be scheduled")]
    DeviceLost,
    #[error("Timed out after {timeout:?} waiting for fence value {value} (completed {completed})")]
    FenceTimeout {
        value: u64,
        completed: u64,
        timeout: Duration,
    },
    #[error("Invalid frame state: {0}")]
    InvalidFrameState(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Uniform region overflow: {len} bytes written into a {capacity} byte region")]
    RegionOverflow { len: usize, capacity: usize },
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),
}

impl RenderError {
    /// Whether this error leaves the device unusable.
    pub fn is_device_lost(&self) -> bool {
        matches!(
            self,
            RenderError::DeviceLost
                | RenderError::FenceTimeout { .. }
                | RenderError::Backend(BackendError::DeviceLost)
        )
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_converts() {
        let err: RenderError = BackendError::PresentFailed("swap chain occluded".into()).into();
        assert!(matches!(err, RenderError::Backend(BackendError::PresentFailed(_))));
        assert!(!err.is_device_lost());
    }

    #[test]
    fn test_device_lost_classification() {
        assert!(RenderError::DeviceLost.is_device_lost());
        assert!(RenderError::from(BackendError::DeviceLost).is_device_lost());
        let timeout = RenderError::FenceTimeout {
            value: 3,
            completed: 1,
            timeout: Duration::from_millis(5),
        };
        assert!(timeout.is_device_lost());
        assert!(timeout.to_string().contains("fence value 3"));
    }
}
