use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FullscreenError {
    #[error("fullscreen is not supported")]
    NotSupported,

    #[error("fullscreen permission denied")]
    PermissionDenied,

    #[error("fullscreen request failed: {0}")]
    Other(String),
}

/// Platform hook for immersive mode.
#[async_trait]
pub trait FullscreenBackend: Send + Sync {
    fn is_supported(&self) -> bool;

    /// `target` names the element to enlarge; `None` means the whole surface.
    async fn request(&self, target: Option<&str>) -> Result<(), FullscreenError>;

    async fn exit(&self) -> Result<(), FullscreenError>;
}

/// Backend for surfaces with no immersive mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessFullscreen;

#[async_trait]
impl FullscreenBackend for HeadlessFullscreen {
    fn is_supported(&self) -> bool {
        false
    }

    async fn request(&self, _target: Option<&str>) -> Result<(), FullscreenError> {
        Err(FullscreenError::NotSupported)
    }

    async fn exit(&self) -> Result<(), FullscreenError> {
        Ok(())
    }
}

pub struct FullscreenGuard {
    backend: Arc<dyn FullscreenBackend>,
    active: AtomicBool,
}

impl FullscreenGuard {
    pub fn new(backend: Arc<dyn FullscreenBackend>) -> Self {
        Self {
            backend,
            active: AtomicBool::new(false),
        }
    }

    pub fn headless() -> Self {
        Self::new(Arc::new(HeadlessFullscreen))
    }

    pub fn is_supported(&self) -> bool {
        self.backend.is_supported()
    }

    pub fn is_fullscreen(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn enter_fullscreen(&self, target: Option<&str>) -> Result<(), FullscreenError> {
        if !self.backend.is_supported() {
            return Err(FullscreenError::NotSupported);
        }
        self.backend.request(target).await?;
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Failures are logged, never returned.
    pub async fn exit_fullscreen(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.backend.exit().await {
            tracing::warn!("Failed to exit fullscreen: {}", e);
        }
    }

    /// The platform left fullscreen on its own (e.g. the user pressed Esc).
    pub fn mark_exited(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct DenyingBackend;

    #[async_trait]
    impl FullscreenBackend for DenyingBackend {
        fn is_supported(&self) -> bool {
            true
        }

        async fn request(&self, _target: Option<&str>) -> Result<(), FullscreenError> {
            Err(FullscreenError::PermissionDenied)
        }

        async fn exit(&self) -> Result<(), FullscreenError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingBackend {
        exits: AtomicUsize,
    }

    #[async_trait]
    impl FullscreenBackend for CountingBackend {
        fn is_supported(&self) -> bool {
            true
        }

        async fn request(&self, _target: Option<&str>) -> Result<(), FullscreenError> {
            Ok(())
        }

        async fn exit(&self) -> Result<(), FullscreenError> {
            self.exits.fetch_add(1, Ordering::SeqCst);
            Err(FullscreenError::Other("already left".into()))
        }
    }

    #[tokio::test]
    async fn test_headless_is_not_supported() {
        let guard = FullscreenGuard::headless();
        assert!(!guard.is_supported());
        assert_eq!(
            guard.enter_fullscreen(None).await,
            Err(FullscreenError::NotSupported)
        );
        assert!(!guard.is_fullscreen());
    }

    #[tokio::test]
    async fn test_permission_denied_leaves_state_untouched() {
        let guard = FullscreenGuard::new(Arc::new(DenyingBackend));
        assert_eq!(
            guard.enter_fullscreen(Some("quiz")).await,
            Err(FullscreenError::PermissionDenied)
        );
        assert!(!guard.is_fullscreen());
    }

    #[tokio::test]
    async fn test_exit_swallows_errors_and_runs_once() {
        let backend = Arc::new(CountingBackend::default());
        let guard = FullscreenGuard::new(backend.clone());

        guard.enter_fullscreen(None).await.unwrap();
        assert!(guard.is_fullscreen());

        guard.exit_fullscreen().await;
        guard.exit_fullscreen().await;

        assert!(!guard.is_fullscreen());
        assert_eq!(backend.exits.load(Ordering::SeqCst), 1);
    }
}
