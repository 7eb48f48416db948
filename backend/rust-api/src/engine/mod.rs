//! Client-side quiz session engine: the store, the countdown, proctoring aids
//! and the controller that ties them to one quiz page.

pub mod api;
pub mod controller;
pub mod countdown;
pub mod fullscreen;
pub mod loader;
pub mod reconcile;
pub mod store;
pub mod visibility;

pub use api::{HttpQuizApi, QuizApi};
pub use controller::{
    ControllerEvent, ControllerPhase, ControllerView, EngineConfig, Navigation,
    ProctoringWarning, SessionController,
};
pub use countdown::{CountdownTimer, TimerSnapshot};
pub use fullscreen::{FullscreenBackend, FullscreenError, FullscreenGuard, HeadlessFullscreen};
pub use loader::{load_with_retry, LoadOutcome};
pub use store::SessionStore;
pub use visibility::{VisibilityMonitor, VisibilitySubscription};
