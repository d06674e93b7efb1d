use std::sync::Arc;

use async_trait::async_trait;

use crate::agent_engine::context::SurfaceId;
use crate::errors::WebClawResult;

/// Opaque handle to an attached automation channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentHandle {
    pub surface: SurfaceId,
    /// Implementation-defined session token.
    pub session: String,
}

/// Attaches to and detaches from the surface the agent drives.
#[async_trait]
pub trait Environment: Send + Sync {
    /// The surface a new run should act on.
    async fn active_surface(&self) -> WebClawResult<SurfaceId>;

    async fn acquire(&self, surface: &SurfaceId) -> WebClawResult<EnvironmentHandle>;

    async fn release(&self, handle: EnvironmentHandle) -> WebClawResult<()>;

    /// Turns off anything that would interfere with automation for the run.
    async fn disable_interfering_capabilities(&self) -> WebClawResult<()>;

    async fn restore_capabilities(&self) -> WebClawResult<()>;
}

/// An acquired environment that is released exactly once.
///
/// Call [`EnvironmentLease::release`] on every exit path. If the lease is
/// dropped without it (the run future was cancelled), release is spawned
/// onto the current runtime instead.
pub struct EnvironmentLease {
    env: Arc<dyn Environment>,
    handle: Option<EnvironmentHandle>,
    capabilities_disabled: bool,
}

impl EnvironmentLease {
    pub async fn acquire(env: Arc<dyn Environment>, surface: &SurfaceId) -> WebClawResult<Self> {
        tracing::info!(surface = %surface, "attaching environment");
        let handle = env.acquire(surface).await?;
        Ok(Self {
            env,
            handle: Some(handle),
            capabilities_disabled: false,
        })
    }

    pub fn handle(&self) -> Option<&EnvironmentHandle> {
        self.handle.as_ref()
    }

    pub async fn disable_capabilities(&mut self) -> WebClawResult<()> {
        // Set first: a partial failure still needs restoring.
        self.capabilities_disabled = true;
        self.env.disable_interfering_capabilities().await
    }

    /// Release failures are logged, never propagated: the run outcome stands.
    pub async fn release(mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        release_all(self.env.clone(), handle, self.capabilities_disabled).await;
    }
}

async fn release_all(env: Arc<dyn Environment>, handle: EnvironmentHandle, restore: bool) {
    let surface = handle.surface.clone();
    if let Err(e) = env.release(handle).await {
        tracing::error!(surface = %surface, error = %e, "environment release failed");
    } else {
        tracing::info!(surface = %surface, "environment released");
    }
    if restore {
        if let Err(e) = env.restore_capabilities().await {
            tracing::error!(error = %e, "restoring capabilities failed");
        }
    }
}

impl Drop for EnvironmentLease {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        tracing::warn!(surface = %handle.surface, "environment lease dropped without release");
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(release_all(
                    self.env.clone(),
                    handle,
                    self.capabilities_disabled,
                ));
            }
            Err(_) => {
                tracing::error!("no runtime to release environment on");
            }
        }
    }
}
