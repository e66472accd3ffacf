//! The contract every plugin implements.

use async_trait::async_trait;

use crate::api::hooks::HookApi;

/// A plugin's code module.
///
/// `setup` is where a plugin makes all of its registrations: subscriptions,
/// cron tasks, service lookups. It receives its own [`HookApi`], bound to the
/// plugin's identity, and may keep a clone of it for later use from handlers.
/// An error returned from `setup` keeps the plugin out of the loaded set.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Register the plugin's subscriptions and tasks.
    async fn setup(&self, hooks: HookApi) -> anyhow::Result<()>;

    /// Release anything the plugin holds. Called once at host shutdown.
    async fn teardown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
