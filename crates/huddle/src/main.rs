use std::process::ExitCode;
use std::sync::Arc;

use huddle::console::{Console, guest_user};
use huddle::settings::SettingsStore;
use huddle_api::{Backend, LoopbackBackend, LoopbackUser, ensure_supported_backend};
use huddle_feed::{ConversationPanel, spawn_session};

/// Conversations seeded into the loopback backend so there is history to page through.
const DEMO_CONVERSATIONS: [(u64, usize); 2] = [(1, 45), (2, 6)];

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let store = SettingsStore::load();
    let settings = store.settings();
    if let Err(error) = ensure_supported_backend(&settings.backend_id) {
        tracing::error!(%error, "cannot start feed session");
        return ExitCode::FAILURE;
    }

    let backend = Arc::new(LoopbackBackend::new(LoopbackUser::new(
        settings.current_user_id,
        settings.current_user_name.clone(),
    )));
    for (parent_id, count) in DEMO_CONVERSATIONS {
        backend.seed_history(parent_id, &guest_user(), count);
    }

    let panel = ConversationPanel::new(
        settings.to_panel_config(),
        settings.user_id(),
        Arc::new(settings.authorizer()),
    );
    let session_backend: Arc<dyn Backend> = backend.clone();
    let (handle, task) = spawn_session(session_backend, panel);

    tracing::info!(
        backend_id = %settings.backend_id,
        user_id = settings.current_user_id,
        "huddle console started"
    );

    let console = Console::new(handle, Arc::clone(&backend), store);
    let result = console.run().await;
    if let Err(error) = task.await {
        tracing::warn!(%error, "feed session task ended abnormally");
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "console stopped");
            ExitCode::FAILURE
        }
    }
}
