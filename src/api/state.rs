use std::sync::Arc;

use crate::api::telegram::TelegramClient;
use crate::services::commands::CommandRegistry;
use crate::services::query::QueryFacade;

#[derive(Clone)]
pub struct AppState {
    pub query: QueryFacade,
    pub commands: Arc<CommandRegistry>,
    /// Replies are only sent when a bot token is configured.
    pub telegram: Option<Arc<TelegramClient>>,
}
