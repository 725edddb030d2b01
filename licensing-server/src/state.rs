use std::sync::Arc;

use licensing_core::store::sqlite::SqliteStore;
use licensing_core::Engine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine<SqliteStore>>,
}
