use std::sync::Arc;

use flowmail_core::{AccountDirectory, Lifecycle, TemplateStore};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub lifecycle: Lifecycle,
    pub templates: Arc<dyn TemplateStore>,
    /// Backend label reported by `/health`.
    pub storage: &'static str,
}

impl AppStateInner {
    pub fn new(lifecycle: Lifecycle, templates: Arc<dyn TemplateStore>, storage: &'static str) -> AppState {
        Arc::new(Self {
            lifecycle,
            templates,
            storage,
        })
    }

    pub fn accounts(&self) -> &Arc<dyn AccountDirectory> {
        self.lifecycle.dispatcher().accounts()
    }
}
