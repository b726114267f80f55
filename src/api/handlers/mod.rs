use std::sync::Arc;

use crate::config::Config;
use crate::services::{ExportPackager, TranslationService};

pub mod tables;
pub mod translation;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub translations: Arc<TranslationService>,
    pub exporter: Arc<ExportPackager>,
}
