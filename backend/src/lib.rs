pub mod chat;
pub mod config;
pub mod demo;
pub mod inference;
pub mod model;
pub mod preprocess;
pub mod routes;

use std::path::PathBuf;

use actix_web::web;

use chat::ChatProxy;
use config::Settings;
use inference::InferenceService;
use routes::PayloadLimit;

/// Everything the routes need, registered once per worker.
#[derive(Clone)]
pub struct AppState {
    pub inference: web::Data<InferenceService>,
    pub chat: web::Data<ChatProxy>,
    pub payload_limit: usize,
    pub static_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(inference: InferenceService, chat: ChatProxy, settings: &Settings) -> Self {
        Self {
            inference: web::Data::new(inference),
            chat: web::Data::new(chat),
            payload_limit: settings.max_payload_bytes,
            static_dir: settings.static_dir.clone(),
        }
    }

    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        cfg.app_data(self.inference.clone())
            .app_data(self.chat.clone())
            .app_data(web::Data::new(PayloadLimit(self.payload_limit)))
            .app_data(web::PayloadConfig::new(self.payload_limit));
        routes::configure_routes(cfg, self.static_dir.clone());
    }
}
