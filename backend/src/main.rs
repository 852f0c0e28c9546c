use actix_cors::Cors;
use actix_web::{App, HttpServer};
use log::{error, info, warn};
use neuroscan::AppState;
use neuroscan::chat::ChatProxy;
use neuroscan::config::Settings;
use neuroscan::inference::InferenceService;
use neuroscan::model::{ArtifactPaths, ModelLoader};
use std::env;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        info!("Current working directory: {}", current_dir.display());
    }

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()));
        }
    };

    let loader = Arc::new(ModelLoader::with_default_runtimes(ArtifactPaths::new(
        &settings.converted_model_path,
        &settings.model_path,
    )));

    let mut demo_mode = settings.demo_mode;
    if demo_mode {
        warn!("Running in DEMO MODE: predictions are simulated. Set DEMO_MODE=false to use the real model");
    } else if let Err(e) = loader.load() {
        if e.no_runtime_available() {
            warn!("No model runtime is compiled in or installed. Switching to DEMO mode");
        } else {
            error!("Model loading failed. Switching to DEMO mode: {}", e);
        }
        warn!("{}", e.guidance());
        demo_mode = true;
    }

    let chat = ChatProxy::from_settings(&settings);
    if !settings.chatbot_configured() {
        warn!("OPENROUTER_API_KEY is not set; the chatbot will answer with a setup notice");
    }

    let inference = InferenceService::new(loader, demo_mode, settings.demo_latency());
    let state = AppState::new(inference, chat, &settings);

    let bind_address = settings.bind_address();
    info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .configure(|cfg| state.configure(cfg))
    })
    .bind(&bind_address)?
    .run()
    .await
}
