use std::path::PathBuf;

use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse, web};
use futures::{StreamExt, TryStreamExt};
use log::{error, info};
use serde::Serialize;
use shared::{ChatRequest, ChatResponse, HealthResponse, InferenceRequest, InferenceResponse};
use uuid::Uuid;

use crate::chat::{ChatError, ChatProxy, ChatReply};
use crate::inference::{InferenceError, InferenceService, decode_inline_image};

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, static_dir: Option<PathBuf>) {
    cfg.service(web::resource("/predict").route(web::post().to(predict)))
        .service(web::resource("/chat").route(web::post().to(chat)))
        .service(web::resource("/health").route(web::get().to(health)));

    if let Some(dir) = static_dir.filter(|dir| dir.is_dir()) {
        cfg.service(Files::new("/", dir).index_file("index.html"));
    }
}

async fn predict(
    req: HttpRequest,
    payload: web::Payload,
    service: web::Data<InferenceService>,
    limits: web::Data<PayloadLimit>,
) -> HttpResponse {
    let request_id = Uuid::new_v4();

    let image = match extract_image(&req, payload, limits.0).await {
        Ok(image) => image,
        Err(e) => return inference_error_response(request_id, e),
    };

    match service.predict(image).await {
        Ok(prediction) => {
            info!(
                "[{}] {} ({:.2}%){}",
                request_id,
                prediction.result.prediction,
                prediction.result.confidence,
                if prediction.demo { " [demo]" } else { "" }
            );
            HttpResponse::Ok().json(InferenceResponse {
                success: true,
                demo_mode: prediction.demo.then_some(true),
                result: prediction.result,
            })
        }
        Err(e) => inference_error_response(request_id, e),
    }
}

fn inference_error_response(request_id: Uuid, e: InferenceError) -> HttpResponse {
    let status = e.status_code();
    if status.is_client_error() {
        info!("[{}] rejected: {}", request_id, e);
    } else {
        error!("[{}] prediction failed: {}", request_id, e);
    }
    HttpResponse::build(status).json(ErrorResponse {
        error: e.to_string(),
    })
}

/// Upper bound on request bodies, shared by the multipart and JSON paths.
#[derive(Debug, Clone, Copy)]
pub struct PayloadLimit(pub usize);

fn is_multipart(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"))
}

/// Multipart `image` field first, then a JSON `image` string.
async fn extract_image(
    req: &HttpRequest,
    mut payload: web::Payload,
    limit: usize,
) -> Result<Vec<u8>, InferenceError> {
    if is_multipart(req) {
        let multipart = Multipart::new(req.headers(), payload);
        if let Some(upload) = read_upload(multipart, limit).await? {
            return Ok(upload);
        }
        return Err(InferenceError::NoImageProvided);
    }

    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| InferenceError::Upload(e.to_string()))?;
        if body.len() + chunk.len() > limit {
            return Err(InferenceError::PayloadTooLarge(limit));
        }
        body.extend_from_slice(&chunk);
    }

    let request: InferenceRequest = serde_json::from_slice(&body).unwrap_or_default();
    match request.image {
        Some(encoded) => decode_inline_image(&encoded),
        None => Err(InferenceError::NoImageProvided),
    }
}

/// Returns the bytes of the `image` field, or `None` if the form has none.
async fn read_upload(mut multipart: Multipart, limit: usize) -> Result<Option<Vec<u8>>, InferenceError> {
    while let Some(mut field) = multipart
        .try_next()
        .await
        .map_err(|e| InferenceError::Upload(e.to_string()))?
    {
        if field.name() != Some("image") {
            while let Some(chunk) = field.next().await {
                chunk.map_err(|e| InferenceError::Upload(e.to_string()))?;
            }
            continue;
        }

        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or_default();
        if filename.is_empty() {
            return Err(InferenceError::NoImageSelected);
        }

        let mut image_data = Vec::new();
        while let Some(chunk) = field.next().await {
            let data = chunk.map_err(|e| InferenceError::Upload(e.to_string()))?;
            if image_data.len() + data.len() > limit {
                return Err(InferenceError::PayloadTooLarge(limit));
            }
            image_data.extend_from_slice(&data);
        }
        return Ok(Some(image_data));
    }
    Ok(None)
}

/// Always 200 except for an empty message; failures travel in the body.
async fn chat(body: web::Bytes, proxy: web::Data<ChatProxy>) -> HttpResponse {
    let result = match serde_json::from_slice::<ChatRequest>(&body) {
        Ok(request) => proxy.ask(&request.message).await,
        Err(e) => {
            error!("Unreadable chat request: {}", e);
            Err(ChatError::from(e))
        }
    };

    match result {
        Err(ChatError::EmptyMessage) => HttpResponse::BadRequest().json(ErrorResponse {
            error: ChatError::EmptyMessage.to_string(),
        }),
        result => HttpResponse::Ok().json(ChatResponse::from(ChatReply::from(result))),
    }
}

async fn health(service: web::Data<InferenceService>, proxy: web::Data<ChatProxy>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        demo_mode: service.demo_mode(),
        model_loaded: service.model_loaded(),
        chatbot_configured: proxy.is_configured(),
    })
}
