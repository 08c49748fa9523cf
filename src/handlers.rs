use axum::{
    body::Body,
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::canvas::{Canvas, Caller};
use crate::error::{CanvasError, Result};
use crate::health::HealthResponse;
use crate::key_generator::KeyStrategy;
use crate::response::{PixelResponse, PlacePixelRequest};

/// Shared application state
pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub canvas: Arc<Canvas>,
    pub keys: KeyStrategy,
    pub started: Instant,
}

impl AppState {
    pub fn new(canvas: Arc<Canvas>, keys: KeyStrategy) -> SharedState {
        Arc::new(Self {
            canvas,
            keys,
            started: Instant::now(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct PixelQuery {
    pub x: Option<String>,
    pub y: Option<String>,
}

/// Usage hint
pub async fn homepage(headers: HeaderMap) -> impl IntoResponse {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");

    format!(
        "Go to: http://{host}/canvas for the canvas.\n\n\
         For getting an individual pixel go to: http://{host}/pixel?x=0&y=0\n"
    )
}

/// Color of a single pixel
pub async fn get_pixel(
    State(state): State<SharedState>,
    Query(query): Query<PixelQuery>,
) -> Result<Json<PixelResponse>> {
    let x = parse_coordinate(query.x.as_deref(), "X")?;
    let y = parse_coordinate(query.y.as_deref(), "Y")?;

    let color = state.canvas.get_pixel(x, y)?;
    Ok(Json(color.into()))
}

/// Composed canvas as PNG
pub async fn get_canvas(State(state): State<SharedState>) -> Result<Response> {
    let canvas = Arc::clone(&state.canvas);
    let png = tokio::task::spawn_blocking(move || canvas.render_png())
        .await
        .map_err(|e| CanvasError::Internal(format!("render task failed: {}", e)))??;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/png")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(png))
        .map_err(|e| CanvasError::Internal(e.to_string()))?)
}

/// Place a pixel. Accepts `"x y r g b"` or a JSON object.
pub async fn place_pixel(
    State(state): State<SharedState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: String,
) -> Result<String> {
    let request = parse_place_request(&body)?;

    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let caller = Caller::Client(state.keys.client_key(&headers, peer));

    state
        .canvas
        .place_pixel(request.x, request.y, request.color(), &caller)?;
    Ok(request.placed_message())
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse::collect(&state.canvas, state.started)?))
}

fn parse_coordinate(raw: Option<&str>, axis: &str) -> Result<i64> {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .ok_or_else(|| CanvasError::InvalidRequest(format!("Location {} cannot be properly parsed.", axis)))
}

pub fn parse_place_request(body: &str) -> Result<PlacePixelRequest> {
    let body = body.trim();
    if body.starts_with('{') {
        return serde_json::from_str(body)
            .map_err(|e| CanvasError::InvalidRequest(format!("Invalid pixel JSON: {}", e)));
    }

    let fields: Vec<&str> = body.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(CanvasError::InvalidRequest(format!(
            "Expected 5 fields \"x y r g b\", got {}",
            fields.len()
        )));
    }

    let coord = |s: &str| {
        s.parse::<i64>()
            .map_err(|_| CanvasError::InvalidRequest(format!("Error parsing int input: {:?}", s)))
    };
    let channel = |s: &str| {
        s.parse::<u8>().map_err(|_| {
            CanvasError::InvalidRequest(format!("Color channel must be 0-255, got {:?}", s))
        })
    };

    Ok(PlacePixelRequest {
        x: coord(fields[0])?,
        y: coord(fields[1])?,
        r: channel(fields[2])?,
        g: channel(fields[3])?,
        b: channel(fields[4])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_body() {
        let req = parse_place_request("3 4 255 0 10\n").unwrap();
        assert_eq!(
            req,
            PlacePixelRequest {
                x: 3,
                y: 4,
                r: 255,
                g: 0,
                b: 10
            }
        );
    }

    #[test]
    fn test_parse_json_body() {
        let req = parse_place_request(r#"{"x": 1, "y": 2, "r": 3, "g": 4, "b": 5}"#).unwrap();
        assert_eq!(req.color(), crate::grid::Color::new(3, 4, 5));
        assert_eq!(req.placed_message(), "Pixel successfully placed at: 1,2");
    }

    #[test]
    fn test_parse_keeps_negative_coordinates_for_bounds_check() {
        let req = parse_place_request("-1 0 0 0 0").unwrap();
        assert_eq!(req.x, -1);
    }

    #[test]
    fn test_parse_rejects_bad_bodies() {
        for body in ["", "1 2 3 4", "1 2 3 4 5 6", "a 2 3 4 5", "1 2 256 0 0", "1 2 -1 0 0", "{\"x\": 1}"] {
            assert!(
                matches!(parse_place_request(body), Err(CanvasError::InvalidRequest(_))),
                "body {:?} should be rejected",
                body
            );
        }
    }

    #[test]
    fn test_parse_coordinate() {
        assert_eq!(parse_coordinate(Some(" 12 "), "X").unwrap(), 12);
        assert!(parse_coordinate(None, "X").is_err());
        assert!(parse_coordinate(Some("1.5"), "Y").is_err());
    }
}
