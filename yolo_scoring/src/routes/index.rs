use crate::server::SharedState;
use axum::{extract::State, response::IntoResponse};

pub async fn greeting(State(state): State<SharedState>) -> impl IntoResponse {
    state.metrics.record_request("/");
    "Hello from Tiny YOLOv4 scoring on ONNX Runtime"
}
