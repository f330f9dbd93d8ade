use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};

use super::super::AppState;

// 비즈니스 에러도 항상 200 + {"status": "error"} 로 응답 (대시보드 호환)

/// GET /start/:id
pub async fn start_handler(Path(id): Path<String>, State(state): State<AppState>) -> impl IntoResponse {
    Json(state.control.start(&id).await)
}

/// GET /stop/:id
pub async fn stop_handler(Path(id): Path<String>, State(state): State<AppState>) -> impl IntoResponse {
    Json(state.control.stop(&id).await)
}

/// GET /restart/:id
pub async fn restart_handler(Path(id): Path<String>, State(state): State<AppState>) -> impl IntoResponse {
    Json(state.control.restart(&id).await)
}

/// GET /status/:id
pub async fn status_handler(Path(id): Path<String>, State(state): State<AppState>) -> impl IntoResponse {
    Json(state.control.status(&id))
}

/// GET /instances - 대시보드가 선택 버튼과 iframe 을 그리는 데 사용
pub async fn list_instances(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.control.instances())
}
