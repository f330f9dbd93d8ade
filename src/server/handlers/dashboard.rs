use axum::response::Html;

const DASHBOARD_HTML: &str = include_str!("../../../assets/dashboard.html");

/// GET / - the single-page dashboard. Each render gets a fresh cache-buster
/// so embedded worker UIs are not served from a stale browser cache.
pub async fn index() -> Html<String> {
    let token = uuid::Uuid::new_v4().simple().to_string();
    Html(DASHBOARD_HTML.replace("__CACHE_BUSTER__", &token[..8]))
}
