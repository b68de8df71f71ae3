/// Health check endpoint handler
pub async fn health() -> &'static str {
    "OK"
}
