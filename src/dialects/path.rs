//! Object/file naming for buffered dialects.

use chrono::Utc;
use uuid::Uuid;

/// Replace `{date}` with today's UTC date (`YYYY-MM-DD`).
pub fn resolve_path(base: &str) -> String {
    if base.contains("{date}") {
        base.replace("{date}", &Utc::now().format("%Y-%m-%d").to_string())
    } else {
        base.to_string()
    }
}

/// A fresh, collision-free name under `base`: `<unix ts>-<uuid>.<extension>`.
pub fn random_path(base: &str, extension: &str) -> String {
    let file_name = format!(
        "{}-{}.{extension}",
        Utc::now().timestamp(),
        Uuid::new_v4().simple()
    );
    let dir = resolve_path(base);
    if dir.is_empty() {
        file_name
    } else {
        format!("{}/{file_name}", dir.trim_end_matches('/'))
    }
}
