//! Role matrix published to clients.

use axum::Json;

use crate::permissions::PermissionTable;

/// Current role to permission table, with its version.
pub async fn handler() -> Json<PermissionTable> {
    Json(PermissionTable::current())
}
