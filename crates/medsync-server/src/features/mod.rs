//! Feature slices of the Medsync API
//!
//! Each feature is a vertical slice:
//! - `commands/` - operations that run imports
//! - `queries/` - read-only views (catalogue, history)
//! - `routes.rs` - HTTP route definitions
//!
//! Command and query handlers are plain async functions taking the feature
//! state, so they are exercised directly in tests without an HTTP stack.

pub mod imports;

use axum::Router;

pub use imports::ImportState;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub imports: ImportState,
}

/// Creates the API router with all feature routes mounted
///
/// - `/imports` - Uploads, cloud syncs, source catalogue, run history
pub fn router(state: FeatureState) -> Router<()> {
    let max_upload_bytes = state.imports.max_upload_bytes;
    Router::new().nest(
        "/imports",
        imports::imports_routes(max_upload_bytes).with_state(state.imports),
    )
}
