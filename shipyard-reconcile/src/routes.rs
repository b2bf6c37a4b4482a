use tracing::{debug, info};

use crate::error::ReconcileError;
use crate::upstream::RouteRegistry;

/// Create the route for `service` unless one already exists. Returns whether
/// a route was created.
pub async fn ensure_route(
    routes: &dyn RouteRegistry,
    service: &str,
    prefix: &str,
) -> Result<bool, ReconcileError> {
    if routes.route_exists(service).await? {
        debug!(service, "route already present");
        return Ok(false);
    }
    routes.create_route(service, prefix).await?;
    info!(service, prefix, "route created");
    Ok(true)
}
