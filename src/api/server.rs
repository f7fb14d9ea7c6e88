use crate::acme::Issuer;
use crate::api::routes;
use crate::config::Shared;
use crate::store::DynRecordStore;
use std::future::Future;

#[derive(Clone)]
pub(super) struct AppState {
    pub config: Shared,
    pub store: DynRecordStore,
    pub issuer: Issuer,
}

/// Serve the management API on [`Config::api_bind_addr`][crate::config::Config::api_bind_addr]
/// until `shutdown` resolves.
///
/// # Errors
///
/// The returned future fails if the address can't be bound or the server fails.
pub fn new(
    config: Shared,
    store: DynRecordStore,
    issuer: Issuer,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<impl Future<Output = hyper::Result<()>>, hyper::Error> {
    let server = axum::Server::try_bind(&config.api_bind_addr)?;
    Ok(server
        .serve(
            routes::new(AppState {
                config,
                store,
                issuer,
            })
            .into_make_service(),
        )
        .with_graceful_shutdown(shutdown))
}
