//! Wiring of the HTTP service: shared services plus the merged router

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::analytics::{AnalyticsReader, ClickEventPipeline, ClientIpExtractor, GeoIpService};
use crate::api::{create_api_router, AppState};
use crate::auth::{AuthService, API_KEY_HEADER};
use crate::clock::Clock;
use crate::codegen::CodeGenerator;
use crate::config::Config;
use crate::redirect::{create_redirect_router, RedirectResolver, RedirectState};
use crate::registry::UrlRegistry;
use crate::storage::Storage;

/// Running services behind one router
pub struct App {
    pub router: Router,
    pub registry: Arc<UrlRegistry>,
    pub pipeline: Arc<ClickEventPipeline>,
}

impl App {
    /// Start the click pipeline and build the router.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(
        storage: Arc<dyn Storage>,
        geoip: Arc<GeoIpService>,
        clock: Arc<dyn Clock>,
        generator: CodeGenerator,
        config: &Config,
    ) -> Self {
        let registry = Arc::new(UrlRegistry::new(
            Arc::clone(&storage),
            generator,
            Arc::clone(&clock),
        ));
        let pipeline = Arc::new(ClickEventPipeline::start(
            Arc::clone(&storage),
            geoip,
            &config.analytics,
        ));

        let api_state = Arc::new(AppState {
            registry: Arc::clone(&registry),
            reader: AnalyticsReader::new(storage),
            public_base_url: config.public_base_url.clone(),
        });
        let redirect_state = Arc::new(RedirectState {
            resolver: RedirectResolver::new(Arc::clone(&registry), Arc::clone(&pipeline), clock),
            ip_extractor: ClientIpExtractor::from_config(&config.analytics),
        });
        let auth_service = Arc::new(AuthService::new(config.auth.api_keys.clone()));

        let router = Router::new()
            .merge(create_api_router(api_state, auth_service))
            .merge(create_redirect_router(redirect_state))
            .layer(cors_layer(&config.cors_allowed_origins))
            .layer(TraceLayer::new_for_http());

        Self {
            router,
            registry,
            pipeline,
        }
    }
}

/// Credentialed CORS for an explicit origin list
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(API_KEY_HEADER),
        ])
        .allow_credentials(true)
}
