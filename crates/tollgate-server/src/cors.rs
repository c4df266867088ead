use http::{Method, header};
use tollgate_config::CorsConfig;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Build a Tower CORS layer from configuration
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let mut layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, tollgate_core::REQUEST_ID_HEADER])
        .expose_headers([tollgate_core::REQUEST_ID_HEADER]);

    // Origins
    layer = if config.allows_any_origin() && !config.credentials {
        layer.allow_origin(AllowOrigin::any())
    } else {
        let origins: Vec<_> = config
            .origins
            .iter()
            .filter(|o| *o != "*")
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(origins)
    };

    // Credentials
    if config.credentials {
        layer = layer.allow_credentials(true);
    }

    // Max age
    if let Some(duration) = config.max_age_duration() {
        layer = layer.max_age(duration);
    }

    layer
}
