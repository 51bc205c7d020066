use anyhow::Context;
use axum::Router;
use storage::Database;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod error;
mod features;
mod middleware;
mod routes;
mod state;

use config::Config;
use middleware::auth::ApiKeys;
use state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        features::records::handlers::list_records,
        features::records::handlers::get_record,
        features::records::handlers::upload_fragment,
        features::records::handlers::merge_records,
        features::records::handlers::preview_merge,
        features::records::handlers::recompute_aggregates,
        features::records::handlers::set_disabled,
        features::records::handlers::assign_record,
        features::records::handlers::list_samples,
        features::records::handlers::batch_update,
        features::races::handlers::score_race,
        features::races::handlers::get_race_rankings,
        features::rankings::handlers::override_finish_status,
        features::competitions::handlers::get_leaderboard,
    ),
    components(
        schemas(
            storage::dto::record::TimeOffset,
            storage::dto::record::MergeRecordsRequest,
            storage::dto::record::RecomputeAggregatesRequest,
            storage::dto::record::NewSample,
            storage::dto::record::CreateFragmentRequest,
            storage::dto::record::ToggleRecordRequest,
            storage::dto::record::AssignRecordRequest,
            storage::dto::record::RecordOrderUpdate,
            storage::dto::record::BatchUpdateRecordsRequest,
            storage::dto::record::RecordResponse,
            storage::dto::record::MergePreviewResponse,
            storage::dto::race::ScoreRaceRequest,
            storage::dto::race::ScoreRaceResponse,
            storage::dto::race::RaceRankingsResponse,
            storage::dto::ranking::RaceRankingEntry,
            storage::dto::ranking::FinishStatusOverrideRequest,
            storage::dto::ranking::LeaderboardEntry,
            storage::dto::ranking::LeaderboardResponse,
            storage::services::aggregate::Aggregates,
            storage::services::merger::SourceSpan,
            storage::models::Record,
            storage::models::Sample,
            storage::models::Ranking,
            storage::models::FinishStatus,
        )
    ),
    tags(
        (name = "records", description = "Telemetry fragments and canonical records"),
        (name = "races", description = "Race scoring"),
        (name = "rankings", description = "Ranking adjustments"),
        (name = "competitions", description = "Competition leaderboards"),
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("API Key")
                        .build(),
                ),
            )
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("Starting race telemetry API");

    let config = Config::from_env().context("Failed to load API configuration")?;
    tracing::info!(
        activity_threshold_amps = config.activity_threshold_amps,
        guard_gap_ms = config.guard_gap_ms,
        "Configuration loaded successfully"
    );

    tracing::info!(
        "Connecting to database at: {}",
        config
            .database_url
            .split('@')
            .next_back()
            .unwrap_or("unknown")
    );
    let db = Database::new(&config.database_url)
        .await
        .context("Failed to initialize database")?;
    tracing::info!("Database connection established");

    tracing::info!("Running database migrations");
    db.run_migrations()
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Database migrations completed successfully");

    let api_keys = ApiKeys::from_comma_separated(&config.api_keys);
    if api_keys.is_empty() {
        tracing::warn!("API_KEYS is empty, every protected route will reject requests");
    }

    let state = AppState::new(db, config.engine_config());

    let app = Router::new()
        .nest("/api", routes::api_routes(api_keys))
        .with_state(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let bind_address = format!("{}:{}", config.host, config.port);
    tracing::info!("Starting server at http://{}", bind_address);
    tracing::info!(
        "Swagger UI available at http://{}/swagger-ui/",
        bind_address
    );

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
