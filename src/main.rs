use std::net::SocketAddr;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keygate::auth::SessionManager;
use keygate::cli;
use keygate::config;
use keygate::jobs;
use keygate::models::{CredentialKind, ScopedPermissions};
use keygate::store::postgres::PgStore;
use keygate::store::{self, CreateCredential, CredentialStore};
use keygate::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // OTLP export only when an endpoint is configured
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "keygate"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let json_logs = std::env::var("KEYGATE_LOG_FORMAT").is_ok_and(|v| v == "json");
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "keygate=debug,tower_http=debug".into()),
        ))
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer()))
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Key { command }) => {
            let url = cfg
                .database_url
                .clone()
                .context("DATABASE_URL must be set to manage credentials from the CLI")?;
            let db = PgStore::connect(&url).await?;
            db.migrate().await?;
            handle_key_command(&db, &cfg, command).await
        }
        Some(cli::Commands::Session { command }) => handle_session_command(&cfg, command),
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    let state = match cfg.database_url.clone() {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let db = PgStore::connect(&url).await?;

            tracing::info!("Running migrations...");
            db.migrate().await?;

            AppState::postgres(cfg, db)?
        }
        None => {
            tracing::warn!("DATABASE_URL not set, credentials are kept in memory only");
            AppState::in_memory(cfg)?
        }
    };

    jobs::cleanup::spawn(state.limiter.clone());
    tracing::info!("Background cleanup job started (rate limit windows every 60s)");

    let dashboard_origin = state.config.dashboard_origin.clone();
    let app = keygate::api::router(state)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer({
            use axum::http::{HeaderName, Method};
            use tower_http::cors::AllowOrigin;
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == dashboard_origin
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::DELETE,
                    Method::PATCH,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("authorization"),
                    HeaderName::from_static("x-admin-key"),
                    HeaderName::from_static("x-request-id"),
                ])
                .expose_headers([
                    HeaderName::from_static(keygate::errors::HEADER_LIMIT),
                    HeaderName::from_static(keygate::errors::HEADER_REMAINING),
                    HeaderName::from_static(keygate::errors::HEADER_RESET),
                ])
                .allow_credentials(true)
        })
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("keygate listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    // Responses may carry a freshly issued secret.
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");

    resp
}

async fn handle_key_command(
    db: &PgStore,
    cfg: &config::Config,
    cmd: cli::KeyCommands,
) -> anyhow::Result<()> {
    match cmd {
        cli::KeyCommands::Create {
            owner,
            name,
            kind,
            rate_limit,
            agents,
            tools,
            models,
            domains,
        } => {
            let kind = CredentialKind::from(kind);
            let permissions = match kind {
                CredentialKind::Scoped => Some(ScopedPermissions {
                    allowed_agents: agents,
                    allowed_tools: tools,
                    allowed_models: models,
                    allowed_domains: domains,
                }),
                CredentialKind::General => None,
            };

            let created = store::create_credential(
                db,
                &owner,
                CreateCredential {
                    name,
                    kind,
                    permissions,
                    rate_limit,
                },
                cfg.default_rate_limit,
            )
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;

            let c = &created.credential;
            println!("Credential created:");
            println!("  ID:         {}", c.id);
            println!("  Name:       {}", c.name);
            println!("  Type:       {}", c.kind);
            println!("  Rate limit: {}/min", c.rate_limit);
            println!("  Secret:     {}", created.secret.expose());
            println!();
            println!("Store the secret now. It cannot be shown again.");
        }
        cli::KeyCommands::List { owner } => {
            let creds = db.list_by_owner(&owner).await?;
            if creds.is_empty() {
                println!("No credentials found.");
            } else {
                println!(
                    "{:<38} {:<20} {:<8} {:<10} {:<8} {:<8}",
                    "ID", "NAME", "TYPE", "HINT", "RPM", "REVOKED"
                );
                for c in creds {
                    println!(
                        "{:<38} {:<20} {:<8} ...{:<7} {:<8} {:<8}",
                        c.id,
                        c.name,
                        c.kind,
                        c.hint,
                        c.rate_limit,
                        c.is_revoked()
                    );
                }
            }
        }
        cli::KeyCommands::Revoke { owner, id } => {
            let id = uuid::Uuid::parse_str(&id).context("Invalid credential ID")?;
            if db.revoke(id, &owner).await? {
                println!("Credential revoked.");
            } else {
                println!("Credential not found or already revoked.");
            }
        }
        cli::KeyCommands::Delete { owner, id } => {
            let id = uuid::Uuid::parse_str(&id).context("Invalid credential ID")?;
            if db.delete(id, &owner).await? {
                println!("Credential deleted.");
            } else {
                println!("Credential not found.");
            }
        }
    }
    Ok(())
}

fn handle_session_command(cfg: &config::Config, cmd: cli::SessionCommands) -> anyhow::Result<()> {
    match cmd {
        cli::SessionCommands::Issue { principal } => {
            let sessions = SessionManager::new(cfg.session_secret.as_bytes())?;
            let token = sessions.issue(&principal)?;
            println!("{}", token);
        }
    }
    Ok(())
}
