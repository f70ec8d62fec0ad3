use anyhow::Context as _;
use bytes::Bytes;
use clap::Parser;
use http::{header, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower::{Layer, ServiceExt};
use tracing::{debug, error, info, warn};

use etag_tracker::config::{self, Config, Sources};
use etag_tracker::metrics::Metrics;
use etag_tracker::{
    logging, Epoch, ProviderRegistry, ProviderResolver, RequestHandler, RouteTable, SourceProvider,
    SqliteSource, TagCodec, TrackLayer, TrackOptions,
};

#[derive(Parser, Debug)]
#[command(name = "etag-tracker")]
#[command(about = "Serves a small roles API with ETags derived from tracked SQLite tables", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (YAML/JSON/TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run the demo server (default)
    Serve,
    /// Validate configuration and print the resolved sources and routes
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logging::init(args.debug, args.json_logs)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            config::load_from_path(path)
                .await
                .with_context(|| format!("failed to load {}", path.display()))?
        }
        None => {
            info!("Loading configuration from default locations");
            config::load_from_env_or_file()
                .await
                .context("failed to load configuration")?
        }
    };

    match args.command.unwrap_or(Command::Serve) {
        Command::Check => check(&config),
        Command::Serve => serve(config).await,
    }
}

fn check(config: &Config) -> anyhow::Result<()> {
    let routes = config::build_routes(config)?;
    println!("Configuration OK");
    println!("  listen: {}", config.listen_addr());
    println!(
        "  epoch:  {}",
        config.epoch.as_deref().unwrap_or("<executable timestamp>")
    );
    for source in &config.sources {
        println!("  source {} tracking {:?}", source.id(), source.tables());
    }
    for route in &config.routes {
        println!("  route {} -> {:?}", route.path, route.tables);
    }
    println!("  {} tracked route(s)", routes.len());
    Ok(())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    let (registry, db) = open_demo_sources(&config, &shutdown).await?;
    let routes = if config.routes.is_empty() {
        RouteTable::builder()
            .route("/roles", TrackOptions::builder().key("roles").build()?)
            .build()?
    } else {
        config::build_routes(&config)?
    };

    let epoch = Epoch::detect(config.epoch.as_deref())?;
    info!(epoch = %epoch, "Tag epoch selected");

    let metrics = Arc::new(Metrics::new());
    let handler = Arc::new(
        RequestHandler::new(
            TagCodec::new(epoch),
            ProviderResolver::new(Arc::new(registry)),
        )
        .with_metrics(Arc::clone(&metrics)),
    );
    let track = TrackLayer::new(handler, Arc::new(routes));

    let app = App { db, metrics };
    let listener = TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr()))?;
    info!("Listening on http://{}", config.listen_addr());

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                shutdown.cancel();
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                };

                let cancel = shutdown.child_token();
                let app = app.clone();
                let service = track
                    .layer(tower::service_fn(move |request: Request<Incoming>| {
                        app.clone().route(request)
                    }))
                    .map_request({
                        let cancel = cancel.clone();
                        move |mut request: Request<Incoming>| {
                            request.extensions_mut().insert(cancel.clone());
                            request
                        }
                    });

                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let connection = http1::Builder::new()
                        .serve_connection(io, TowerToHyperService::new(service));
                    if let Err(e) = connection.await {
                        debug!(peer = %peer, "Connection closed with error: {}", e);
                    }
                    cancel.cancel();
                });
            }
        }
    }

    Ok(())
}

/// Opens configured sources, or a seeded in-memory database when none are
/// configured, and returns the SQLite source backing the roles API.
async fn open_demo_sources(
    config: &Config,
    cancel: &CancellationToken,
) -> anyhow::Result<(ProviderRegistry, Arc<SqliteSource>)> {
    if config.sources.is_empty() {
        let db = Arc::new(SqliteSource::open_in_memory("demo")?);
        prepare_roles(&db, cancel).await?;
        let registry = ProviderRegistry::builder()
            .register(Arc::clone(&db) as Arc<dyn SourceProvider>)
            .build()?;
        return Ok((registry, db));
    }

    let Sources {
        registry, sqlite, ..
    } = config::open_sources(config, cancel).await?;
    let db = first_sqlite(config, &sqlite)
        .context("the roles API needs at least one sqlite source")?;
    prepare_roles(&db, cancel).await?;
    Ok((registry, db))
}

fn first_sqlite(
    config: &Config,
    sqlite: &HashMap<String, Arc<SqliteSource>>,
) -> Option<Arc<SqliteSource>> {
    config
        .sources
        .iter()
        .find_map(|source| sqlite.get(source.id()).cloned())
}

async fn prepare_roles(db: &SqliteSource, cancel: &CancellationToken) -> anyhow::Result<()> {
    db.with_connection(cancel, |conn| {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS roles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );
            INSERT OR IGNORE INTO roles (name) VALUES ('admin'), ('editor'), ('viewer');",
        )?;
        Ok(())
    })
    .await?;
    db.enable_tracking("roles", cancel).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct Role {
    id: i64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct NewRole {
    name: String,
}

#[derive(Clone)]
struct App {
    db: Arc<SqliteSource>,
    metrics: Arc<Metrics>,
}

impl App {
    async fn route(self, request: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
        let cancel = request
            .extensions()
            .get::<CancellationToken>()
            .cloned()
            .unwrap_or_default();

        let result = match (request.method(), request.uri().path()) {
            (&Method::GET, "/roles") => self.list_roles(&cancel).await,
            (&Method::POST, "/roles") => self.create_role(request, &cancel).await,
            (&Method::GET, "/metrics") => self.metrics_text(),
            _ => Ok(text(StatusCode::NOT_FOUND, "not found\n")),
        };

        Ok(result.unwrap_or_else(|e| {
            error!("Request failed: {:#}", e);
            text(StatusCode::INTERNAL_SERVER_ERROR, "internal error\n")
        }))
    }

    async fn list_roles(&self, cancel: &CancellationToken) -> anyhow::Result<Response<Full<Bytes>>> {
        let roles = self
            .db
            .with_connection(cancel, |conn| {
                let mut stmt = conn.prepare_cached("SELECT id, name FROM roles ORDER BY id")?;
                let roles = stmt
                    .query_map([], |row| {
                        Ok(Role {
                            id: row.get(0)?,
                            name: row.get(1)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(roles)
            })
            .await?;

        json(StatusCode::OK, &roles)
    }

    async fn create_role(
        &self,
        request: Request<Incoming>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Response<Full<Bytes>>> {
        let body = request.into_body().collect().await?.to_bytes();
        let new_role: NewRole = match serde_json::from_slice(&body) {
            Ok(role) => role,
            Err(e) => return Ok(text(StatusCode::BAD_REQUEST, &format!("{}\n", e))),
        };

        let role = self
            .db
            .with_connection(cancel, move |conn| {
                conn.execute("INSERT INTO roles (name) VALUES (?1)", [&new_role.name])?;
                Ok(Role {
                    id: conn.last_insert_rowid(),
                    name: new_role.name,
                })
            })
            .await?;

        info!(role = %role.name, "Role created");
        json(StatusCode::CREATED, &role)
    }

    fn metrics_text(&self) -> anyhow::Result<Response<Full<Bytes>>> {
        let body = self.metrics.gather_text()?;
        Ok(Response::builder()
            .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
            .body(Full::new(Bytes::from(body)))?)
    }
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> anyhow::Result<Response<Full<Bytes>>> {
    let body = serde_json::to_vec(value)?;
    Ok(Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))?)
}

fn text(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, header::HeaderValue::from_static("text/plain"));
    response
}
