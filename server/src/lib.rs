#![deny(
    asm_sub_register,
    deprecated,
    missing_abi,
    unsafe_code,
    unused_macros,
    unused_must_use,
    unused_unsafe
)]
#![deny(clippy::from_over_into, clippy::needless_question_mark)]
#![cfg_attr(
    not(debug_assertions),
    deny(unused_imports, unused_mut, unused_variables,)
)]

pub mod access;
pub mod adapters;
mod api;
pub mod config;
pub mod container;
pub mod database;
mod error;
pub mod gc;
mod middleware;
pub mod model;
mod readonly;
mod storage;
pub mod tree;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{extract::Extension, http::uri::Scheme, http::Uri, Router};
use sea_orm::{query::Statement, ConnectionTrait, Database, DatabaseConnection};
use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use tokio::time;
use tower_http::catch_panic::CatchPanicLayer;

use access::http::{apply_auth, AuthState};
use config::{Config, StorageConfig};
use container::manifest::ManifestRegistry;
use database::migration::{Migrator, MigratorTrait};
use error::{ServerError, ServerResult};
use middleware::{init_request_state, restrict_host};
use readonly::ReadOnlyGate;
use storage::{ContentStore, LocalBackend, Regulator, StorageDriver};

type State = Arc<StateInner>;
type RequestState = Arc<RequestStateInner>;

/// Global server state.
pub struct StateInner {
    /// The Depot Server configuration.
    pub(crate) config: Config,

    /// Handle to the database.
    database: OnceCell<DatabaseConnection>,

    /// Handle to the content store.
    store: OnceCell<Arc<ContentStore>>,

    /// Manifest media-type registry.
    pub(crate) manifests: ManifestRegistry,

    /// Container read-only gate.
    pub(crate) readonly: ReadOnlyGate,
}

/// Request state.
struct RequestStateInner {
    /// Auth state.
    pub(crate) auth: AuthState,

    /// The canonical API endpoint.
    pub(crate) api_endpoint: Option<String>,

    /// The potentially-invalid Host header supplied by the client.
    pub(crate) host: String,

    /// Whether the client claims the connection is HTTPS or not.
    pub(crate) client_claims_https: bool,
}

impl StateInner {
    pub(crate) async fn new(config: Config) -> State {
        Arc::new(Self {
            config,
            database: OnceCell::new(),
            store: OnceCell::new(),
            manifests: ManifestRegistry::with_defaults(),
            readonly: ReadOnlyGate::new(),
        })
    }

    /// Returns a handle to the database.
    pub(crate) async fn database(&self) -> ServerResult<&DatabaseConnection> {
        self.database
            .get_or_try_init(|| async {
                Database::connect(&self.config.database.url)
                    .await
                    .map_err(ServerError::database_error)
            })
            .await
    }

    /// Returns a handle to the content store.
    pub(crate) async fn store(&self) -> ServerResult<&Arc<ContentStore>> {
        self.store
            .get_or_try_init(|| async {
                let StorageConfig::Local(local_config) = &self.config.storage;

                let local = LocalBackend::new(local_config.clone()).await?;
                let regulated = Regulator::new(Box::new(local), local_config.max_threads);
                let driver: Arc<dyn StorageDriver> = Arc::new(regulated);

                Ok(Arc::new(ContentStore::new(
                    driver,
                    self.config.storage_prefix.clone(),
                )))
            })
            .await
    }

    /// Sends periodic heartbeat queries to the database.
    async fn run_db_heartbeat(&self) -> ServerResult<()> {
        let db = self.database().await?;
        let stmt =
            Statement::from_string(db.get_database_backend(), "SELECT 'heartbeat';".to_string());

        loop {
            let _ = db.execute(stmt.clone()).await;
            time::sleep(Duration::from_secs(60)).await;
        }
    }
}

impl RequestStateInner {
    /// Returns the base API endpoint for clients.
    pub(crate) fn api_endpoint(&self) -> ServerResult<String> {
        if let Some(endpoint) = &self.api_endpoint {
            Ok(endpoint.to_owned())
        } else {
            // Naively synthesize from client's Host header
            // For convenience and shouldn't be used in production!
            let uri = Uri::builder()
                .scheme(if self.client_claims_https {
                    Scheme::HTTPS
                } else {
                    Scheme::HTTP
                })
                .authority(self.host.to_owned())
                .path_and_query("/")
                .build()
                .map_err(ServerError::request_error)?;

            Ok(uri.to_string())
        }
    }
}

/// The fallback route.
async fn fallback(_: Uri) -> ServerResult<()> {
    Err(ServerError::NotFound)
}

/// Runs the API server.
pub async fn run_api_server(cli_listen: Option<SocketAddr>, config: Config) -> Result<()> {
    eprintln!("Starting API server...");

    let state = StateInner::new(config).await;

    // Pick up a read-only flag left over from an interrupted GC pass
    state.readonly.load(state.database().await?).await?;

    let listen = if let Some(cli_listen) = cli_listen {
        cli_listen
    } else {
        state.config.listen.to_owned()
    };

    let rest = Router::new()
        .merge(api::get_router())
        .fallback(fallback)
        // middlewares
        .layer(axum::middleware::from_fn(apply_auth))
        .layer(axum::middleware::from_fn(init_request_state))
        .layer(axum::middleware::from_fn(restrict_host))
        .layer(Extension(state.clone()))
        .layer(CatchPanicLayer::new());

    eprintln!("Listening on {:?}...", listen);

    let listener = TcpListener::bind(&listen).await?;

    let (server_ret, _) = tokio::join!(axum::serve(listener, rest).into_future(), async {
        if state.config.database.heartbeat {
            let _ = state.run_db_heartbeat().await;
        }
    },);

    server_ret?;

    Ok(())
}

/// Runs database migrations.
pub async fn run_migrations(config: Config) -> Result<()> {
    eprintln!("Running migrations...");

    let state = StateInner::new(config).await;
    let db = state.database().await?;
    Migrator::up(db, None).await?;

    Ok(())
}
