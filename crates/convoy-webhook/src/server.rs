use crate::admission::{respond, AdmissionResponse, AdmissionReview};
use crate::jobs::validate_jobs;
use crate::podgroups::validate_pod_groups;
use crate::queues::{mutate_queues, validate_queues};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// A registered admission endpoint
pub struct AdmissionService {
    pub path: &'static str,
    pub handler: fn(&AdmissionReview) -> AdmissionResponse,
}

/// The admission endpoints this manager serves
pub fn services() -> Vec<AdmissionService> {
    vec![
        AdmissionService {
            path: "/queues/mutate",
            handler: mutate_queues,
        },
        AdmissionService {
            path: "/queues/validate",
            handler: validate_queues,
        },
        AdmissionService {
            path: "/jobs/validate",
            handler: validate_jobs,
        },
        AdmissionService {
            path: "/podgroups/validate",
            handler: validate_pod_groups,
        },
    ]
}

/// Webhook server configuration
#[derive(Clone)]
pub struct Config {
    /// Address to listen on
    pub listen_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8443".parse().expect("static address parses"),
        }
    }
}

/// Admission webhook server
pub struct WebhookServer {
    config: Config,
}

impl WebhookServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Build the router, registering every admission service
    pub fn build_router(&self) -> Router {
        let mut router = Router::new().route("/healthz", get(healthz));
        for service in services() {
            info!("registered '{}' as webhook", service.path);
            let handler = service.handler;
            router = router.route(
                service.path,
                post(move |Json(review): Json<AdmissionReview>| async move {
                    Json(respond(review, handler))
                }),
            );
        }
        router.layer(TraceLayer::new_for_http())
    }

    /// Run the server, shutting down gracefully when `token` is cancelled
    pub async fn run(self, token: CancellationToken) -> Result<(), std::io::Error> {
        let app = self.build_router();

        info!("starting webhook manager on {}", self.config.listen_addr);
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                token.cancelled().await;
            })
            .await
    }
}

/// Health check endpoint
async fn healthz() -> &'static str {
    "ok"
}
