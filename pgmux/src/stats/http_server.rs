use std::convert::Infallible;
use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use pgmux_stats::ProxyState;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::{Registry, Workers};

#[derive(Serialize)]
struct Report {
    total: ProxyState,
    workers: Vec<ProxyState>,
}

async fn handle(
    registry: Registry,
    request: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match request.uri().path() {
        "/metrics" => Response::builder()
            .header(
                hyper::header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )
            .body(Full::new(Bytes::from(
                Workers::load(&registry).to_string(),
            ))),

        "/stats" => {
            let workers = registry.snapshot();
            let report = Report {
                total: workers.iter().copied().sum(),
                workers,
            };
            match serde_json::to_vec(&report) {
                Ok(body) => Response::builder()
                    .header(hyper::header::CONTENT_TYPE, "application/json")
                    .body(Full::new(Bytes::from(body))),
                Err(_) => Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Full::new(Bytes::new())),
            }
        }

        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::new())),
    };

    Ok(response.unwrap_or_else(|_| Response::new(Full::new(Bytes::from("Metrics unavailable")))))
}

/// Serve `/metrics` (OpenMetrics) and `/stats` (JSON) until the listener fails.
pub async fn server(port: u16, registry: Registry) -> std::io::Result<()> {
    info!("OpenMetrics endpoint http://0.0.0.0:{}", port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let registry = registry.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |request| handle(registry.clone(), request));
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!("OpenMetrics endpoint error: {:?}", err);
            }
        });
    }
}
