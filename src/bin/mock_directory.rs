//! Mock facility directory + positions API
//!
//! Serves one facility for local runs of the positioning service.
//!
//! Endpoints (JSON body `{"macAddress": "..."}` on the GETs):
//! - `GET /api/gateways` - gateways of the facility plus every beacon in it
//! - `GET /api/areas/beacon` - area polygons plus every beacon
//! - `PUT /api/positions` - accepts dwell sessions and prints them
//!
//! Unknown beacons get a 404. With `--token`, requests without the matching
//! bearer token get a 401.
//!
//! Usage:
//!   cargo run --bin mock-directory -- --port 3000 --facility facility.json

use beacon_positioning::domain::Area;
use beacon_positioning::io::directory::{AreasData, BeaconRef, Envelope, GatewayEntry, GatewaysData};
use beacon_positioning::io::feed::FeedBody;
use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "mock-directory")]
#[command(about = "Mock facility directory and positions API for local runs")]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Facility JSON file ({beacons, gateways, areaVertices}); built-in demo room if omitted
    #[arg(short, long)]
    facility: Option<String>,

    /// Require this bearer token
    #[arg(long)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Facility {
    beacons: Vec<String>,
    gateways: Vec<GatewayEntry>,
    #[serde(rename = "areaVertices")]
    areas: Vec<Area>,
}

#[derive(Debug, Deserialize)]
struct LookupBody {
    #[serde(rename = "macAddress")]
    mac_address: String,
}

/// 10x10 room, three gateways, two areas split at x = 5
fn demo_facility() -> Facility {
    let facility = r#"{
        "beacons": ["aa:bb:cc:00:00:01", "aa:bb:cc:00:00:02"],
        "gateways": [
            {"macAddress": "gw-1", "x": 0, "y": 0},
            {"macAddress": "gw-2", "x": 10, "y": 0},
            {"macAddress": "gw-3", "x": 0, "y": 10}
        ],
        "areaVertices": [
            {"idArea": 1, "vertices": [[0, 0], [5, 0], [5, 10], [0, 10]]},
            {"idArea": 2, "vertices": [[5, 0], [10, 0], [10, 10], [5, 10]]}
        ]
    }"#;
    serde_json::from_str(facility).expect("demo facility is valid JSON")
}

struct MockState {
    facility: Facility,
    token: Option<String>,
}

impl MockState {
    fn beacon_refs(&self) -> Vec<BeaconRef> {
        self.facility.beacons.iter().map(|b| BeaconRef { mac_address: b.clone() }).collect()
    }

    fn authorized(&self, req: &Request<hyper::body::Incoming>) -> bool {
        let Some(token) = &self.token else {
            return true;
        };
        req.headers()
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == format!("Bearer {}", token))
            .unwrap_or(false)
    }
}

fn respond(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

/// Beacon named in a lookup body, if it belongs to the facility
fn lookup_beacon(state: &MockState, body: &[u8]) -> Result<String, Response<Full<Bytes>>> {
    let lookup: LookupBody = serde_json::from_slice(body).map_err(|e| {
        respond(StatusCode::BAD_REQUEST, format!(r#"{{"error":"invalid body: {}"}}"#, e))
    })?;
    if !state.facility.beacons.contains(&lookup.mac_address) {
        println!("[MOCK] Unknown beacon {}", lookup.mac_address);
        return Err(respond(StatusCode::NOT_FOUND, r#"{"error":"unknown beacon"}"#.to_string()));
    }
    Ok(lookup.mac_address)
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<MockState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if !state.authorized(&req) {
        println!("[MOCK] Rejected {} {} (bad token)", req.method(), req.uri().path());
        return Ok(respond(StatusCode::UNAUTHORIZED, r#"{"error":"unauthorized"}"#.to_string()));
    }

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return Ok(respond(StatusCode::BAD_REQUEST, format!(r#"{{"error":"{}"}}"#, e)));
        }
    };

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/api/gateways") => match lookup_beacon(&state, &body) {
            Ok(beacon) => {
                println!("[MOCK] Gateways for {}", beacon);
                let data = GatewaysData {
                    beacons: state.beacon_refs(),
                    gateways: state.facility.gateways.clone(),
                };
                respond(StatusCode::OK, serde_json::to_string(&Envelope { data }).unwrap_or_default())
            }
            Err(response) => response,
        },
        (&Method::GET, "/api/areas/beacon") => match lookup_beacon(&state, &body) {
            Ok(beacon) => {
                println!("[MOCK] Areas for {}", beacon);
                let data =
                    AreasData { beacons: state.beacon_refs(), areas: state.facility.areas.clone() };
                respond(StatusCode::OK, serde_json::to_string(&Envelope { data }).unwrap_or_default())
            }
            Err(response) => response,
        },
        (&Method::PUT, "/api/positions") => match serde_json::from_slice::<FeedBody>(&body) {
            Ok(feed) => {
                println!("[MOCK] Received {} dwell sessions", feed.positions.len());
                for record in &feed.positions {
                    println!(
                        "[MOCK]   {} area={} {} -> {} ({:.1}s) at ({}, {})",
                        record.beacon,
                        record.area,
                        record.from,
                        record.to,
                        record.time_spent,
                        record.x,
                        record.y
                    );
                }
                respond(StatusCode::OK, r#"{"status":"success"}"#.to_string())
            }
            Err(e) => respond(StatusCode::BAD_REQUEST, format!(r#"{{"error":"invalid body: {}"}}"#, e)),
        },
        _ => respond(StatusCode::NOT_FOUND, r#"{"error":"not found"}"#.to_string()),
    };

    Ok(response)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let facility = match &args.facility {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => demo_facility(),
    };

    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║           Mock Facility Directory                        ║");
    println!("╠══════════════════════════════════════════════════════════╣");
    println!("║ Port:            {:>5}                                   ║", args.port);
    println!("║ Beacons:         {:>5}                                   ║", facility.beacons.len());
    println!("║ Gateways:        {:>5}                                   ║", facility.gateways.len());
    println!("║ Areas:           {:>5}                                   ║", facility.areas.len());
    println!("╚══════════════════════════════════════════════════════════╝");
    println!();

    let state = Arc::new(MockState { facility, token: args.token });
    let listener = TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;

    loop {
        let (stream, _peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let state = state.clone();
                async move { handle_request(req, state).await }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                eprintln!("[MOCK] HTTP error: {}", e);
            }
        });
    }
}
