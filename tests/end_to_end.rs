use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use hyper::body::to_bytes;
use hyper::header::HOST;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Client, Request, Response, Server, StatusCode};
use minihyperproxy::api::build_router;
use minihyperproxy::{HopperServer, PortConfig, ProxyServer, Supervisor};
use tokio::sync::oneshot;
use url::Url;

fn localhost(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

/// Spawns a throwaway upstream that echoes the request's path+query and
/// its `X-Forwarded-Host` header back as the response body, one line each.
async fn spawn_echo_upstream() -> (SocketAddr, oneshot::Sender<()>) {
    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, Infallible>(service_fn(|req: Request<Body>| async move {
            let forwarded = req
                .headers()
                .get("x-forwarded-host")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let body = format!("{}\n{forwarded}", req.uri());
            Ok::<_, Infallible>(Response::new(Body::from(body)))
        }))
    });
    let server = Server::bind(&localhost(0)).serve(make_svc);
    let addr = server.local_addr();
    let (tx, rx) = oneshot::channel();
    let graceful = server.with_graceful_shutdown(async {
        let _ = rx.await;
    });
    tokio::spawn(graceful);
    (addr, tx)
}

#[tokio::test(flavor = "multi_thread")]
async fn proxy_round_trip_rewrites_host_and_path() {
    let (upstream_addr, upstream_done) = spawn_echo_upstream().await;
    let upstream = Url::parse(&format!("http://{upstream_addr}/")).unwrap();

    let upstream_with_path = upstream.join("widgets").unwrap();
    let proxy = ProxyServer::new("p", "localhost", 25001);
    proxy.new_proxy("/api", upstream_with_path).await;
    proxy.serve().await.unwrap();

    let client = Client::new();
    let uri = "http://127.0.0.1:25001/api?id=7".parse().unwrap();
    let resp = client.get(uri).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = String::from_utf8(to_bytes(resp.into_body()).await.unwrap().to_vec()).unwrap();
    let mut lines = body.lines();
    assert_eq!(lines.next().unwrap(), "/widgets?id=7");
    assert_eq!(lines.next().unwrap(), "127.0.0.1:25001");

    proxy.stop().await;
    let _ = upstream_done.send(());
}

#[tokio::test(flavor = "multi_thread")]
async fn proxy_returns_404_for_unregistered_route() {
    let proxy = ProxyServer::new("p2", "localhost", 25002);
    proxy.serve().await.unwrap();

    let client = Client::new();
    let uri = "http://127.0.0.1:25002/nowhere".parse().unwrap();
    let resp = client.get(uri).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    proxy.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn two_hop_tunnel_delivers_to_real_target_and_strips_mhp_headers() {
    let (upstream_addr, upstream_done) = spawn_echo_upstream().await;
    let upstream = Url::parse(&format!("http://{upstream_addr}/")).unwrap();
    let target = Url::parse("http://h-target.example/").unwrap();

    let hopper_b = HopperServer::new("b", "localhost", 25011, 25012);
    hopper_b
        .build_new_incoming_hop(target.clone(), upstream)
        .await;
    hopper_b.serve().await.unwrap();

    let hopper_a = HopperServer::new("a", "localhost", 25013, 25014);
    let peer = Url::parse("http://127.0.0.1:25011/").unwrap();
    hopper_a.build_new_outgoing_hop(target.clone(), peer).await;
    hopper_a.serve().await.unwrap();

    let client = Client::new();
    let uri = "http://127.0.0.1:25014/h-target.example/widgets?id=9"
        .parse()
        .unwrap();
    let resp = client.get(uri).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = String::from_utf8(to_bytes(resp.into_body()).await.unwrap().to_vec()).unwrap();
    let mut lines = body.lines();
    assert_eq!(lines.next().unwrap(), "/widgets?id=9");
    assert!(!lines.next().unwrap().is_empty());

    hopper_a.stop().await;
    hopper_b.stop().await;
    let _ = upstream_done.send(());
}

#[tokio::test(flavor = "multi_thread")]
async fn hopper_dial_fails_with_no_registered_hop() {
    let hopper = HopperServer::new("c", "localhost", 25021, 25022);
    hopper.serve().await.unwrap();

    let client = Client::new();
    let uri = "http://127.0.0.1:25022/unregistered.example/"
        .parse()
        .unwrap();
    let resp = client.get(uri).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    hopper.stop().await;
}

async fn spawn_control_plane(sup: Arc<Supervisor>, port: u16) -> oneshot::Sender<()> {
    let router = build_router(sup);
    let server = Server::bind(&localhost(port)).serve(router.into_make_service());
    let (tx, rx) = oneshot::channel();
    let graceful = server.with_graceful_shutdown(async {
        let _ = rx.await;
    });
    tokio::spawn(graceful);
    tx
}

fn control_ports() -> PortConfig {
    PortConfig {
        proxy: 25101,
        hopper_incoming: 25201,
        hopper_outgoing: 25301,
    }
}

async fn post_json(uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    request_with_body("POST", uri, body).await
}

async fn get_json(uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    request_with_body("GET", uri, body).await
}

async fn request_with_body(
    method: &str,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let client = Client::new();
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header(HOST, "control")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = client.request(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body()).await.unwrap();
    let parsed = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, parsed)
}

#[tokio::test(flavor = "multi_thread")]
async fn control_plane_creates_proxy_and_registers_route() {
    let sup = Arc::new(Supervisor::new(control_ports()));
    let shutdown = spawn_control_plane(sup, 25401).await;

    let (status, body) = post_json(
        "http://127.0.0.1:25401/proxy",
        serde_json::json!({"Name": "demo", "Hostname": "localhost"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Name"], "demo");
    assert_eq!(body["Port"], "25101");

    let (status, body) = post_json(
        "http://127.0.0.1:25401/proxy/route",
        serde_json::json!({"Name": "demo", "Route": "/api", "Target": "http://localhost:9"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Route"], "/api");

    let _ = shutdown.send(());
}

#[tokio::test(flavor = "multi_thread")]
async fn control_plane_reports_empty_name_and_missing_server() {
    let sup = Arc::new(Supervisor::new(PortConfig {
        proxy: 25501,
        hopper_incoming: 25601,
        hopper_outgoing: 25701,
    }));
    let shutdown = spawn_control_plane(sup, 25402).await;

    let (status, body) = post_json(
        "http://127.0.0.1:25402/proxy",
        serde_json::json!({"Name": "", "Hostname": ""}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["Error"], "Required field is empty");

    let (status, body) = get_json(
        "http://127.0.0.1:25402/server",
        serde_json::json!({"Name": "ghost"}),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["Error"].as_str().is_some());

    let _ = shutdown.send(());
}

#[tokio::test(flavor = "multi_thread")]
async fn control_plane_reports_invalid_body_for_blank_route_or_target() {
    let sup = Arc::new(Supervisor::new(PortConfig {
        proxy: 25502,
        hopper_incoming: 25602,
        hopper_outgoing: 25702,
    }));
    let shutdown = spawn_control_plane(sup, 25403).await;

    post_json(
        "http://127.0.0.1:25403/proxy",
        serde_json::json!({"Name": "demo2", "Hostname": "localhost"}),
    )
    .await;

    let (status, body) = post_json(
        "http://127.0.0.1:25403/proxy/route",
        serde_json::json!({"Name": "demo2", "Route": "", "Target": "http://localhost:9"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["Error"], "Invalid body structure");

    let (status, body) = post_json(
        "http://127.0.0.1:25403/proxy/route",
        serde_json::json!({"Name": "demo2", "Route": "/api", "Target": ""}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["Error"], "Invalid body structure");

    let _ = shutdown.send(());
}
