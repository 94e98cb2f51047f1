//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use pcbook::auth::{Role, TokenManager};
use pcbook::bus::BroadcastBus;
use pcbook::client::{self, AuthChannel, ClientConfig, LaptopClient, TokenLifecycle};
use pcbook::pb::{
    memory, AuthServiceServer, CreateLaptopRequest, CreateLaptopResponse, Cpu, Laptop,
    LaptopService, LaptopServiceServer, Memory, RateLaptopRequest, RateLaptopResponse,
    SearchLaptopRequest, SearchLaptopResponse, SendLaptopInfoRequest, SendLaptopInfoResponse,
    UploadImageRequest, UploadImageResponse,
};
use pcbook::server::{self, AuthServiceImpl, LaptopServiceImpl};
use pcbook::store::{DiskImageStore, LaptopStore, RatingStore, User, UserStore};
use tempfile::TempDir;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, Server};
use tonic::{Request, Response, Status, Streaming};

pub const ADMIN: (&str, &str) = ("admin1", "secret");
pub const USER: (&str, &str) = ("user1", "secret");

/// Initialize test tracing (call once at the beginning of tests).
///
/// Only logs from this crate are shown, filtering out HTTP/2 and tower noise.
/// Subsequent calls are safe and will be ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new("pcbook=info,integration_tests=info");

    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(filter)
        .try_init();
}

/// A running server plus handles onto its state.
pub struct TestServer {
    pub url: String,
    pub tokens: TokenManager,
    pub laptops: LaptopStore,
    pub images: DiskImageStore,
    pub bus: BroadcastBus,
    pub handle: tokio::task::JoinHandle<()>,
    _image_dir: TempDir,
}

impl TestServer {
    /// Logs in as `(username, password)` and returns a gated client.
    pub async fn connect_as(&self, credentials: (&str, &str)) -> (LaptopClient, TokenLifecycle) {
        let config = ClientConfig {
            server_url: self.url.clone(),
            username: credentials.0.to_string(),
            password: credentials.1.to_string(),
            refresh_interval: Duration::from_secs(60),
        };
        client::connect(&config).await.unwrap()
    }
}

pub async fn start_test_server() -> TestServer {
    let tokens = TokenManager::new(b"integration-secret", Duration::from_secs(60));

    let users = UserStore::new();
    let seeded = [
        User::new(ADMIN.0, ADMIN.1, Role::Admin).unwrap(),
        User::new(USER.0, USER.1, Role::User).unwrap(),
    ];
    server::seed_users(&users, &seeded).await.unwrap();

    let image_dir = tempfile::tempdir().unwrap();
    let laptops = LaptopStore::new();
    let images = DiskImageStore::new(image_dir.path().join("img"));
    let bus = BroadcastBus::new(64);

    let laptop_service = LaptopServiceImpl::new(
        laptops.clone(),
        Arc::new(images.clone()),
        RatingStore::new(),
        Arc::new(bus.clone()),
    );
    let auth_service = AuthServiceImpl::new(users, tokens.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let local_addr = listener.local_addr().unwrap();

    let layer = server::auth_layer(tokens.clone());
    let handle = tokio::spawn(async move {
        Server::builder()
            .layer(layer)
            .add_service(AuthServiceServer::new(auth_service))
            .add_service(LaptopServiceServer::new(laptop_service))
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    tokio::time::sleep(Duration::from_millis(100)).await;

    TestServer {
        url: format!("http://{local_addr}"),
        tokens,
        laptops,
        images,
        bus,
        handle,
        _image_dir: image_dir,
    }
}

pub fn laptop(id: &str, price: u32, cores: u32, ghz: f64, ram_gb: u64) -> Laptop {
    Laptop {
        id: id.to_string(),
        brand: "Lenovo".to_string(),
        name: "Thinkpad X1".to_string(),
        cpu: Some(Cpu {
            brand: "Intel".to_string(),
            name: "Core i7".to_string(),
            number_cores: cores,
            number_threads: cores * 2,
            min_ghz: ghz,
            max_ghz: ghz + 1.0,
        }),
        ram: Some(Memory {
            value: ram_gb,
            unit: memory::Unit::Gigabyte as i32,
        }),
        price,
        release_year: 2019,
        ..Default::default()
    }
}

/// Laptop service whose telemetry handler reads `accept` messages and then
/// fails the call with `ResourceExhausted`. Every other method is unimplemented.
pub struct RejectingTelemetry {
    pub accept: usize,
}

#[tonic::async_trait]
impl LaptopService for RejectingTelemetry {
    async fn create_laptop(
        &self,
        _request: Request<CreateLaptopRequest>,
    ) -> Result<Response<CreateLaptopResponse>, Status> {
        Err(Status::unimplemented("create_laptop"))
    }

    type SearchLaptopStream = ReceiverStream<Result<SearchLaptopResponse, Status>>;

    async fn search_laptop(
        &self,
        _request: Request<SearchLaptopRequest>,
    ) -> Result<Response<Self::SearchLaptopStream>, Status> {
        Err(Status::unimplemented("search_laptop"))
    }

    async fn upload_image(
        &self,
        _request: Request<Streaming<UploadImageRequest>>,
    ) -> Result<Response<UploadImageResponse>, Status> {
        Err(Status::unimplemented("upload_image"))
    }

    type RateLaptopStream = ReceiverStream<Result<RateLaptopResponse, Status>>;

    async fn rate_laptop(
        &self,
        _request: Request<Streaming<RateLaptopRequest>>,
    ) -> Result<Response<Self::RateLaptopStream>, Status> {
        Err(Status::unimplemented("rate_laptop"))
    }

    async fn send_laptop_info(
        &self,
        request: Request<Streaming<SendLaptopInfoRequest>>,
    ) -> Result<Response<SendLaptopInfoResponse>, Status> {
        let mut inbound = request.into_inner();
        for _ in 0..self.accept {
            if inbound.message().await?.is_none() {
                break;
            }
        }
        Err(Status::resource_exhausted("telemetry quota reached"))
    }
}

/// Serves [`RejectingTelemetry`] without the auth layer, returning its URL.
pub async fn start_rejecting_server(accept: usize) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let local_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        Server::builder()
            .add_service(LaptopServiceServer::new(RejectingTelemetry { accept }))
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    format!("http://{local_addr}")
}

/// A client that never attaches a token.
pub async fn unauthenticated_client(url: &str) -> LaptopClient {
    let channel = Channel::from_shared(url.to_string())
        .unwrap()
        .connect()
        .await
        .unwrap();
    LaptopClient::new(AuthChannel::unauthenticated(channel))
}
