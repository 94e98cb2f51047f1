use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::Claims;
use crate::bus::{Publisher, LAPTOP_UPDATES_TOPIC};
use crate::context::CallContext;
use crate::error::{PublishError, StoreError};
use crate::pb::laptop_service_server::LaptopService;
use crate::pb::upload_image_request::Data;
use crate::pb::{
    CreateLaptopRequest, CreateLaptopResponse, Filter, Laptop, LaptopInfo, RateLaptopRequest,
    RateLaptopResponse, SearchLaptopRequest, SearchLaptopResponse, SendLaptopInfoRequest,
    SendLaptopInfoResponse, UploadImageRequest, UploadImageResponse,
};
use crate::store::{ImageStore, LaptopStore, RatingStore};

/// Largest accepted image upload, in bytes.
pub const MAX_IMAGE_SIZE: usize = 1 << 20;

const MAX_IMAGE_TYPE_LEN: usize = 16;
const STREAM_BUFFER: usize = 16;
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(1);

type ResponseSender<T> = mpsc::Sender<Result<T, Status>>;

/// gRPC service implementation for the laptop catalog.
pub struct LaptopServiceImpl {
    laptops: LaptopStore,
    images: Arc<dyn ImageStore>,
    ratings: RatingStore,
    publisher: Arc<dyn Publisher>,
    topic: String,
}

impl Clone for LaptopServiceImpl {
    fn clone(&self) -> Self {
        Self {
            laptops: self.laptops.clone(),
            images: Arc::clone(&self.images),
            ratings: self.ratings.clone(),
            publisher: Arc::clone(&self.publisher),
            topic: self.topic.clone(),
        }
    }
}

impl LaptopServiceImpl {
    /// Creates the service over the given stores, publishing telemetry on
    /// [`LAPTOP_UPDATES_TOPIC`].
    pub fn new(
        laptops: LaptopStore,
        images: Arc<dyn ImageStore>,
        ratings: RatingStore,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            laptops,
            images,
            ratings,
            publisher,
            topic: LAPTOP_UPDATES_TOPIC.to_string(),
        }
    }

    /// Publishes telemetry on `topic` instead of the default.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn laptops(&self) -> &LaptopStore {
        &self.laptops
    }

    pub fn ratings(&self) -> &RatingStore {
        &self.ratings
    }

    /// Stores `laptop`, generating an id when it has none.
    pub async fn create(&self, ctx: &CallContext, mut laptop: Laptop) -> Result<String, Status> {
        info!(id = %laptop.id, "received create laptop request");

        laptop.id = resolve_laptop_id(&laptop.id)?;
        ctx.check()?;

        self.laptops.save(&laptop).await.map_err(|e| match e {
            StoreError::AlreadyExists(_) => {
                Status::already_exists(format!("cannot save laptop to the store: {e}"))
            }
            other => Status::internal(format!("cannot save laptop to the store: {other}")),
        })?;

        info!(id = %laptop.id, "saved laptop");
        Ok(laptop.id)
    }

    /// Sends every laptop matching `filter` to `tx`, returning how many were sent.
    pub async fn search(
        &self,
        ctx: &CallContext,
        filter: &Filter,
        tx: &ResponseSender<SearchLaptopResponse>,
    ) -> Result<usize, Status> {
        let sent = self
            .laptops
            .search(ctx, filter, |laptop| async move {
                let id = laptop.id.clone();
                let response = SearchLaptopResponse {
                    laptop: Some(laptop),
                };
                match tx.send(Ok(response)).await {
                    Ok(()) => {
                        debug!(%id, "sent laptop");
                        Ok(())
                    }
                    Err(_) => Err(StoreError::Visit(Status::internal(format!(
                        "cannot send laptop {id}: response stream closed"
                    )))),
                }
            })
            .await?;

        Ok(sent)
    }

    /// Receives an image upload: one `info` message followed by chunks.
    pub async fn receive_image<S>(
        &self,
        ctx: &CallContext,
        mut inbound: S,
    ) -> Result<UploadImageResponse, Status>
    where
        S: Stream<Item = Result<UploadImageRequest, Status>> + Unpin,
    {
        let info = match inbound.next().await {
            Some(Ok(UploadImageRequest {
                data: Some(Data::Info(info)),
            })) => info,
            Some(Ok(_)) => {
                return Err(Status::invalid_argument(
                    "first upload message must carry image info",
                ))
            }
            Some(Err(status)) => return Err(status),
            None => return Err(Status::invalid_argument("upload stream is empty")),
        };
        info!(laptop_id = %info.laptop_id, "received an image upload");

        let image_type = validate_image_type(&info.image_type)?;
        if self.laptops.find(&info.laptop_id).await.is_none() {
            return Err(Status::invalid_argument(format!(
                "laptop {} does not exist",
                info.laptop_id
            )));
        }

        let mut image = Vec::new();
        loop {
            ctx.check()?;
            let Some(message) = inbound.next().await else {
                debug!("no more image data");
                break;
            };

            let chunk = match message?.data {
                Some(Data::ChunkData(chunk)) => chunk,
                Some(Data::Info(_)) => {
                    return Err(Status::invalid_argument(
                        "image info may only be sent once",
                    ))
                }
                None => continue,
            };

            let size = image.len() + chunk.len();
            if size > MAX_IMAGE_SIZE {
                return Err(Status::invalid_argument(format!(
                    "image is too large: {size} > {MAX_IMAGE_SIZE}"
                )));
            }
            image.extend_from_slice(&chunk);
        }

        let size = image.len();
        let id = self
            .images
            .save(&info.laptop_id, &image_type, image)
            .await
            .map_err(|e| Status::internal(format!("cannot save image to the store: {e}")))?;

        counter!("laptop.upload.bytes").increment(size as u64);
        info!(%id, size, "saved image");

        Ok(UploadImageResponse {
            id,
            size: u32::try_from(size).unwrap_or(u32::MAX),
        })
    }

    /// Applies each inbound rating in order, answering each one on `tx`.
    pub async fn rate<S>(
        &self,
        ctx: &CallContext,
        mut inbound: S,
        tx: &ResponseSender<RateLaptopResponse>,
    ) -> Result<u32, Status>
    where
        S: Stream<Item = Result<RateLaptopRequest, Status>> + Unpin,
    {
        let mut rated = 0;

        loop {
            ctx.check()?;
            let Some(message) = inbound.next().await else {
                break;
            };
            let RateLaptopRequest { laptop_id, score } = message?;
            debug!(%laptop_id, score, "received rating");
            counter!("laptop.rate.requests").increment(1);

            if self.laptops.find(&laptop_id).await.is_none() {
                return Err(Status::not_found(format!("laptop {laptop_id} does not exist")));
            }

            let rating = self.ratings.add(&laptop_id, score).await;
            let response = RateLaptopResponse {
                laptop_id,
                rated_count: rating.count,
                average_score: rating.average(),
            };

            tx.send(Ok(response))
                .await
                .map_err(|_| Status::internal("cannot send rating: response stream closed"))?;
            rated += 1;
        }

        Ok(rated)
    }

    /// Counts inbound telemetry snapshots, republishing each to the bus.
    ///
    /// Publish failures are logged and never fail the call.
    pub async fn receive_info<S>(
        &self,
        ctx: &CallContext,
        mut inbound: S,
    ) -> Result<SendLaptopInfoResponse, Status>
    where
        S: Stream<Item = Result<SendLaptopInfoRequest, Status>> + Unpin,
    {
        let mut received: u32 = 0;

        loop {
            ctx.check()?;
            let Some(message) = inbound.next().await else {
                break;
            };
            let info = message?.laptop.unwrap_or_default();
            debug!(id = %info.id, "received laptop info");
            counter!("laptop.info.received").increment(1);

            if let Err(e) = self.publish_info(&info).await {
                warn!("failed to republish laptop info {}: {e}", info.id);
                counter!("laptop.info.publish_failures").increment(1);
            }

            received = received.saturating_add(1);
        }

        Ok(SendLaptopInfoResponse {
            msg: format!("finished receiving {received} laptop infos."),
            received,
        })
    }

    async fn publish_info(&self, info: &LaptopInfo) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(info)?;

        tokio::time::timeout(PUBLISH_TIMEOUT, self.publisher.publish(&self.topic, payload))
            .await
            .map_err(|_| PublishError::TimedOut(self.topic.clone()))?
    }
}

#[tonic::async_trait]
impl LaptopService for LaptopServiceImpl {
    async fn create_laptop(
        &self,
        request: Request<CreateLaptopRequest>,
    ) -> Result<Response<CreateLaptopResponse>, Status> {
        let start = Instant::now();
        counter!("laptop.create.requests").increment(1);

        let ctx = CallContext::from_metadata(request.metadata());
        if let Some(claims) = request.extensions().get::<Claims>() {
            debug!(user = %claims.username, "create laptop caller");
        }

        let laptop = request
            .into_inner()
            .laptop
            .ok_or_else(|| Status::invalid_argument("laptop is missing"))?;

        let result = self.create(&ctx, laptop).await;
        histogram!("laptop.create.duration").record(start.elapsed().as_secs_f64());

        let id = result.map_err(log_rejection("create laptop"))?;
        Ok(Response::new(CreateLaptopResponse { id }))
    }

    type SearchLaptopStream = ReceiverStream<Result<SearchLaptopResponse, Status>>;

    async fn search_laptop(
        &self,
        request: Request<SearchLaptopRequest>,
    ) -> Result<Response<Self::SearchLaptopStream>, Status> {
        let ctx = CallContext::from_metadata(request.metadata());
        let filter = request.into_inner().filter.unwrap_or_default();
        info!(?filter, "received search laptop request");

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let service = self.clone();

        tokio::spawn(async move {
            let _watch = ctx.cancel_on_close(&tx);
            match service.search(&ctx, &filter, &tx).await {
                Ok(sent) => info!(sent, "search finished"),
                Err(status) => {
                    warn!("search laptop failed: {}", status.message());
                    let _ = tx.send(Err(status)).await;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn upload_image(
        &self,
        request: Request<Streaming<UploadImageRequest>>,
    ) -> Result<Response<UploadImageResponse>, Status> {
        let ctx = CallContext::from_metadata(request.metadata());
        let response = self
            .receive_image(&ctx, request.into_inner())
            .await
            .map_err(log_rejection("upload image"))?;

        Ok(Response::new(response))
    }

    type RateLaptopStream = ReceiverStream<Result<RateLaptopResponse, Status>>;

    async fn rate_laptop(
        &self,
        request: Request<Streaming<RateLaptopRequest>>,
    ) -> Result<Response<Self::RateLaptopStream>, Status> {
        let ctx = CallContext::from_metadata(request.metadata());
        let inbound = request.into_inner();

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let service = self.clone();

        tokio::spawn(async move {
            let _watch = ctx.cancel_on_close(&tx);
            match service.rate(&ctx, inbound, &tx).await {
                Ok(rated) => info!(rated, "rating stream finished"),
                Err(status) => {
                    warn!("rate laptop failed: {}", status.message());
                    let _ = tx.send(Err(status)).await;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn send_laptop_info(
        &self,
        request: Request<Streaming<SendLaptopInfoRequest>>,
    ) -> Result<Response<SendLaptopInfoResponse>, Status> {
        let ctx = CallContext::from_metadata(request.metadata());
        let response = self
            .receive_info(&ctx, request.into_inner())
            .await
            .map_err(log_rejection("send laptop info"))?;

        info!(received = response.received, "{}", response.msg);
        Ok(Response::new(response))
    }
}

/// Accepts a syntactically valid UUID or generates one for an empty id.
#[allow(clippy::result_large_err)]
fn resolve_laptop_id(id: &str) -> Result<String, Status> {
    if id.is_empty() {
        return Ok(Uuid::new_v4().to_string());
    }

    Uuid::parse_str(id)
        .map(|_| id.to_string())
        .map_err(|e| Status::invalid_argument(format!("laptop id is not a valid UUID: {e}")))
}

/// Normalizes the declared image type into a safe file extension.
#[allow(clippy::result_large_err)]
fn validate_image_type(image_type: &str) -> Result<String, Status> {
    let extension = image_type.strip_prefix('.').unwrap_or(image_type);

    if extension.is_empty()
        || extension.len() > MAX_IMAGE_TYPE_LEN
        || !extension.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(Status::invalid_argument(format!(
            "unsupported image type: {image_type:?}"
        )));
    }

    Ok(extension.to_string())
}

fn log_rejection(call: &'static str) -> impl Fn(Status) -> Status {
    move |status| {
        warn!("{call} failed ({:?}): {}", status.code(), status.message());
        status
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use tonic::Code;

    use super::*;
    use crate::bus::BroadcastBus;
    use crate::fixtures::{laptop, memory, search_catalog, search_filter};
    use crate::pb::memory::Unit;
    use crate::pb::ImageInfo;
    use crate::store::DiskImageStore;

    struct Harness {
        service: LaptopServiceImpl,
        images: DiskImageStore,
        bus: BroadcastBus,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let images = DiskImageStore::new(dir.path());
        let bus = BroadcastBus::new(16);
        let service = LaptopServiceImpl::new(
            LaptopStore::new(),
            Arc::new(images.clone()),
            RatingStore::new(),
            Arc::new(bus.clone()),
        );
        Harness {
            service,
            images,
            bus,
            _dir: dir,
        }
    }

    async fn stored_laptop(service: &LaptopServiceImpl) -> String {
        let laptop = laptop("", 1_000, 4, 3.0, memory(8, Unit::Gigabyte));
        service.create(&CallContext::new(), laptop).await.unwrap()
    }

    fn info_message(laptop_id: &str, image_type: &str) -> Result<UploadImageRequest, Status> {
        Ok(UploadImageRequest {
            data: Some(Data::Info(ImageInfo {
                laptop_id: laptop_id.to_string(),
                image_type: image_type.to_string(),
            })),
        })
    }

    fn chunk_message(len: usize) -> Result<UploadImageRequest, Status> {
        Ok(UploadImageRequest {
            data: Some(Data::ChunkData(vec![0xAB; len])),
        })
    }

    #[tokio::test]
    async fn create_generates_an_id_when_missing() {
        let h = harness();
        let id = stored_laptop(&h.service).await;

        assert!(Uuid::parse_str(&id).is_ok());
        assert!(h.service.laptops().find(&id).await.is_some());
    }

    #[tokio::test]
    async fn create_keeps_a_valid_client_id() {
        let h = harness();
        let id = Uuid::new_v4().to_string();
        let laptop = laptop(&id, 1, 1, 1.0, memory(1, Unit::Gigabyte));

        assert_eq!(
            h.service.create(&CallContext::new(), laptop).await.unwrap(),
            id
        );
    }

    #[tokio::test]
    async fn create_rejects_malformed_id() {
        let h = harness();
        let laptop = laptop("invalid-uuid", 1, 1, 1.0, memory(1, Unit::Gigabyte));

        let status = h
            .service
            .create(&CallContext::new(), laptop)
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(h.service.laptops().is_empty().await);
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let h = harness();
        let id = Uuid::new_v4().to_string();
        let first = laptop(&id, 1, 1, 1.0, memory(1, Unit::Gigabyte));
        h.service
            .create(&CallContext::new(), first.clone())
            .await
            .unwrap();

        let status = h
            .service
            .create(&CallContext::new(), first)
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::AlreadyExists);
    }

    #[tokio::test]
    async fn create_observes_cancellation_before_saving() {
        let h = harness();
        let ctx = CallContext::new();
        ctx.cancel();

        let status = h
            .service
            .create(&ctx, laptop("", 1, 1, 1.0, memory(1, Unit::Gigabyte)))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Cancelled);
        assert!(h.service.laptops().is_empty().await);
    }

    #[tokio::test]
    async fn search_streams_matching_laptops() {
        let h = harness();
        for laptop in search_catalog() {
            h.service.laptops().save(&laptop).await.unwrap();
        }

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let sent = h
            .service
            .search(&CallContext::new(), &search_filter(), &tx)
            .await
            .unwrap();
        drop(tx);

        let ids: Vec<String> = ReceiverStream::new(rx)
            .map(|item| item.unwrap().laptop.unwrap().id)
            .collect()
            .await;
        let ids: BTreeSet<String> = ids.into_iter().collect();
        assert_eq!(sent, 2);
        assert_eq!(ids, BTreeSet::from(["4".to_string(), "5".to_string()]));
    }

    #[tokio::test]
    async fn search_fails_when_the_receiver_is_gone() {
        let h = harness();
        for laptop in search_catalog() {
            h.service.laptops().save(&laptop).await.unwrap();
        }

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        drop(rx);
        let status = h
            .service
            .search(&CallContext::new(), &search_filter(), &tx)
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Internal);
    }

    #[tokio::test]
    async fn upload_saves_the_image() {
        let h = harness();
        let laptop_id = stored_laptop(&h.service).await;
        let inbound = tokio_stream::iter(vec![
            info_message(&laptop_id, ".jpg"),
            chunk_message(1024),
            chunk_message(100),
        ]);

        let response = h
            .service
            .receive_image(&CallContext::new(), inbound)
            .await
            .unwrap();

        assert_eq!(response.size, 1124);
        let info = h.images.get(&response.id).await.unwrap();
        assert_eq!(info.laptop_id, laptop_id);
        assert_eq!(info.image_type, "jpg");
        assert_eq!(tokio::fs::read(&info.path).await.unwrap().len(), 1124);
    }

    #[tokio::test]
    async fn upload_accepts_exactly_the_limit() {
        let h = harness();
        let laptop_id = stored_laptop(&h.service).await;
        let inbound = tokio_stream::iter(vec![
            info_message(&laptop_id, "png"),
            chunk_message(MAX_IMAGE_SIZE),
        ]);

        let response = h
            .service
            .receive_image(&CallContext::new(), inbound)
            .await
            .unwrap();
        assert_eq!(response.size as usize, MAX_IMAGE_SIZE);
    }

    #[tokio::test]
    async fn upload_over_the_limit_is_rejected_and_not_stored() {
        let h = harness();
        let laptop_id = stored_laptop(&h.service).await;
        let inbound = tokio_stream::iter(vec![
            info_message(&laptop_id, "png"),
            chunk_message(MAX_IMAGE_SIZE),
            chunk_message(1),
        ]);

        let status = h
            .service
            .receive_image(&CallContext::new(), inbound)
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(h.images.is_empty().await);
    }

    #[tokio::test]
    async fn upload_for_unknown_laptop_is_rejected() {
        let h = harness();
        let inbound = tokio_stream::iter(vec![info_message("missing", "png"), chunk_message(1)]);

        let status = h
            .service
            .receive_image(&CallContext::new(), inbound)
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn upload_requires_info_first_and_only_once() {
        let h = harness();
        let laptop_id = stored_laptop(&h.service).await;

        let chunk_first = tokio_stream::iter(vec![chunk_message(1)]);
        let status = h
            .service
            .receive_image(&CallContext::new(), chunk_first)
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);

        let info_twice = tokio_stream::iter(vec![
            info_message(&laptop_id, "png"),
            info_message(&laptop_id, "png"),
        ]);
        let status = h
            .service
            .receive_image(&CallContext::new(), info_twice)
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn upload_rejects_path_like_image_types() {
        let h = harness();
        let laptop_id = stored_laptop(&h.service).await;

        for image_type in ["", "../../etc/passwd", "a/b", "waytoolongextension1"] {
            let inbound = tokio_stream::iter(vec![info_message(&laptop_id, image_type)]);
            let status = h
                .service
                .receive_image(&CallContext::new(), inbound)
                .await
                .unwrap_err();
            assert_eq!(status.code(), Code::InvalidArgument, "type {image_type:?}");
        }
    }

    #[tokio::test]
    async fn upload_observes_cancellation() {
        let h = harness();
        let laptop_id = stored_laptop(&h.service).await;
        let ctx = CallContext::new();
        ctx.cancel();

        let inbound = tokio_stream::iter(vec![info_message(&laptop_id, "png"), chunk_message(1)]);
        let status = h.service.receive_image(&ctx, inbound).await.unwrap_err();
        assert_eq!(status.code(), Code::Cancelled);
    }

    #[tokio::test]
    async fn rating_responses_follow_arrival_order() {
        let h = harness();
        let a = stored_laptop(&h.service).await;
        let b = stored_laptop(&h.service).await;
        let scores = vec![(a.clone(), 8.0), (b.clone(), 3.0), (a.clone(), 4.0)];
        let inbound = tokio_stream::iter(scores.into_iter().map(|(laptop_id, score)| {
            Ok(RateLaptopRequest { laptop_id, score })
        }));

        let (tx, mut rx) = mpsc::channel(STREAM_BUFFER);
        let rated = h
            .service
            .rate(&CallContext::new(), inbound, &tx)
            .await
            .unwrap();
        assert_eq!(rated, 3);

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!((first.laptop_id.as_str(), first.rated_count), (a.as_str(), 1));
        assert_eq!(first.average_score, 8.0);

        let second = rx.recv().await.unwrap().unwrap();
        assert_eq!((second.laptop_id.as_str(), second.rated_count), (b.as_str(), 1));

        let third = rx.recv().await.unwrap().unwrap();
        assert_eq!(third.rated_count, 2);
        assert_eq!(third.average_score, 6.0);
    }

    #[tokio::test]
    async fn rating_an_unknown_laptop_is_not_found() {
        let h = harness();
        let inbound = tokio_stream::iter(vec![Ok(RateLaptopRequest {
            laptop_id: "ghost".to_string(),
            score: 5.0,
        })]);

        let (tx, _rx) = mpsc::channel(STREAM_BUFFER);
        let status = h
            .service
            .rate(&CallContext::new(), inbound, &tx)
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
        assert!(h.service.ratings().get("ghost").await.is_none());
    }

    #[tokio::test]
    async fn unknown_laptop_ends_the_rating_stream() {
        let h = harness();
        let known = stored_laptop(&h.service).await;
        let scores = vec![
            (known.clone(), 8.0),
            ("ghost".to_string(), 5.0),
            (known.clone(), 2.0),
        ];
        let inbound = tokio_stream::iter(scores.into_iter().map(|(laptop_id, score)| {
            Ok(RateLaptopRequest { laptop_id, score })
        }));

        let (tx, mut rx) = mpsc::channel(STREAM_BUFFER);
        let status = h
            .service
            .rate(&CallContext::new(), inbound, &tx)
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
        drop(tx);

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.laptop_id, known);
        assert_eq!(first.rated_count, 1);
        assert!(rx.recv().await.is_none());

        let rating = h.service.ratings().get(&known).await.unwrap();
        assert_eq!(rating.count, 1);
        assert_eq!(rating.average(), 8.0);
    }

    #[tokio::test]
    async fn telemetry_is_counted_and_republished() {
        let h = harness();
        let mut subscriber = h.bus.subscribe();
        let inbound = tokio_stream::iter((0..3).map(|i| {
            Ok(SendLaptopInfoRequest {
                laptop: Some(LaptopInfo {
                    id: format!("device-{i}"),
                    battery: 80,
                    ..Default::default()
                }),
            })
        }));

        let response = h
            .service
            .receive_info(&CallContext::new(), inbound)
            .await
            .unwrap();
        assert_eq!(response.received, 3);
        assert_eq!(response.msg, "finished receiving 3 laptop infos.");

        let message = subscriber.recv().await.unwrap();
        assert_eq!(message.topic, LAPTOP_UPDATES_TOPIC);
        let info: LaptopInfo = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(info.id, "device-0");
        assert_eq!(info.battery, 80);
    }

    #[tokio::test]
    async fn telemetry_survives_a_bus_without_subscribers() {
        let h = harness();
        assert_eq!(h.bus.subscriber_count(), 0);
        let inbound = tokio_stream::iter(vec![Ok(SendLaptopInfoRequest::default())]);

        let response = h
            .service
            .receive_info(&CallContext::new(), inbound)
            .await
            .unwrap();
        assert_eq!(response.received, 1);
    }

    #[tokio::test]
    async fn empty_telemetry_stream_reports_zero() {
        let h = harness();
        let inbound = tokio_stream::iter(Vec::<Result<SendLaptopInfoRequest, Status>>::new());

        let response = h
            .service
            .receive_info(&CallContext::new(), inbound)
            .await
            .unwrap();
        assert_eq!(response.received, 0);
        assert_eq!(response.msg, "finished receiving 0 laptop infos.");
    }

    #[test]
    fn image_type_keeps_a_bare_extension() {
        assert_eq!(validate_image_type(".jpg").unwrap(), "jpg");
        assert_eq!(validate_image_type("PNG").unwrap(), "PNG");
        assert!(validate_image_type("..jpg").is_err());
    }
}
