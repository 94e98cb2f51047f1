use tokio::sync::mpsc;
use tonic::{Code, Status};
use tracing::{debug, info};

use super::telemetry::TelemetrySender;
use super::AuthenticatedChannel;
use crate::pb::upload_image_request::Data;
use crate::pb::{
    CreateLaptopRequest, Filter, ImageInfo, Laptop, LaptopInfo, LaptopServiceClient,
    RateLaptopRequest, RateLaptopResponse, SearchLaptopRequest, UploadImageRequest,
    UploadImageResponse,
};

/// Size of each chunk an image is split into for upload.
pub const CHUNK_SIZE: usize = 1024;

/// Convenience wrapper over the generated laptop service client.
#[derive(Clone)]
pub struct LaptopClient {
    service: LaptopServiceClient<AuthenticatedChannel>,
}

impl LaptopClient {
    pub fn new(channel: AuthenticatedChannel) -> Self {
        Self {
            service: LaptopServiceClient::new(channel),
        }
    }

    /// The underlying generated client.
    pub fn service(&self) -> LaptopServiceClient<AuthenticatedChannel> {
        self.service.clone()
    }

    /// Creates `laptop`, returning the id the server stored it under.
    pub async fn create_laptop(&self, laptop: Laptop) -> Result<String, Status> {
        let mut service = self.service.clone();
        let response = service
            .create_laptop(CreateLaptopRequest {
                laptop: Some(laptop),
            })
            .await;

        match response {
            Ok(response) => {
                let id = response.into_inner().id;
                info!(%id, "created laptop");
                Ok(id)
            }
            Err(status) if status.code() == Code::AlreadyExists => {
                info!("laptop already exists");
                Err(status)
            }
            Err(status) => Err(status),
        }
    }

    /// Collects every laptop matching `filter`.
    pub async fn search_laptop(&self, filter: Filter) -> Result<Vec<Laptop>, Status> {
        let mut service = self.service.clone();
        let mut stream = service
            .search_laptop(SearchLaptopRequest {
                filter: Some(filter),
            })
            .await?
            .into_inner();

        let mut found = Vec::new();
        while let Some(response) = stream.message().await? {
            if let Some(laptop) = response.laptop {
                debug!(id = %laptop.id, "found laptop");
                found.push(laptop);
            }
        }

        Ok(found)
    }

    /// Uploads `image` for `laptop_id`: one info message, then `CHUNK_SIZE` chunks.
    pub async fn upload_image(
        &self,
        laptop_id: &str,
        image_type: &str,
        image: &[u8],
    ) -> Result<UploadImageResponse, Status> {
        let mut requests = vec![UploadImageRequest {
            data: Some(Data::Info(ImageInfo {
                laptop_id: laptop_id.to_string(),
                image_type: image_type.to_string(),
            })),
        }];
        requests.extend(image.chunks(CHUNK_SIZE).map(|chunk| UploadImageRequest {
            data: Some(Data::ChunkData(chunk.to_vec())),
        }));

        let mut service = self.service.clone();
        let response = service
            .upload_image(tokio_stream::iter(requests))
            .await?
            .into_inner();

        info!(id = %response.id, size = response.size, "uploaded image");
        Ok(response)
    }

    /// Sends every `(laptop_id, score)` pair on one stream and collects the
    /// answers in order.
    pub async fn rate_laptop(
        &self,
        scores: Vec<(String, f64)>,
    ) -> Result<Vec<RateLaptopResponse>, Status> {
        let requests: Vec<_> = scores
            .into_iter()
            .map(|(laptop_id, score)| RateLaptopRequest { laptop_id, score })
            .collect();

        let mut service = self.service.clone();
        let mut stream = service
            .rate_laptop(tokio_stream::iter(requests))
            .await?
            .into_inner();

        let mut responses = Vec::new();
        while let Some(response) = stream.message().await? {
            debug!(
                laptop_id = %response.laptop_id,
                rated_count = response.rated_count,
                average_score = response.average_score,
                "received rating"
            );
            responses.push(response);
        }

        Ok(responses)
    }

    /// A sender that streams snapshots from `queue` until it is closed.
    pub fn telemetry_sender(&self, queue: mpsc::Receiver<LaptopInfo>) -> TelemetrySender {
        TelemetrySender::new(self.service.clone(), queue)
    }
}
