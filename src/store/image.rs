use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;

/// Where a stored image lives and which laptop it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    /// Laptop the image was uploaded for.
    pub laptop_id: String,
    /// Declared image type, used as the file extension.
    pub image_type: String,
    /// Location of the written file.
    pub path: PathBuf,
}

/// Sink for finished image uploads.
#[tonic::async_trait]
pub trait ImageStore: Send + Sync + 'static {
    /// Persists `data` and returns the new image id.
    async fn save(
        &self,
        laptop_id: &str,
        image_type: &str,
        data: Vec<u8>,
    ) -> Result<String, StoreError>;
}

/// Writes each image to `<folder>/<id>.<type>` and keeps an in-memory index.
///
/// Image bytes are not retained after the write.
pub struct DiskImageStore {
    folder: PathBuf,
    images: Arc<RwLock<HashMap<String, ImageInfo>>>,
}

impl Clone for DiskImageStore {
    fn clone(&self) -> Self {
        Self {
            folder: self.folder.clone(),
            images: Arc::clone(&self.images),
        }
    }
}

impl DiskImageStore {
    /// Creates a store rooted at `folder`. The folder is created on first save.
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            images: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Directory images are written to.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Metadata of the image with `image_id`.
    pub async fn get(&self, image_id: &str) -> Option<ImageInfo> {
        self.images.read().await.get(image_id).cloned()
    }

    /// Number of images written so far.
    pub async fn len(&self) -> usize {
        self.images.read().await.len()
    }

    /// Whether no image has been written yet.
    pub async fn is_empty(&self) -> bool {
        self.images.read().await.is_empty()
    }
}

#[tonic::async_trait]
impl ImageStore for DiskImageStore {
    async fn save(
        &self,
        laptop_id: &str,
        image_type: &str,
        data: Vec<u8>,
    ) -> Result<String, StoreError> {
        let image_id = Uuid::new_v4().to_string();
        let path = self.folder.join(format!("{image_id}.{image_type}"));

        tokio::fs::create_dir_all(&self.folder).await?;
        tokio::fs::write(&path, &data).await?;
        debug!("wrote {} bytes to {}", data.len(), path.display());

        self.images.write().await.insert(
            image_id.clone(),
            ImageInfo {
                laptop_id: laptop_id.to_string(),
                image_type: image_type.to_string(),
                path,
            },
        );

        Ok(image_id)
    }
}
