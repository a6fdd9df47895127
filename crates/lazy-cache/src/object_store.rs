//! Object-store (S3-compatible) cache backend.

use crate::provider::CacheBackend;
use crate::stream::{CHUNK_SIZE, read_chunk};
use crate::types::{ArtifactDetails, ArtifactKeys, ProgressCallback};
use async_trait::async_trait;
use aws_sdk_s3::primitives::{ByteStream, SdkBody};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;
use http_body::{Frame, SizeHint};
use lazy_core::{Compression, Error, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Uploads larger than this go through multipart upload, one part at a time.
pub const PART_SIZE: usize = 8 * 1024 * 1024;

/// Minimal object-store operations the backend needs.
///
/// `head` returns `None` only for a not-found response; every other
/// failure is an error.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn head(&self, bucket: &str, key: &str) -> Result<Option<u64>>;

    async fn download(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
        progress: &ProgressCallback<'_>,
    ) -> Result<()>;

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        src: &Path,
        progress: &ProgressCallback<'_>,
    ) -> Result<()>;
}

fn transport<E>(operation: &'static str, key: &str, err: E) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    Error::ObjectStore {
        operation,
        key: key.to_string(),
        source: Box::new(err),
    }
}

/// Request body of a known length, fed chunk by chunk through a channel.
struct ChannelBody {
    chunks: mpsc::Receiver<Bytes>,
    len: u64,
}

impl http_body::Body for ChannelBody {
    type Data = Bytes;
    type Error = std::convert::Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Bytes>, Self::Error>>> {
        self.chunks
            .poll_recv(cx)
            .map(|chunk| chunk.map(|data| Ok(Frame::data(data))))
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.len)
    }
}

/// Read `len` bytes of `file` into `chunks`, reporting each chunk before
/// handing it over. Stops early once the receiving request is gone.
async fn feed(
    file: &mut File,
    len: u64,
    chunks: mpsc::Sender<Bytes>,
    progress: &ProgressCallback<'_>,
) -> Result<()> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        let n = read_chunk(file, &mut buf[..want]).await?;
        if n == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "file shrank during upload",
            )));
        }
        progress(n as u64);
        if chunks.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
            break;
        }
        remaining -= n as u64;
    }
    Ok(())
}

/// Run `send` with a body streaming the next `len` bytes of `file`.
///
/// The channel holds one chunk, so `progress` advances as the request
/// consumes the body rather than as the file is read.
async fn send_streamed<T, F, Fut>(
    file: &mut File,
    len: u64,
    progress: &ProgressCallback<'_>,
    send: F,
) -> Result<T>
where
    F: FnOnce(ByteStream) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let (tx, rx) = mpsc::channel(1);
    let body = ByteStream::new(SdkBody::from_body_1_x(ChannelBody { chunks: rx, len }));
    let (fed, sent) = tokio::join!(feed(file, len, tx, progress), send(body));
    fed?;
    sent
}

/// [`ObjectStoreClient`] backed by the AWS SDK.
#[derive(Debug, Clone)]
pub struct S3Client {
    inner: aws_sdk_s3::Client,
}

impl S3Client {
    pub fn new(inner: aws_sdk_s3::Client) -> Self {
        Self { inner }
    }

    /// Build a client from the default AWS configuration chain.
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(aws_sdk_s3::Client::new(&config))
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        file: &mut File,
        size: u64,
        progress: &ProgressCallback<'_>,
    ) -> Result<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut offset = 0u64;
        let mut part_number = 1;
        while offset < size {
            let len = (size - offset).min(PART_SIZE as u64);
            let output = send_streamed(file, len, progress, |body| async move {
                self.inner
                    .upload_part()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .part_number(part_number)
                    .content_length(len as i64)
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| transport("upload part", key, e))
            })
            .await?;
            parts.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(String::from))
                    .part_number(part_number)
                    .build(),
            );
            offset += len;
            part_number += 1;
        }
        Ok(parts)
    }
}

#[async_trait]
impl ObjectStoreClient for S3Client {
    async fn head(&self, bucket: &str, key: &str) -> Result<Option<u64>> {
        match self.inner.head_object().bucket(bucket).key(key).send().await {
            Ok(output) => Ok(Some(output.content_length().unwrap_or(0).max(0) as u64)),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(None),
            Err(err) => Err(transport("head", key, err)),
        }
    }

    async fn download(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
        progress: &ProgressCallback<'_>,
    ) -> Result<()> {
        let output = self
            .inner
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| transport("get", key, e))?;

        let mut body = output.body;
        let mut file = File::create(dest)
            .await
            .map_err(Error::path("create", dest))?;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| transport("download", key, e))?
        {
            progress(chunk.len() as u64);
            file.write_all(&chunk)
                .await
                .map_err(Error::path("write", dest))?;
        }
        file.flush().await.map_err(Error::path("write", dest))?;
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        src: &Path,
        progress: &ProgressCallback<'_>,
    ) -> Result<()> {
        let mut file = File::open(src).await.map_err(Error::path("open", src))?;
        let size = file
            .metadata()
            .await
            .map_err(Error::path("stat", src))?
            .len();

        if size <= PART_SIZE as u64 {
            send_streamed(&mut file, size, progress, |body| async move {
                self.inner
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .content_length(size as i64)
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| transport("put", key, e))
            })
            .await?;
            return Ok(());
        }

        let created = self
            .inner
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| transport("create multipart upload", key, e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| Error::ObjectStore {
                operation: "create multipart upload",
                key: key.to_string(),
                source: "response carried no upload id".into(),
            })?
            .to_string();

        let parts = match self
            .upload_parts(bucket, key, &upload_id, &mut file, size, progress)
            .await
        {
            Ok(parts) => parts,
            Err(err) => {
                let aborted = self
                    .inner
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                if let Err(abort_err) = aborted {
                    warn!(key, error = %abort_err, "Failed to abort multipart upload");
                }
                return Err(err);
            }
        };

        self.inner
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| transport("complete multipart upload", key, e))?;
        Ok(())
    }
}

/// Cache stored as objects in a bucket, under a configured key prefix.
pub struct ObjectStoreBackend<C = S3Client> {
    client: C,
    bucket: String,
    path: String,
    compression: Compression,
}

impl<C: ObjectStoreClient> ObjectStoreBackend<C> {
    pub fn new(client: C, bucket: String, path: String, compression: Compression) -> Self {
        Self {
            client,
            bucket,
            path,
            compression,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

#[async_trait]
impl<C: ObjectStoreClient> CacheBackend for ObjectStoreBackend<C> {
    fn artifact_keys(&self, fingerprint: &str) -> ArtifactKeys {
        ArtifactKeys::new(&self.path, fingerprint, self.compression)
    }

    async fn artifact_details(&self, fingerprint: &str) -> Result<Option<ArtifactDetails>> {
        let keys = self.artifact_keys(fingerprint);
        let size = self.client.head(&self.bucket, &keys.archive).await?;
        Ok(size.map(|size| ArtifactDetails { size }))
    }

    async fn get_artifact(
        &self,
        fingerprint: &str,
        progress: &ProgressCallback<'_>,
    ) -> Result<PathBuf> {
        let keys = self.artifact_keys(fingerprint);
        let tmp_path = tempfile::NamedTempFile::new()?.into_temp_path();
        self.client
            .download(&self.bucket, &keys.archive, &tmp_path, progress)
            .await?;
        let local = tmp_path.keep().map_err(|e| Error::Io(e.error))?;
        debug!(bucket = %self.bucket, key = %keys.archive, "Downloaded artifact");
        Ok(local)
    }

    async fn store_artifact(
        &self,
        fingerprint: &str,
        path: &Path,
        progress: &ProgressCallback<'_>,
    ) -> Result<()> {
        let keys = self.artifact_keys(fingerprint);
        self.client
            .upload(&self.bucket, &keys.archive, path, progress)
            .await?;
        debug!(bucket = %self.bucket, key = %keys.archive, "Uploaded artifact");
        Ok(())
    }
}
