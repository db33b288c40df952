use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::Context;
use image::ImageFormat;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Url};
use tokio::io::AsyncReadExt;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{Credentials, LoaderOptions};
use crate::error::LoadError;
use crate::events::RasterImage;

/// Progress reported once when an image arrives through the direct fallback.
pub const FALLBACK_PROGRESS: (u64, u64) = (100, 100);

// Upper bound for buffer preallocation from an advertised Content-Length.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Remote(Url),
    Local(PathBuf),
}

impl ImageSource {
    /// `http(s)://` URLs are fetched remotely, `file://` URLs and anything
    /// without a scheme are read from disk.
    pub fn parse(src: &str) -> Result<Self, LoadError> {
        let src = src.trim();
        if let Ok(url) = Url::parse(src) {
            match url.scheme() {
                "http" | "https" => return Ok(Self::Remote(url)),
                "file" => {
                    return url
                        .to_file_path()
                        .map(Self::Local)
                        .map_err(|_| LoadError::Network(format!("invalid file URL {src}")));
                }
                // single letters are Windows drive prefixes
                scheme if scheme.len() > 1 => {
                    return Err(LoadError::Network(format!(
                        "unsupported URL scheme `{scheme}`"
                    )));
                }
                _ => {}
            }
        }
        Ok(Self::Local(PathBuf::from(src)))
    }

    fn path_hint(&self) -> Option<ImageFormat> {
        match self {
            ImageSource::Remote(url) => format_from_path(Path::new(url.path())),
            ImageSource::Local(path) => format_from_path(path),
        }
    }
}

/// Credential handling for a direct fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialMode {
    Anonymous,
    UseCredentials,
}

struct Fetched {
    bytes: Vec<u8>,
    hint: Option<ImageFormat>,
}

#[derive(Debug, Clone)]
pub struct ImageLoader {
    client: Client,
    options: LoaderOptions,
}

impl ImageLoader {
    pub fn new(options: LoaderOptions) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(options.request_timeout)
            .connect_timeout(options.connect_timeout)
            .user_agent(options.user_agent.clone())
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, options })
    }

    /// Streams `src`, reporting `(loaded, total)` whenever the total size is
    /// known, and decodes it. Falls back to whole-resource fetches if the
    /// streaming attempt fails. Once `cancel` fires no further progress is
    /// reported and the result is [`LoadError::Cancelled`].
    pub async fn load<F>(
        &self,
        src: &str,
        mut on_progress: F,
        cancel: &CancellationToken,
    ) -> Result<RasterImage, LoadError>
    where
        F: FnMut(u64, u64) + Send,
    {
        ensure_live(cancel)?;
        let source = ImageSource::parse(src)?;

        match self.stream(&source, &mut on_progress, cancel).await {
            Ok(fetched) => match decode(fetched.bytes, fetched.hint, cancel).await {
                Ok(raster) => {
                    debug!(source = src, width = raster.width, height = raster.height, "image loaded");
                    return Ok(raster);
                }
                Err(LoadError::Cancelled) => return Err(LoadError::Cancelled),
                Err(err) => {
                    warn!(source = src, error = %err, "streamed image failed to decode; trying direct load");
                }
            },
            Err(err @ (LoadError::Cancelled | LoadError::Timeout)) => return Err(err),
            Err(err) => {
                warn!(source = src, error = %err, "streaming read failed; trying direct load");
            }
        }

        self.load_direct(&source, &mut on_progress, cancel).await
    }

    async fn stream<F>(
        &self,
        source: &ImageSource,
        on_progress: &mut F,
        cancel: &CancellationToken,
    ) -> Result<Fetched, LoadError>
    where
        F: FnMut(u64, u64) + Send,
    {
        match source {
            ImageSource::Remote(url) => self.stream_remote(url, on_progress, cancel).await,
            ImageSource::Local(path) => self.stream_local(path, on_progress, cancel).await,
        }
    }

    async fn stream_remote<F>(
        &self,
        url: &Url,
        on_progress: &mut F,
        cancel: &CancellationToken,
    ) -> Result<Fetched, LoadError>
    where
        F: FnMut(u64, u64) + Send,
    {
        let request = self.request(url, CredentialMode::Anonymous);
        let response = select! {
            biased;
            _ = cancel.cancelled() => return Err(LoadError::Cancelled),
            res = request.send() => res.map_err(classify)?,
        };
        let mut response = response.error_for_status().map_err(classify)?;
        let total = response.content_length().filter(|len| *len > 0);
        let hint = mime_hint(&response).or_else(|| format_from_path(Path::new(url.path())));

        let mut bytes = Vec::with_capacity(total.unwrap_or(0).min(MAX_PREALLOC) as usize);
        loop {
            let chunk = select! {
                biased;
                _ = cancel.cancelled() => return Err(LoadError::Cancelled),
                chunk = response.chunk() => chunk.map_err(classify)?,
            };
            let Some(chunk) = chunk else {
                break;
            };
            bytes.extend_from_slice(&chunk);
            ensure_live(cancel)?;
            trace!(loaded = bytes.len(), ?total, "chunk received");
            if let Some(total) = total {
                on_progress(bytes.len() as u64, total);
            }
        }
        Ok(Fetched { bytes, hint })
    }

    async fn stream_local<F>(
        &self,
        path: &Path,
        on_progress: &mut F,
        cancel: &CancellationToken,
    ) -> Result<Fetched, LoadError>
    where
        F: FnMut(u64, u64) + Send,
    {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|err| io_error(path, err))?;
        let total = file
            .metadata()
            .await
            .ok()
            .map(|meta| meta.len())
            .filter(|len| *len > 0);

        let mut bytes = Vec::with_capacity(total.unwrap_or(0).min(MAX_PREALLOC) as usize);
        let mut buf = vec![0u8; self.options.read_chunk_size.max(1)];
        loop {
            let read = select! {
                biased;
                _ = cancel.cancelled() => return Err(LoadError::Cancelled),
                read = file.read(&mut buf) => read.map_err(|err| io_error(path, err))?,
            };
            if read == 0 {
                break;
            }
            bytes.extend_from_slice(&buf[..read]);
            ensure_live(cancel)?;
            if let Some(total) = total {
                let loaded = bytes.len() as u64;
                on_progress(loaded, total.max(loaded));
            }
        }
        Ok(Fetched {
            bytes,
            hint: format_from_path(path),
        })
    }

    fn fallback_modes(&self, source: &ImageSource) -> Vec<CredentialMode> {
        match source {
            ImageSource::Remote(_) if self.options.credentials.is_some() => {
                vec![CredentialMode::Anonymous, CredentialMode::UseCredentials]
            }
            _ => vec![CredentialMode::Anonymous],
        }
    }

    async fn load_direct<F>(
        &self,
        source: &ImageSource,
        on_progress: &mut F,
        cancel: &CancellationToken,
    ) -> Result<RasterImage, LoadError>
    where
        F: FnMut(u64, u64) + Send,
    {
        let mut transport_error = None;
        let mut decode_error = None;

        for mode in self.fallback_modes(source) {
            ensure_live(cancel)?;
            let fetched = match self.fetch_whole(source, mode, cancel).await {
                Ok(fetched) => fetched,
                Err(err @ (LoadError::Cancelled | LoadError::Timeout)) => return Err(err),
                Err(err) => {
                    debug!(?mode, error = %err, "direct fetch failed");
                    transport_error = Some(err);
                    continue;
                }
            };

            match decode(fetched.bytes, fetched.hint, cancel).await {
                Ok(raster) => {
                    ensure_live(cancel)?;
                    let (loaded, total) = FALLBACK_PROGRESS;
                    on_progress(loaded, total);
                    info!(?mode, width = raster.width, height = raster.height, "image loaded by direct fetch");
                    return Ok(raster);
                }
                Err(LoadError::Cancelled) => return Err(LoadError::Cancelled),
                Err(err) => {
                    debug!(?mode, error = %err, "direct decode failed");
                    decode_error = Some(err);
                }
            }
        }

        Err(match (decode_error, transport_error) {
            (Some(err), _) => err,
            (None, Some(err)) => err,
            (None, None) => LoadError::Network("no fetch attempt was made".into()),
        })
    }

    async fn fetch_whole(
        &self,
        source: &ImageSource,
        mode: CredentialMode,
        cancel: &CancellationToken,
    ) -> Result<Fetched, LoadError> {
        match source {
            ImageSource::Remote(url) => {
                let request = self.request(url, mode);
                let response = select! {
                    biased;
                    _ = cancel.cancelled() => return Err(LoadError::Cancelled),
                    res = request.send() => res.map_err(classify)?,
                };
                let response = response.error_for_status().map_err(classify)?;
                let hint = mime_hint(&response).or_else(|| source.path_hint());
                let body = select! {
                    biased;
                    _ = cancel.cancelled() => return Err(LoadError::Cancelled),
                    body = response.bytes() => body.map_err(classify)?,
                };
                Ok(Fetched {
                    bytes: body.to_vec(),
                    hint,
                })
            }
            ImageSource::Local(path) => {
                let bytes = select! {
                    biased;
                    _ = cancel.cancelled() => return Err(LoadError::Cancelled),
                    read = tokio::fs::read(path) => read.map_err(|err| io_error(path, err))?,
                };
                Ok(Fetched {
                    bytes,
                    hint: source.path_hint(),
                })
            }
        }
    }

    fn request(&self, url: &Url, mode: CredentialMode) -> RequestBuilder {
        let builder = self.client.get(url.clone());
        match (mode, self.options.credentials.as_ref()) {
            (CredentialMode::UseCredentials, Some(Credentials::Bearer { token })) => {
                builder.bearer_auth(token)
            }
            (CredentialMode::UseCredentials, Some(Credentials::Basic { username, password })) => {
                builder.basic_auth(username, password.as_ref())
            }
            _ => builder,
        }
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), LoadError> {
    if cancel.is_cancelled() {
        Err(LoadError::Cancelled)
    } else {
        Ok(())
    }
}

fn classify(err: reqwest::Error) -> LoadError {
    if err.is_timeout() {
        LoadError::Timeout
    } else if let Some(status) = err.status() {
        LoadError::Network(format!("HTTP {status}"))
    } else {
        LoadError::Network(err.to_string())
    }
}

fn io_error(path: &Path, err: std::io::Error) -> LoadError {
    LoadError::Network(format!("{}: {err}", path.display()))
}

fn mime_hint(response: &reqwest::Response) -> Option<ImageFormat> {
    let value = response.headers().get(CONTENT_TYPE)?.to_str().ok()?;
    let mime = value.split(';').next()?.trim();
    ImageFormat::from_mime_type(mime)
}

fn format_from_path(path: &Path) -> Option<ImageFormat> {
    path.extension().and_then(ImageFormat::from_extension)
}

async fn decode(
    bytes: Vec<u8>,
    hint: Option<ImageFormat>,
    cancel: &CancellationToken,
) -> Result<RasterImage, LoadError> {
    ensure_live(cancel)?;
    let decoded = tokio::task::spawn_blocking(move || decode_rgba8_apply_exif(&bytes, hint))
        .await
        .map_err(|err| LoadError::Decode(format!("decode task failed: {err}")))?;
    ensure_live(cancel)?;
    let rgba = decoded?;
    let (width, height) = rgba.dimensions();
    Ok(RasterImage::new(width, height, rgba.into_raw()))
}

/// Decodes to RGBA8, sniffing the format first and falling back to `hint`,
/// then applies EXIF orientation when present.
pub fn decode_rgba8_apply_exif(
    bytes: &[u8],
    hint: Option<ImageFormat>,
) -> Result<image::RgbaImage, LoadError> {
    let img = match image::load_from_memory(bytes) {
        Ok(img) => img,
        Err(sniff_err) => match hint {
            Some(format) => image::load_from_memory_with_format(bytes, format)
                .map_err(|err| LoadError::Decode(err.to_string()))?,
            None => return Err(LoadError::Decode(sniff_err.to_string())),
        },
    };
    let orientation = read_orientation(bytes).unwrap_or(1);
    Ok(apply_orientation(img.to_rgba8(), orientation))
}

fn apply_orientation(img: image::RgbaImage, orientation: u32) -> image::RgbaImage {
    use image::imageops::{flip_horizontal, flip_vertical, rotate90, rotate180, rotate270};
    match orientation {
        2 => flip_horizontal(&img),
        3 => rotate180(&img),
        4 => flip_vertical(&img),
        // transpose
        5 => flip_horizontal(&rotate90(&img)),
        6 => rotate90(&img),
        // transverse
        7 => flip_horizontal(&rotate270(&img)),
        8 => rotate270(&img),
        _ => img,
    }
}

fn read_orientation(bytes: &[u8]) -> Option<u32> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let orientation = field.value.get_uint(0)?;
    debug!(orientation, "exif orientation");
    Some(orientation)
}
