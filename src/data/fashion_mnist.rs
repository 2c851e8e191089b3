// ============================================================
// Layer 4 — FashionMNIST Source
// ============================================================
// Downloads (once) and parses the FashionMNIST training split.
//
// On-disk layout mirrors the usual torchvision layout so an
// existing download can be reused:
//
//   data/
//     FashionMNIST/
//       raw/
//         train-images-idx3-ubyte   ← 60000 x 28 x 28 u8
//         train-labels-idx1-ubyte   ← 60000 u8
//
// IDX format (all integers big-endian):
//   images: magic 2051 | count | rows | cols | pixels...
//   labels: magic 2049 | count | labels...

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
};

use crate::domain::image::{ImageItem, NUM_CLASSES};
use crate::domain::traits::ImageSource;

const BASE_URL: &str = "http://fashion-mnist.s3-website.eu-central-1.amazonaws.com";

const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";

const IMAGES_MAGIC: u32 = 2051;
const LABELS_MAGIC: u32 = 2049;

/// FashionMNIST training split rooted at a data directory.
pub struct FashionMnist {
    root:     PathBuf,
    download: bool,
}

impl FashionMnist {
    pub fn new(root: impl Into<PathBuf>, download: bool) -> Self {
        Self { root: root.into(), download }
    }

    fn raw_dir(&self) -> PathBuf {
        self.root.join("FashionMNIST").join("raw")
    }

    /// Return the path of an uncompressed IDX file, downloading it first if
    /// it is missing and downloads are allowed.
    fn ensure_file(&self, name: &str) -> Result<PathBuf> {
        let dir  = self.raw_dir();
        let path = dir.join(name);
        if path.exists() {
            return Ok(path);
        }
        if !self.download {
            bail!(
                "'{}' is missing and download is disabled",
                path.display()
            );
        }

        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create '{}'", dir.display()))?;

        let url   = format!("{BASE_URL}/{name}.gz");
        let bytes = download_gz(&url)?;

        // Write to a sibling file first so an interrupted run never leaves
        // a truncated IDX file behind.
        let partial = dir.join(format!("{name}.partial"));
        fs::write(&partial, &bytes)
            .with_context(|| format!("Cannot write '{}'", partial.display()))?;
        fs::rename(&partial, &path)
            .with_context(|| format!("Cannot move '{}' into place", path.display()))?;

        tracing::info!("Stored {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }
}

impl ImageSource for FashionMnist {
    fn load_train(&self) -> Result<Vec<ImageItem>> {
        let images_path = self.ensure_file(TRAIN_IMAGES)?;
        let labels_path = self.ensure_file(TRAIN_LABELS)?;

        let images = read_file(&images_path)?;
        let labels = read_file(&labels_path)?;

        let (count, rows, cols, pixels) = parse_idx_images(&images)?;
        let labels = parse_idx_labels(&labels)?;
        if labels.len() != count {
            bail!("FashionMNIST has {count} images but {} labels", labels.len());
        }

        let per_image = rows * cols;
        let items = pixels
            .chunks_exact(per_image)
            .zip(labels)
            .map(|(px, label)| ImageItem::new(px.to_vec(), label))
            .collect::<Vec<_>>();

        tracing::info!("Loaded {} FashionMNIST images ({}x{})", items.len(), rows, cols);
        Ok(items)
    }

    fn describe(&self) -> String {
        format!("FashionMNIST at '{}'", self.root.display())
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Cannot read '{}'", path.display()))
}

/// Download a gzip archive and return its decompressed contents.
fn download_gz(url: &str) -> Result<Vec<u8>> {
    tracing::info!("Downloading {url}");
    let mut response = reqwest::blocking::get(url)
        .with_context(|| format!("Request to {url} failed"))?
        .error_for_status()
        .with_context(|| format!("Server rejected {url}"))?;

    let progress = match response.content_length() {
        Some(len) => ProgressBar::new(len),
        None      => ProgressBar::new_spinner(),
    };
    progress.set_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {bytes}/{total_bytes}")?
            .progress_chars("=> "),
    );
    progress.set_message(url.rsplit('/').next().unwrap_or(url).to_string());

    let mut compressed = Vec::new();
    let mut buf        = [0u8; 64 * 1024];
    loop {
        let n = response.read(&mut buf)
            .with_context(|| format!("Reading body of {url}"))?;
        if n == 0 {
            break;
        }
        compressed.extend_from_slice(&buf[..n]);
        progress.inc(n as u64);
    }
    progress.finish_and_clear();

    let mut out = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut out)
        .with_context(|| format!("{url} is not a valid gzip stream"))?;
    Ok(out)
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    let word: [u8; 4] = bytes
        .get(offset..offset + 4)
        .and_then(|s| s.try_into().ok())
        .with_context(|| format!("IDX header truncated at byte {offset}"))?;
    Ok(u32::from_be_bytes(word))
}

/// Parse an IDX3 image file into `(count, rows, cols, pixels)`.
pub fn parse_idx_images(bytes: &[u8]) -> Result<(usize, usize, usize, Vec<u8>)> {
    let magic = read_u32(bytes, 0)?;
    if magic != IMAGES_MAGIC {
        bail!("Bad IDX image magic {magic}, expected {IMAGES_MAGIC}");
    }
    let count = read_u32(bytes, 4)? as usize;
    let rows  = read_u32(bytes, 8)? as usize;
    let cols  = read_u32(bytes, 12)? as usize;

    if rows == 0 || rows != cols {
        bail!("IDX images are {rows}x{cols}, expected non-empty squares");
    }

    let body     = &bytes[16..];
    let expected = count
        .checked_mul(rows)
        .and_then(|n| n.checked_mul(cols))
        .with_context(|| format!("IDX header claims {count} images of {rows}x{cols}, too large"))?;
    if body.len() != expected {
        bail!("IDX image body has {} bytes, expected {expected}", body.len());
    }
    Ok((count, rows, cols, body.to_vec()))
}

/// Parse an IDX1 label file.
pub fn parse_idx_labels(bytes: &[u8]) -> Result<Vec<u8>> {
    let magic = read_u32(bytes, 0)?;
    if magic != LABELS_MAGIC {
        bail!("Bad IDX label magic {magic}, expected {LABELS_MAGIC}");
    }
    let count = read_u32(bytes, 4)? as usize;
    let body  = &bytes[8..];
    if body.len() != count {
        bail!("IDX label body has {} bytes, expected {count}", body.len());
    }
    if let Some((index, label)) = body.iter().enumerate().find(|(_, l)| **l as usize >= NUM_CLASSES) {
        bail!("IDX label {label} at index {index} is outside 0..{NUM_CLASSES}");
    }
    Ok(body.to_vec())
}
