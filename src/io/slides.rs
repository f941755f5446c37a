//! Slide library: page images, fitted to the footage frame, with a PNG cache.
//!
//! Rasterization of the source document is external; this module consumes a
//! directory of page images in natural filename order, resizes them to fit
//! the recording frame and keeps the result cached next to the footage so
//! later runs skip the conversion.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use opencv::core::{Mat, Size, Vector};
use opencv::imgcodecs::{self, IMREAD_GRAYSCALE};
use opencv::imgproc;
use opencv::prelude::*;
use tracing::{debug, info};

/// Compare strings lexicographically, but treating runs of digits as
/// indivisible units, so "a" < "b", "1" < "2" and "frame-5" < "frame-23".
///
/// Digit runs of different length compare by length; equal-length runs
/// compare lexicographically, which for equal lengths matches numeric order.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut i = 0;
    let mut k = 0;

    while i < a.len() && k < b.len() {
        if a[i].is_ascii_digit() && b[k].is_ascii_digit() {
            let mut p = i + 1;
            let mut q = k + 1;

            while p < a.len() && a[p].is_ascii_digit() {
                p += 1;
            }
            while q < b.len() && b[q].is_ascii_digit() {
                q += 1;
            }

            match (p - i).cmp(&(q - k)) {
                Ordering::Equal => {}
                unequal => return unequal,
            }

            while i < p {
                match a[i].cmp(&b[k]) {
                    Ordering::Equal => {}
                    unequal => return unequal,
                }
                i += 1;
                k += 1;
            }
        } else {
            match a[i].cmp(&b[k]) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
            i += 1;
            k += 1;
        }
    }

    (a.len() - i).cmp(&(b.len() - k))
}

/// Target size for a page so that it fits inside the frame, preserving the
/// aspect ratio.
fn fit_within(width: u32, height: u32, frame_width: u32, frame_height: u32) -> (u32, u32) {
    let scale = f64::min(
        f64::from(frame_width) / f64::from(width),
        f64::from(frame_height) / f64::from(height),
    );

    let fitted_width = (f64::from(width) * scale).round().max(1.0) as u32;
    let fitted_height = (f64::from(height) * scale).round().max(1.0) as u32;

    (fitted_width, fitted_height)
}

/// List the image files of a directory in natural order.
fn image_files(directory: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(directory)
        .with_context(|| format!("reading slide directory {:?}", directory))?
    {
        let path = entry?.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
            .unwrap_or(false);

        if matches {
            files.push(path);
        }
    }

    files.sort_by(|a, b| {
        natural_cmp(
            &a.file_name().unwrap_or_default().to_string_lossy(),
            &b.file_name().unwrap_or_default().to_string_lossy(),
        )
    });

    Ok(files)
}

fn imread_gray(path: &Path) -> Result<Mat> {
    let path_str = path
        .to_str()
        .with_context(|| format!("non-UTF-8 slide path {:?}", path))?;

    let image = imgcodecs::imread(path_str, IMREAD_GRAYSCALE)
        .with_context(|| format!("reading slide image {:?}", path))?;

    if image.empty() {
        bail!("can't decode slide image {:?}", path);
    }

    Ok(image)
}

/// Ordered sequence of grayscale page images, indexed from zero.
pub struct SlideLibrary {
    images: Vec<Mat>,
}

impl SlideLibrary {
    /// Build a library from already-fitted grayscale images.
    pub fn from_images(images: Vec<Mat>) -> Self {
        Self { images }
    }

    /// Load the library, preferring the cache.
    ///
    /// If `cache_dir` already holds PNG pages they are used as-is; otherwise
    /// the pages are read from `pages_dir`, fitted to the frame size, and
    /// written back to the cache for the next run.
    pub fn load(
        pages_dir: &Path,
        cache_dir: &Path,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Self> {
        if let Some(cached) = Self::from_cache(cache_dir)? {
            info!("loaded {} slides from cache {:?}", cached.len(), cache_dir);
            return Ok(cached);
        }

        let library = Self::from_pages(pages_dir, frame_width, frame_height)?;
        library.save_cache(cache_dir)?;

        Ok(library)
    }

    /// Load cached pages, or `None` when the cache is empty or absent.
    pub fn from_cache(cache_dir: &Path) -> Result<Option<Self>> {
        if !cache_dir.is_dir() {
            return Ok(None);
        }

        let files = image_files(cache_dir, &["png"])?;

        if files.is_empty() {
            return Ok(None);
        }

        let mut images = Vec::with_capacity(files.len());
        for path in &files {
            images.push(imread_gray(path)?);
        }

        Ok(Some(Self { images }))
    }

    /// Read page images from a directory and fit them to the frame size.
    pub fn from_pages(pages_dir: &Path, frame_width: u32, frame_height: u32) -> Result<Self> {
        let files = image_files(pages_dir, &["png", "jpg", "jpeg", "bmp", "tif", "tiff"])?;

        if files.is_empty() {
            bail!("no page images found in {:?}", pages_dir);
        }

        let mut images = Vec::with_capacity(files.len());

        for path in &files {
            let page = imread_gray(path)?;

            let (width, height) = fit_within(
                page.cols() as u32,
                page.rows() as u32,
                frame_width,
                frame_height,
            );

            let mut fitted = Mat::default();
            imgproc::resize(
                &page,
                &mut fitted,
                Size::new(width as i32, height as i32),
                0.0,
                0.0,
                imgproc::INTER_AREA,
            )?;

            debug!(
                "slide {:?}: {}x{} -> {}x{}",
                path.file_name().unwrap_or_default(),
                page.cols(),
                page.rows(),
                width,
                height
            );

            images.push(fitted);
        }

        Ok(Self { images })
    }

    /// Write the fitted pages into the cache directory as `slide-<k>.png`.
    pub fn save_cache(&self, cache_dir: &Path) -> Result<()> {
        fs::create_dir_all(cache_dir)
            .with_context(|| format!("creating cache directory {:?}", cache_dir))?;

        for (i, image) in self.images.iter().enumerate() {
            let path = cache_dir.join(format!("slide-{}.png", i + 1));
            let path_str = path
                .to_str()
                .with_context(|| format!("non-UTF-8 cache path {:?}", path))?;

            imgcodecs::imwrite(path_str, image, &Vector::new())
                .with_context(|| format!("writing cached slide {:?}", path))?;
        }

        Ok(())
    }

    pub fn images(&self) -> &[Mat] {
        &self.images
    }

    pub fn get(&self, index: usize) -> Option<&Mat> {
        self.images.get(index)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}
