//! Scoped video encoder.
//!
//! Thin wrapper over OpenCV's `VideoWriter` that opens the container on
//! construction and releases it when the value goes out of scope, however the
//! pipeline ends. Supports appending frames and repeating the last one, which
//! is all the slideshow renderer needs.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use opencv::core::{AlgorithmHint, Mat, Size};
use opencv::imgproc;
use opencv::prelude::*;
use opencv::videoio::VideoWriter;
use tracing::{debug, warn};

pub struct VideoEncoder {
    writer: VideoWriter,
    path: PathBuf,
    size: Size,
    /// Kept for the repeat operation.
    last_frame: Option<Mat>,
    frames_written: u64,
    closed: bool,
}

impl VideoEncoder {
    /// Open the output file and write the container header.
    pub fn new<P: AsRef<Path>>(path: P, width: u32, height: u32, framerate: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let path_str = path
            .to_str()
            .with_context(|| format!("non-UTF-8 output path {:?}", path))?;

        let size = Size::new(width as i32, height as i32);

        // H.264 in an MP4 container; fall back to MPEG-4 Part 2 when the
        // build carries no H.264 encoder
        let mut writer = VideoWriter::new(
            path_str,
            VideoWriter::fourcc('a', 'v', 'c', '1')?,
            f64::from(framerate),
            size,
            true,
        )?;

        if !writer.is_opened()? {
            warn!("no H.264 encoder available, falling back to mp4v");
            writer = VideoWriter::new(
                path_str,
                VideoWriter::fourcc('m', 'p', '4', 'v')?,
                f64::from(framerate),
                size,
                true,
            )?;
        }

        if !writer.is_opened()? {
            bail!("can't open output video file {:?}", path);
        }

        Ok(Self {
            writer,
            path,
            size,
            last_frame: None,
            frames_written: 0,
            closed: false,
        })
    }

    /// Append a frame. Grayscale input is expanded to BGR; any input is
    /// resized to the output dimensions if it does not match them.
    pub fn write(&mut self, image: &Mat) -> Result<()> {
        if self.closed {
            bail!("encoder for {:?} is already closed", self.path);
        }

        let mut frame = if image.channels() == 1 {
            let mut bgr = Mat::default();
            imgproc::cvt_color(
                image,
                &mut bgr,
                imgproc::COLOR_GRAY2BGR,
                0,
                AlgorithmHint::ALGO_HINT_DEFAULT,
            )?;
            bgr
        } else {
            image.clone()
        };

        if frame.size()? != self.size {
            let mut resized = Mat::default();
            imgproc::resize(&frame, &mut resized, self.size, 0.0, 0.0, imgproc::INTER_AREA)?;
            frame = resized;
        }

        self.writer.write(&frame)?;
        self.frames_written += 1;
        self.last_frame = Some(frame);

        Ok(())
    }

    /// Re-encode the last written frame `count` more times.
    pub fn repeat(&mut self, count: u32) -> Result<()> {
        if self.closed {
            bail!("encoder for {:?} is already closed", self.path);
        }

        let frame = match &self.last_frame {
            Some(frame) => frame.clone(),
            None => bail!("nothing to repeat: no frame written yet"),
        };

        for _ in 0..count {
            self.writer.write(&frame)?;
        }
        self.frames_written += u64::from(count);

        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Flush and close the output file. Further writes fail.
    pub fn finish(&mut self) -> Result<()> {
        if !self.closed {
            self.writer.release()?;
            self.closed = true;
            debug!("encoded {} frames to {:?}", self.frames_written, self.path);
        }

        Ok(())
    }
}

impl Drop for VideoEncoder {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(error) = self.writer.release() {
                warn!("releasing encoder for {:?}: {}", self.path, error);
            }
            self.closed = true;
        }
    }
}
