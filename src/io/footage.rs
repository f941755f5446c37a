//! Footage input: frame-by-frame decoding and subsampling.
//!
//! Presentations are very static, so processing them at full rate would be
//! wasteful. The footage reader decodes one frame and then discards the next
//! `frameskip` frames with cheap grabs, giving an effective frame count of
//! `length / (frameskip + 1)`, rounded up.

use std::path::Path;

use anyhow::{bail, Context, Result};
use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};

/// Number of frames discarded between processed frames.
pub const FRAMESKIP: u32 = 7;

/// A seekable, re-readable source of decoded video frames.
///
/// Live streams do not qualify: the tracker peeks the first frame during
/// initialization and rewinds, which requires seekability.
pub trait FrameSource {
    /// Decode and return the next frame, or `None` past the end.
    fn read(&mut self) -> Result<Option<Mat>>;

    /// Advance one frame without decoding it.
    fn grab(&mut self) -> Result<()>;

    /// Seek back to the first frame.
    fn rewind(&mut self) -> Result<()>;

    fn frame_count(&self) -> u32;
    fn fps(&self) -> f64;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
}

/// Footage file opened through OpenCV's video IO.
pub struct VideoFootage {
    capture: VideoCapture,
    frame_count: u32,
    fps: f64,
    width: u32,
    height: u32,
}

impl VideoFootage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path
            .to_str()
            .with_context(|| format!("non-UTF-8 footage path {:?}", path))?;

        let capture = VideoCapture::from_file(path_str, videoio::CAP_ANY)
            .with_context(|| format!("opening footage file {:?}", path))?;

        if !capture.is_opened()? {
            bail!("can't open footage video file {:?}", path);
        }

        let frame_count = capture.get(videoio::CAP_PROP_FRAME_COUNT)? as u32;
        let fps = capture.get(videoio::CAP_PROP_FPS)?;
        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;

        Ok(Self {
            capture,
            frame_count,
            fps,
            width,
            height,
        })
    }
}

impl FrameSource for VideoFootage {
    fn read(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();

        if !self.capture.read(&mut frame)? || frame.empty() {
            return Ok(None);
        }

        Ok(Some(frame))
    }

    fn grab(&mut self) -> Result<()> {
        self.capture.grab()?;
        Ok(())
    }

    fn rewind(&mut self) -> Result<()> {
        self.capture.set(videoio::CAP_PROP_POS_FRAMES, 0.0)?;
        Ok(())
    }

    fn frame_count(&self) -> u32 {
        self.frame_count
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

/// A decoded frame together with the two indices that travel with it.
pub struct Frame {
    pub image: Mat,
    /// Absolute decoded-frame index of this frame; used for timestamps.
    pub frame_index: u32,
    /// Processed-frame count, one per kept frame.
    pub coarse_index: u32,
}

/// Subsampling reader over a frame source.
pub struct Footage<S> {
    source: S,
    frameskip: u32,
    /// Absolute index of the next frame to decode.
    frame_index: u32,
    /// Number of frames handed out so far.
    coarse_index: u32,
    length: u32,
}

impl<S: FrameSource> Footage<S> {
    pub fn new(source: S, frameskip: u32) -> Self {
        let length = source.frame_count();

        Self {
            source,
            frameskip,
            frame_index: 0,
            coarse_index: 0,
            length,
        }
    }

    /// Decode the first frame and rewind, leaving the reader untouched.
    ///
    /// Used once during initialization to locate the slide projection before
    /// regular reading starts.
    pub fn peek_first(&mut self) -> Result<Option<Mat>> {
        let frame = self.source.read()?;
        self.source.rewind()?;

        Ok(frame)
    }

    /// Return the next kept frame and skip over the subsampled ones.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.frame_index >= self.length {
            return Ok(None);
        }

        let image = match self.source.read()? {
            Some(image) => image,
            None => return Ok(None),
        };

        let frame = Frame {
            image,
            frame_index: self.frame_index,
            coarse_index: self.coarse_index,
        };

        for _ in 0..self.frameskip {
            self.source.grab()?;
        }

        self.coarse_index += 1;
        self.frame_index += self.frameskip + 1;

        Ok(Some(frame))
    }

    /// Absolute index of the next frame to decode; past the last kept frame
    /// this is the end-of-footage timestamp.
    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    pub fn len(&self) -> u32 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn fps(&self) -> f64 {
        self.source.fps()
    }

    pub fn width(&self) -> u32 {
        self.source.width()
    }

    pub fn height(&self) -> u32 {
        self.source.height()
    }
}
