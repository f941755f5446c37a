//! Input handling: footage decoding and the slide library.

pub mod footage;
pub mod slides;

pub use footage::{Footage, Frame, FrameSource, VideoFootage, FRAMESKIP};
pub use slides::SlideLibrary;
