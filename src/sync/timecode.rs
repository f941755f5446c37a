//! Frame index <-> timestamp text conversion.
//!
//! Stamps follow the `HH:MM:SS.FF` shape, where the frame field is padded to
//! as many decimal digits as the framerate needs. Note that such a stamp is
//! almost but not quite wall-clock time: a 23.976 Hz recording is counted as
//! 24 frames per second.

/// Number of characters needed to write `x` in decimal.
pub fn decimal_width(x: u32) -> usize {
    if x == 0 {
        return 1;
    }

    let mut width = 0;
    let mut power = 1u64;

    while u64::from(x) >= power {
        power *= 10;
        width += 1;
    }

    width
}

/// Render a frame index as `HH:MM:SS.FF`, or as a raw decimal index when the
/// framerate is unknown (zero).
pub fn format_stamp(index: u32, framerate: u32) -> String {
    if framerate == 0 {
        return index.to_string();
    }

    let frames = index % framerate;
    let total_seconds = index / framerate;

    let seconds = total_seconds % 60;
    let total_minutes = total_seconds / 60;

    let minutes = total_minutes % 60;
    let hours = total_minutes / 60;

    format!(
        "{:02}:{:02}:{:02}.{:0width$}",
        hours,
        minutes,
        seconds,
        frames,
        width = decimal_width(framerate)
    )
}

/// Parse a stamp back into a frame index.
///
/// Accepts whatever `format_stamp` produces for the same framerate: the
/// `HH:MM:SS.FF` shape when the framerate is nonzero (any frame-field width),
/// a raw decimal index otherwise. Returns `None` on any mismatch.
pub fn parse_stamp(stamp: &str, framerate: u32) -> Option<u32> {
    let stamp = stamp.trim();

    if framerate == 0 {
        return stamp.parse().ok();
    }

    let (clock, frames) = stamp.split_once('.')?;
    let mut clock_fields = clock.split(':');

    let hours: u32 = clock_fields.next()?.parse().ok()?;
    let minutes: u32 = clock_fields.next()?.parse().ok()?;
    let seconds: u32 = clock_fields.next()?.parse().ok()?;

    if clock_fields.next().is_some() {
        return None;
    }

    let frames: u32 = frames.parse().ok()?;

    Some(((hours * 60 + minutes) * 60 + seconds) * framerate + frames)
}
