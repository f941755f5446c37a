//! Slide synchronization script: an append-only, time-ordered list of
//! instructions that drives a slideshow in lock-step with the footage.
//!
//! Instructions are expected to be added sequentially in time; the renderer
//! reads them in order and cannot revisit parts of the video it already
//! produced.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::sync::timecode::{format_stamp, parse_stamp};

/// Command for a synchronized slideshow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCode {
    Next,
    Previous,
    GoTo,
    End,
}

/// A single synchronization instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncInstruction {
    /// Frame index at which this instruction executes. Absolute when
    /// `relative` is false, an offset from the previous instruction otherwise.
    pub timestamp: u32,
    /// Command to execute.
    pub code: SyncCode,
    /// Target slide index for `GoTo` (zero-based); zero otherwise.
    pub data: u32,
    /// True if `timestamp` is relative to the previous instruction.
    pub relative: bool,
}

/// Failure to append an instruction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("the presentation has no slides")]
    EmptyPresentation,
    #[error("already at the last slide (index {current})")]
    PastEnd { current: u32 },
    #[error("already at the first slide")]
    BeforeStart,
    #[error("slide index {index} out of range (presentation has {length} slides)")]
    OutOfRange { index: u32, length: u32 },
}

/// Failure to parse a serialized script.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed header: expected `{0} = <number>`")]
    Header(&'static str),
    #[error("line {line}: expected an instruction starting with `[`")]
    MissingBracket { line: usize },
    #[error("line {line}: unterminated stamp (no `]`)")]
    UnterminatedStamp { line: usize },
    #[error("line {line}: malformed stamp `{stamp}`")]
    Stamp { line: usize, stamp: String },
    #[error("line {line}: expected `:` after the stamp")]
    MissingColon { line: usize },
    #[error("line {line}: slide number `{number}` is not a valid one-based index")]
    SlideNumber { line: usize, number: String },
    #[error("script ends after {found} of {expected} instructions")]
    Truncated { expected: u32, found: u32 },
}

/// Slide synchronization descriptor.
///
/// Tracks the slide reached by replaying the appended instructions and uses it
/// to validate further additions: the presentation is assumed to start on the
/// first slide, so call `go_to` first if that is not appropriate.
#[derive(Debug, Clone)]
pub struct SyncInstructions {
    instructions: Vec<SyncInstruction>,
    /// Footage frame rate; zero means no framerate is known and stamps are
    /// printed as raw frame indices.
    framerate: u32,
    /// Current slide index after following the instructions.
    current_index: u32,
    /// Number of slides in the presentation.
    length: u32,
}

impl SyncInstructions {
    /// Create an empty script for a presentation of `length` slides.
    pub fn new(length: u32, framerate: u32) -> SyncInstructions {
        SyncInstructions {
            instructions: Vec::new(),
            framerate,
            current_index: 0,
            length,
        }
    }

    pub fn framerate(&self) -> u32 {
        self.framerate
    }

    pub fn slide_count(&self) -> u32 {
        self.length
    }

    /// Slide index reached by replaying all appended instructions.
    pub fn current_index(&self) -> u32 {
        self.current_index
    }

    pub fn instructions(&self) -> &[SyncInstruction] {
        &self.instructions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SyncInstruction> {
        self.instructions.iter()
    }

    /// A zero-slide presentation cannot be navigated at all; checked before
    /// any index arithmetic so `length - 1` can never wrap.
    fn check_nonempty(&self) -> Result<(), SyncError> {
        if self.length == 0 {
            return Err(SyncError::EmptyPresentation);
        }

        Ok(())
    }

    /// Append a "next slide" instruction.
    pub fn next(&mut self, timestamp: u32, relative: bool) -> Result<(), SyncError> {
        self.check_nonempty()?;

        if self.current_index >= self.length - 1 {
            return Err(SyncError::PastEnd {
                current: self.current_index,
            });
        }

        self.instructions.push(SyncInstruction {
            timestamp,
            code: SyncCode::Next,
            data: 0,
            relative,
        });
        self.current_index += 1;

        Ok(())
    }

    /// Append a "previous slide" instruction.
    pub fn previous(&mut self, timestamp: u32, relative: bool) -> Result<(), SyncError> {
        self.check_nonempty()?;

        if self.current_index < 1 {
            return Err(SyncError::BeforeStart);
        }

        self.instructions.push(SyncInstruction {
            timestamp,
            code: SyncCode::Previous,
            data: 0,
            relative,
        });
        self.current_index -= 1;

        Ok(())
    }

    /// Append a "go to slide" instruction. `index` is zero-based.
    pub fn go_to(&mut self, timestamp: u32, index: u32, relative: bool) -> Result<(), SyncError> {
        self.check_nonempty()?;

        if index >= self.length {
            return Err(SyncError::OutOfRange {
                index,
                length: self.length,
            });
        }

        self.instructions.push(SyncInstruction {
            timestamp,
            code: SyncCode::GoTo,
            data: index,
            relative,
        });
        self.current_index = index;

        Ok(())
    }

    /// Append an "end of presentation" instruction. Always succeeds.
    pub fn end(&mut self, timestamp: u32, relative: bool) {
        self.instructions.push(SyncInstruction {
            timestamp,
            code: SyncCode::End,
            data: 0,
            relative,
        });
    }
}

impl fmt::Display for SyncInstructions {
    /// Line-oriented ASCII serialization, LF line endings.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "nslides = {}", self.length)?;
        writeln!(f, "framerate = {}", self.framerate)?;
        writeln!(f, "ninstructions = {}", self.instructions.len())?;

        for instruction in &self.instructions {
            let sign = if instruction.relative { "+" } else { "" };
            let stamp = format_stamp(instruction.timestamp, self.framerate);

            match instruction.code {
                SyncCode::Next => writeln!(f, "[{}{}]: next", sign, stamp)?,
                SyncCode::Previous => writeln!(f, "[{}{}]: previous", sign, stamp)?,
                // slide numbers are one-based on the wire
                SyncCode::GoTo => writeln!(f, "[{}{}]: go to {}", sign, stamp, instruction.data + 1)?,
                SyncCode::End => writeln!(f, "[{}{}]: end", sign, stamp)?,
            }
        }

        Ok(())
    }
}

/// Parse one `key = value` header line.
fn parse_header(line: Option<&str>, key: &'static str) -> Result<u32, ParseError> {
    let line = line.ok_or(ParseError::Header(key))?;
    let rest = line.trim_start().strip_prefix(key).ok_or(ParseError::Header(key))?;
    let value = rest.trim_start().strip_prefix('=').ok_or(ParseError::Header(key))?;

    value.trim().parse().map_err(|_| ParseError::Header(key))
}

impl FromStr for SyncInstructions {
    type Err = ParseError;

    /// Parse a serialized script.
    ///
    /// Strict on the keyword grammar, lenient about whitespace inside the
    /// stamp brackets. Lines whose instruction keyword is unrecognized are
    /// skipped. The parsed script reports `current_index` zero and is meant
    /// to be consumed read-only.
    fn from_str(descriptor: &str) -> Result<SyncInstructions, ParseError> {
        let mut lines = descriptor.lines();

        let length = parse_header(lines.next(), "nslides")?;
        let framerate = parse_header(lines.next(), "framerate")?;
        let ninstructions = parse_header(lines.next(), "ninstructions")?;

        let mut instructions = Vec::new();
        let mut found = 0;

        while found < ninstructions {
            let line_number = found as usize + 4;
            let line = lines.next().ok_or(ParseError::Truncated {
                expected: ninstructions,
                found,
            })?;
            found += 1;

            let rest = line
                .trim_start()
                .strip_prefix('[')
                .ok_or(ParseError::MissingBracket { line: line_number })?;
            let (bracket, rest) = rest
                .split_once(']')
                .ok_or(ParseError::UnterminatedStamp { line: line_number })?;

            let bracket = bracket.trim();
            let (relative, stamp_text) = match bracket.strip_prefix('+') {
                Some(stripped) => (true, stripped),
                None => (false, bracket),
            };

            let timestamp =
                parse_stamp(stamp_text, framerate).ok_or_else(|| ParseError::Stamp {
                    line: line_number,
                    stamp: bracket.to_string(),
                })?;

            let rest = rest
                .trim_start()
                .strip_prefix(':')
                .ok_or(ParseError::MissingColon { line: line_number })?;
            let keyword = rest.trim();

            let (code, data) = if keyword == "next" {
                (SyncCode::Next, 0)
            } else if keyword == "previous" {
                (SyncCode::Previous, 0)
            } else if keyword == "end" {
                (SyncCode::End, 0)
            } else if let Some(number) = keyword.strip_prefix("go to ") {
                let number = number.trim();
                let one_based: u32 =
                    number.parse().map_err(|_| ParseError::SlideNumber {
                        line: line_number,
                        number: number.to_string(),
                    })?;

                if one_based == 0 {
                    return Err(ParseError::SlideNumber {
                        line: line_number,
                        number: number.to_string(),
                    });
                }

                (SyncCode::GoTo, one_based - 1)
            } else {
                // unrecognized instruction lines are skipped
                continue;
            };

            instructions.push(SyncInstruction {
                timestamp,
                code,
                data,
                relative,
            });
        }

        Ok(SyncInstructions {
            instructions,
            framerate,
            current_index: 0,
            length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn next_advances_until_last_slide() {
        let mut sync = SyncInstructions::new(3, 24);

        assert_eq!(sync.next(10, false), Ok(()));
        assert_eq!(sync.next(20, false), Ok(()));
        assert_eq!(sync.current_index(), 2);
        assert_eq!(sync.next(30, false), Err(SyncError::PastEnd { current: 2 }));
        assert_eq!(sync.instructions().len(), 2);
    }

    #[test]
    fn previous_refuses_before_first_slide() {
        let mut sync = SyncInstructions::new(3, 24);

        assert_eq!(sync.previous(10, false), Err(SyncError::BeforeStart));
        sync.next(10, false).unwrap();
        assert_eq!(sync.previous(20, false), Ok(()));
        assert_eq!(sync.current_index(), 0);
    }

    #[test]
    fn go_to_validates_bounds() {
        let mut sync = SyncInstructions::new(3, 24);

        assert_eq!(sync.go_to(10, 2, false), Ok(()));
        assert_eq!(sync.current_index(), 2);
        assert_eq!(
            sync.go_to(20, 3, false),
            Err(SyncError::OutOfRange { index: 3, length: 3 })
        );
        assert_eq!(sync.current_index(), 2);
    }

    #[test]
    fn zero_slide_presentation_rejects_navigation() {
        let mut sync = SyncInstructions::new(0, 24);

        assert_eq!(sync.next(0, false), Err(SyncError::EmptyPresentation));
        assert_eq!(sync.previous(0, false), Err(SyncError::EmptyPresentation));
        assert_eq!(sync.go_to(0, 0, false), Err(SyncError::EmptyPresentation));
        assert!(sync.instructions().is_empty());
    }

    #[test]
    fn end_always_appends() {
        let mut sync = SyncInstructions::new(0, 0);
        sync.end(100, false);
        assert_eq!(sync.instructions().len(), 1);
    }

    #[test]
    fn serializes_the_expected_wire_format() {
        let mut sync = SyncInstructions::new(3, 24);
        sync.next(24, false).unwrap();
        sync.next(48, false).unwrap();
        sync.end(72, false);

        assert_eq!(
            sync.to_string(),
            "nslides = 3\n\
             framerate = 24\n\
             ninstructions = 3\n\
             [00:00:01.00]: next\n\
             [00:00:02.00]: next\n\
             [00:00:03.00]: end\n"
        );
    }

    #[test]
    fn serializes_go_to_one_based() {
        let mut sync = SyncInstructions::new(3, 24);
        sync.go_to(24, 2, false).unwrap();
        sync.go_to(48, 0, false).unwrap();
        sync.end(72, false);

        assert_eq!(
            sync.to_string(),
            "nslides = 3\n\
             framerate = 24\n\
             ninstructions = 3\n\
             [00:00:01.00]: go to 3\n\
             [00:00:02.00]: go to 1\n\
             [00:00:03.00]: end\n"
        );
    }

    #[test]
    fn relative_stamps_carry_a_plus() {
        let mut sync = SyncInstructions::new(2, 0);
        sync.next(10, true).unwrap();

        assert!(sync.to_string().contains("[+10]: next"));

        let parsed: SyncInstructions = sync.to_string().parse().unwrap();
        assert!(parsed.instructions()[0].relative);
        assert_eq!(parsed.instructions()[0].timestamp, 10);
    }

    #[test]
    fn parses_with_lenient_bracket_whitespace() {
        let text = "nslides = 2\n\
                    framerate = 0\n\
                    ninstructions = 2\n\
                    [ 10 ]: next\n\
                    [  20]: previous\n";

        let parsed: SyncInstructions = text.parse().unwrap();
        assert_eq!(parsed.instructions().len(), 2);
        assert_eq!(parsed.instructions()[0].timestamp, 10);
        assert_eq!(parsed.current_index(), 0);
    }

    #[test]
    fn skips_unrecognized_instruction_lines() {
        let text = "nslides = 2\n\
                    framerate = 0\n\
                    ninstructions = 3\n\
                    [10]: next\n\
                    [15]: wiggle\n\
                    [20]: previous\n";

        let parsed: SyncInstructions = text.parse().unwrap();
        assert_eq!(parsed.instructions().len(), 2);
    }

    #[test]
    fn rejects_malformed_headers_and_stamps() {
        assert!("slides = 3\n".parse::<SyncInstructions>().is_err());
        assert!("nslides = 3\nframerate = x\n".parse::<SyncInstructions>().is_err());

        let bad_stamp = "nslides = 2\n\
                         framerate = 24\n\
                         ninstructions = 1\n\
                         [00:00:01]: next\n";
        assert!(bad_stamp.parse::<SyncInstructions>().is_err());

        let truncated = "nslides = 2\n\
                         framerate = 24\n\
                         ninstructions = 2\n\
                         [00:00:01.00]: next\n";
        assert!(truncated.parse::<SyncInstructions>().is_err());
    }

    /// Replay a sequence of arbitrary valid operations and check that
    /// `current_index` always equals the slide implied by the sequence.
    #[test]
    fn current_index_replays_the_sequence() {
        let mut sync = SyncInstructions::new(5, 24);
        let mut expected: u32 = 0;

        let script: &[(&str, u32)] = &[
            ("next", 0),
            ("next", 0),
            ("goto", 4),
            ("previous", 0),
            ("goto", 0),
            ("next", 0),
        ];

        for (i, &(op, arg)) in script.iter().enumerate() {
            let ts = (i as u32 + 1) * 8;

            match op {
                "next" => {
                    sync.next(ts, false).unwrap();
                    expected += 1;
                }
                "previous" => {
                    sync.previous(ts, false).unwrap();
                    expected -= 1;
                }
                "goto" => {
                    sync.go_to(ts, arg, false).unwrap();
                    expected = arg;
                }
                _ => unreachable!(),
            }

            assert_eq!(sync.current_index(), expected);
        }
    }

    fn arbitrary_stream() -> impl Strategy<Value = SyncInstructions> {
        (2u32..20, 0u32..120, proptest::collection::vec((0u32..3, 0u32..20, any::<bool>()), 0..30))
            .prop_map(|(length, framerate, ops)| {
                let mut sync = SyncInstructions::new(length, framerate);
                let mut ts = 0;

                for (op, arg, relative) in ops {
                    ts += 8;

                    match op {
                        0 => {
                            let _ = sync.next(ts, relative);
                        }
                        1 => {
                            let _ = sync.previous(ts, relative);
                        }
                        _ => {
                            let _ = sync.go_to(ts, arg % length, relative);
                        }
                    }
                }

                sync.end(ts + 8, false);
                sync
            })
    }

    proptest! {
        #[test]
        fn current_index_always_matches_a_replay_model(
            length in 1u32..10,
            ops in proptest::collection::vec((0u32..3, 0u32..10), 0..40),
        ) {
            let mut sync = SyncInstructions::new(length, 0);
            let mut model: u32 = 0;

            for (op, arg) in ops {
                match op {
                    0 => {
                        if sync.next(0, false).is_ok() {
                            model += 1;
                        }
                    }
                    1 => {
                        if sync.previous(0, false).is_ok() {
                            model -= 1;
                        }
                    }
                    _ => {
                        let target = arg % length;
                        if sync.go_to(0, target, false).is_ok() {
                            model = target;
                        }
                    }
                }

                prop_assert_eq!(sync.current_index(), model);
                prop_assert!(model < length);
            }
        }

        #[test]
        fn roundtrips_through_serialization(sync in arbitrary_stream()) {
            let parsed: SyncInstructions = sync.to_string().parse().unwrap();

            prop_assert_eq!(parsed.slide_count(), sync.slide_count());
            prop_assert_eq!(parsed.framerate(), sync.framerate());
            prop_assert_eq!(parsed.instructions(), sync.instructions());
            prop_assert_eq!(parsed.current_index(), 0);
        }
    }
}
