//! Presentation collaborator.
//!
//! Pixel upload and window handling live outside the engine. The refresh
//! loop hands every picture due for display to a [`VideoSink`].

use tracing::debug;

use crate::core::time::format_time;
use crate::queue::Frame;

/// Receiver of pictures ready to display.
pub trait VideoSink {
    /// Show `picture`, with `subtitle` overlaid when one is active.
    fn display(&mut self, picture: &Frame, subtitle: Option<&Frame>);
}

/// Sink that only logs what would be shown.
#[derive(Debug, Default)]
pub struct LogSink {
    displayed: u64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pictures displayed so far.
    pub fn displayed(&self) -> u64 {
        self.displayed
    }
}

impl VideoSink for LogSink {
    fn display(&mut self, picture: &Frame, subtitle: Option<&Frame>) {
        self.displayed += 1;
        debug!(
            pts = %format_time(picture.pts),
            width = picture.width,
            height = picture.height,
            subtitle = subtitle.is_some(),
            "display"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_sink_counts() {
        let mut sink = LogSink::new();
        let frame = Frame::default();
        sink.display(&frame, None);
        sink.display(&frame, Some(&frame));
        assert_eq!(sink.displayed(), 2);
    }
}
