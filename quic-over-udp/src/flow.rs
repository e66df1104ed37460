//! Per-stream flow-control windows.
//!
//! The receiver advertises, per stream, the highest offset it will accept
//! (`max_data`).  As the application reads, the limit slides forward and a
//! WINDOW_UPDATE announces it once half the window has been consumed.  The
//! sender never lets a stream's written offset run past the latest limit it
//! has heard.

/// Sender-side view: how far the peer lets us write.
#[derive(Debug, Clone)]
pub struct SendWindow {
    max_data: u64,
}

impl SendWindow {
    pub fn new(max_data: u64) -> Self {
        Self { max_data }
    }

    /// Bytes that may still be written once `offset` bytes have been.
    pub fn credit(&self, offset: u64) -> u64 {
        self.max_data.saturating_sub(offset)
    }

    /// Apply an advertised limit.  Limits only move forward; returns `true`
    /// if this one did.
    pub fn update(&mut self, max_data: u64) -> bool {
        if max_data > self.max_data {
            self.max_data = max_data;
            true
        } else {
            false
        }
    }

    pub fn max_data(&self) -> u64 {
        self.max_data
    }
}

/// Receiver-side window for one stream.
#[derive(Debug, Clone)]
pub struct ReceiveWindow {
    window: u64,
    /// Highest offset advertised to the peer.
    max_data: u64,
    /// Bytes the application has read.
    consumed: u64,
    update_pending: bool,
}

impl ReceiveWindow {
    pub fn new(window: u64) -> Self {
        Self {
            window,
            max_data: window,
            consumed: 0,
            update_pending: false,
        }
    }

    /// Whether data ending at `end` is within the advertised limit.
    pub fn permits(&self, end: u64) -> bool {
        end <= self.max_data
    }

    /// Credit back `n` bytes read by the application.
    pub fn on_consumed(&mut self, n: u64) {
        self.consumed += n;
        if self.max_data - self.consumed <= self.window / 2 {
            self.max_data = self.consumed + self.window;
            self.update_pending = true;
        }
    }

    /// The new limit, if one has not been announced yet.
    pub fn take_update(&mut self) -> Option<u64> {
        std::mem::take(&mut self.update_pending).then_some(self.max_data)
    }

    pub fn max_data(&self) -> u64 {
        self.max_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_credit_shrinks_with_offset() {
        let w = SendWindow::new(100);
        assert_eq!(w.credit(0), 100);
        assert_eq!(w.credit(60), 40);
        assert_eq!(w.credit(150), 0);
    }

    #[test]
    fn send_window_only_grows() {
        let mut w = SendWindow::new(100);
        assert!(w.update(200));
        assert!(!w.update(150));
        assert_eq!(w.max_data(), 200);
    }

    #[test]
    fn update_announced_after_half_window_consumed() {
        let mut w = ReceiveWindow::new(100);
        w.on_consumed(40);
        assert_eq!(w.take_update(), None);

        w.on_consumed(10);
        assert_eq!(w.take_update(), Some(150));
        assert_eq!(w.take_update(), None);
        assert!(w.permits(150));
        assert!(!w.permits(151));
    }
}
