//! Host delegate contract.
//!
//! The machine reports console output, status changes, video-display
//! operations, and host-file requests through this trait. All methods have
//! no-op defaults so hosts implement only what they render.

use std::cell::RefCell;
use std::rc::Rc;

/// Callbacks from the emulator to its host.
pub trait EmulatorDelegate {
    /// A console character left the output ring.
    fn on_character(&mut self, _ch: u8) {}

    /// Human-readable status change (boot progress, halt reports).
    fn on_status(&mut self, _status: &str) {}

    /// Clear the emulated display.
    fn vda_clear(&mut self) {}

    /// Move the display cursor.
    fn vda_set_cursor(&mut self, _row: u8, _col: u8) {}

    /// Write a character at the cursor.
    fn vda_write_char(&mut self, _ch: u8) {}

    /// Scroll the display up.
    fn vda_scroll_up(&mut self, _lines: u8) {}

    /// Set the character attribute for subsequent writes.
    fn vda_set_attr(&mut self, _attr: u8) {}

    /// Sound the speaker.
    fn on_beep(&mut self, _duration_ms: u16) {}

    /// The machine suspended waiting for console input.
    fn on_input_requested(&mut self) {}

    /// A guest utility asked the host to pick a file for upload.
    fn host_file_request_read(&mut self, _name: &str) {}

    /// A guest utility produced a file for the host to save.
    fn host_file_download(&mut self, _name: &str, _data: &[u8]) {}
}

/// Delegate that ignores everything.
pub struct NullDelegate;

impl EmulatorDelegate for NullDelegate {}

/// Captured delegate traffic.
#[derive(Default)]
pub struct ConsoleCapture {
    pub output: Vec<u8>,
    pub statuses: Vec<String>,
    pub vda_clears: u32,
    pub cursor: Option<(u8, u8)>,
    pub input_requests: u32,
}

/// Buffering delegate shared between the machine and an observer.
///
/// Cloning shares the underlying buffer, so a test (or the control server)
/// can hand one clone to the machine and keep another to read back what
/// arrived. Single-threaded by design, like the machine itself.
#[derive(Clone, Default)]
pub struct CaptureDelegate {
    captured: Rc<RefCell<ConsoleCapture>>,
}

impl CaptureDelegate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything written to the console since the last call.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.captured.borrow_mut().output)
    }

    /// Console output so far, lossily decoded for display.
    #[must_use]
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.captured.borrow().output).into_owned()
    }

    /// Status lines reported so far.
    #[must_use]
    pub fn statuses(&self) -> Vec<String> {
        self.captured.borrow().statuses.clone()
    }

    /// How many times input was requested.
    #[must_use]
    pub fn input_requests(&self) -> u32 {
        self.captured.borrow().input_requests
    }

    /// Last cursor position set through the VDA.
    #[must_use]
    pub fn cursor(&self) -> Option<(u8, u8)> {
        self.captured.borrow().cursor
    }

    /// How many display clears happened.
    #[must_use]
    pub fn vda_clears(&self) -> u32 {
        self.captured.borrow().vda_clears
    }
}

impl EmulatorDelegate for CaptureDelegate {
    fn on_character(&mut self, ch: u8) {
        self.captured.borrow_mut().output.push(ch);
    }

    fn on_status(&mut self, status: &str) {
        self.captured.borrow_mut().statuses.push(status.to_string());
    }

    fn vda_clear(&mut self) {
        self.captured.borrow_mut().vda_clears += 1;
    }

    fn vda_set_cursor(&mut self, row: u8, col: u8) {
        self.captured.borrow_mut().cursor = Some((row, col));
    }

    fn vda_write_char(&mut self, ch: u8) {
        self.captured.borrow_mut().output.push(ch);
    }

    fn on_input_requested(&mut self) {
        self.captured.borrow_mut().input_requests += 1;
    }
}
