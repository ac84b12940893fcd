//! Text output plumbing: the display-sink collaborator trait, hidden-output
//! state, and the capture buffer.
//!
//! The core never does layout; it hands finished text to a `TextSink`.
//! Capture redirects that text into a cache object instead, so nested
//! capture regions can be carved back out of it by byte-offset bookmarks.

use crate::errors::TadsError;
use crate::objcache::ObjectCache;
use crate::value::{ObjNum, OBJ_INVALID};

/// Display sink.  Implementations render text and read command lines; the
/// interpreter core does no terminal handling of its own.
pub trait TextSink {
    fn puts(&mut self, text: &[u8]);
    /// Read one line of input, or None at end of input (which the command
    /// loop treats as quit).
    fn read_line(&mut self) -> Option<Vec<u8>>;
    fn flush(&mut self) {}
}

/// Stdout/stdin sink used by the CLI driver.
pub struct StdSink;

impl TextSink for StdSink {
    fn puts(&mut self, text: &[u8]) {
        use std::io::Write;
        let mut out = std::io::stdout();
        let _ = out.write_all(text);
    }

    fn read_line(&mut self) -> Option<Vec<u8>> {
        use std::io::BufRead;
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\n', '\r']).as_bytes().to_vec()),
        }
    }

    fn flush(&mut self) {
        use std::io::Write;
        let _ = std::io::stdout().flush();
    }
}

/// Scripted sink for tests and batch runs: canned input, output collected
/// into a shared buffer the test keeps a handle to.
#[derive(Default)]
pub struct ScriptSink {
    input: Vec<Vec<u8>>,
    output: std::rc::Rc<std::cell::RefCell<Vec<u8>>>,
}

impl ScriptSink {
    pub fn with_input(lines: &[&[u8]]) -> Self {
        ScriptSink {
            input: lines.iter().rev().map(|l| l.to_vec()).collect(),
            output: Default::default(),
        }
    }

    /// Shared handle to everything written so far.
    pub fn output_handle(&self) -> std::rc::Rc<std::cell::RefCell<Vec<u8>>> {
        self.output.clone()
    }
}

impl TextSink for ScriptSink {
    fn puts(&mut self, text: &[u8]) {
        self.output.borrow_mut().extend_from_slice(text);
    }

    fn read_line(&mut self) -> Option<Vec<u8>> {
        self.input.pop()
    }
}

/// Output state: hidden-output flags, capture bookkeeping, and the log
/// stream.  The capture buffer lives in a cache object so it participates
/// in the ordinary object budget.
pub struct OutputCtx {
    pub sink: Box<dyn TextSink>,
    /// False while output is hidden (outhide).
    shown: bool,
    /// Whether any output arrived while hidden.
    occurred: bool,
    capturing: bool,
    capture_obj: ObjNum,
    capture_ofs: usize,
    /// Output filter function, applied by the driver before display.
    pub filter_fn: ObjNum,
    log_file: Option<std::fs::File>,
}

impl OutputCtx {
    pub fn new(sink: Box<dyn TextSink>) -> Self {
        OutputCtx {
            sink,
            shown: true,
            occurred: false,
            capturing: false,
            capture_obj: OBJ_INVALID,
            capture_ofs: 0,
            filter_fn: OBJ_INVALID,
            log_file: None,
        }
    }

    /// Emit text through hiding and capture.
    pub fn print(&mut self, cache: &mut ObjectCache, text: &[u8]) -> Result<(), TadsError> {
        if text.is_empty() {
            return Ok(());
        }
        if self.capturing {
            self.capture_append(cache, text)?;
            return Ok(());
        }
        if !self.shown {
            self.occurred = true;
            return Ok(());
        }
        self.sink.puts(text);
        if let Some(log) = self.log_file.as_mut() {
            use std::io::Write;
            let _ = log.write_all(text);
        }
        Ok(())
    }

    // -- hidden output (outhide family) -----------------------------------

    /// Hide output and reset the occurred flag.
    pub fn hide(&mut self) {
        self.shown = false;
        self.occurred = false;
    }

    /// Show output again; reports whether anything was emitted while
    /// hidden.
    pub fn show(&mut self) -> bool {
        self.shown = true;
        self.occurred
    }

    /// (hidden, output_occurred) as a pair.
    pub fn status(&self) -> (bool, bool) {
        (!self.shown, self.occurred)
    }

    /// Force the occurred flag back on (restoring an outer region's state).
    pub fn set_hidden_output(&mut self) {
        self.occurred = true;
    }

    // -- capture ----------------------------------------------------------

    pub fn capturing(&self) -> bool {
        self.capturing
    }

    /// Begin or end capturing.  The capture object is created on first use
    /// and reused for the rest of the session.
    pub fn set_capture(&mut self, cache: &mut ObjectCache, on: bool) -> Result<(), TadsError> {
        if on && (self.capture_obj == OBJ_INVALID || !cache.exists(self.capture_obj)) {
            // first use, or an undo rolled the old buffer object away
            self.capture_obj = cache.alloc_new(Vec::with_capacity(256))?;
            self.capture_ofs = 0;
        }
        self.capturing = on;
        Ok(())
    }

    pub fn capture_obj(&self) -> ObjNum {
        self.capture_obj
    }

    /// Current size of the captured text; used as the bookmark for nested
    /// capture regions.
    pub fn capture_size(&self) -> usize {
        self.capture_ofs
    }

    /// Truncate the capture buffer back to a bookmark (splicing a nested
    /// region out).
    pub fn pop_capture(&mut self, orig_size: usize) {
        self.capture_ofs = orig_size;
    }

    /// Reset the capture buffer entirely.
    pub fn clear_capture(&mut self) {
        self.capture_ofs = 0;
    }

    fn capture_append(&mut self, cache: &mut ObjectCache, text: &[u8]) -> Result<(), TadsError> {
        let mut guard = cache.lock_mut(self.capture_obj)?;
        let buf = guard.bytes_mut();
        buf.truncate(self.capture_ofs);
        buf.extend_from_slice(text);
        self.capture_ofs = buf.len();
        Ok(())
    }

    /// The capture slice after a bookmark.  A bookmark past the current
    /// size yields the empty slice (the historical clamp, preserved).
    pub fn capture_tail(
        &self,
        cache: &mut ObjectCache,
        bookmark: usize,
    ) -> Result<Vec<u8>, TadsError> {
        if self.capture_obj == OBJ_INVALID {
            return Ok(Vec::new());
        }
        let guard = cache.lock(self.capture_obj)?;
        let buf = guard.bytes();
        let siz = self.capture_ofs;
        let take = if bookmark > siz { 0 } else { siz - bookmark };
        if take == 0 {
            return Ok(Vec::new());
        }
        Ok(buf[bookmark..bookmark + take].to_vec())
    }

    // -- logging ----------------------------------------------------------

    pub fn open_log(&mut self, path: &std::path::Path) -> bool {
        match std::fs::File::create(path) {
            Ok(f) => {
                self.log_file = Some(f);
                true
            }
            Err(_) => false,
        }
    }

    pub fn close_log(&mut self) {
        self.log_file = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> ObjectCache {
        ObjectCache::new(1 << 20, 4)
    }

    fn ctx() -> (OutputCtx, std::rc::Rc<std::cell::RefCell<Vec<u8>>>) {
        let sink = ScriptSink::default();
        let handle = sink.output_handle();
        (OutputCtx::new(Box::new(sink)), handle)
    }

    #[test]
    fn hidden_output_swallows_and_flags() {
        let mut cache = cache();
        let (mut out, shown) = ctx();
        out.hide();
        out.print(&mut cache, b"secret").unwrap();
        let (hidden, occurred) = out.status();
        assert!(hidden);
        assert!(occurred);
        assert!(out.show());
        out.print(&mut cache, b"visible").unwrap();
        assert_eq!(*shown.borrow(), b"visible");
    }

    #[test]
    fn capture_nesting_with_bookmarks() {
        let mut cache = cache();
        let (mut out, _) = ctx();
        out.set_capture(&mut cache, true).unwrap();
        out.print(&mut cache, b"outer ").unwrap();
        let bookmark = out.capture_size();
        out.print(&mut cache, b"inner").unwrap();
        assert_eq!(out.capture_tail(&mut cache, bookmark).unwrap(), b"inner");
        // splice the inner region out
        out.pop_capture(bookmark);
        out.print(&mut cache, b"after").unwrap();
        assert_eq!(out.capture_tail(&mut cache, 0).unwrap(), b"outer after");
    }

    #[test]
    fn bookmark_past_size_clamps_to_empty() {
        let mut cache = cache();
        let (mut out, _) = ctx();
        out.set_capture(&mut cache, true).unwrap();
        out.print(&mut cache, b"x").unwrap();
        assert!(out.capture_tail(&mut cache, 500).unwrap().is_empty());
    }

    #[test]
    fn capture_does_not_reach_sink() {
        let mut cache = cache();
        let (mut out, shown) = ctx();
        out.set_capture(&mut cache, true).unwrap();
        out.print(&mut cache, b"captured").unwrap();
        out.set_capture(&mut cache, false).unwrap();
        assert!(shown.borrow().is_empty());
        out.print(&mut cache, b"shown").unwrap();
        assert_eq!(*shown.borrow(), b"shown");
    }
}
