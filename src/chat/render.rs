//! Output rendering for the chat application.
//!
//! A [`Renderer`] receives the progress of a send as a [`SendObserver`] and prints the
//! answer as it grows.  The default implementation writes plain text with optional
//! ANSI styling.

use std::io::{self, Stdout, Write};

use crate::error::Error;
use crate::orchestrator::{SendObserver, SendState};

/// ANSI escape code for dim text (used for sources and notices).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// Trait for rendering chat output.
pub trait Renderer: SendObserver {
    /// Print a chunk of answer text.
    fn print_text(&mut self, text: &str);

    /// Print the documents an answer drew on.
    fn print_sources(&mut self, sources: &[String]);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Called when an answer is complete.
    fn finish_response(&mut self);

    /// Called when the user stopped an answer.
    fn print_interrupted(&mut self);
}

/// Renderer writing plain text, styled with ANSI codes when enabled.
pub struct PlainTextRenderer<W: Write + Send = Stdout> {
    out: W,
    use_color: bool,
    mid_line: bool,
}

impl PlainTextRenderer<Stdout> {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self::with_writer(io::stdout(), use_color)
    }
}

impl Default for PlainTextRenderer<Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> PlainTextRenderer<W> {
    /// Creates a renderer writing to `out`.
    pub fn with_writer(out: W, use_color: bool) -> Self {
        Self {
            out,
            use_color,
            mid_line: false,
        }
    }

    /// Consume the renderer and return its writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn styled(&mut self, style: &str, text: &str) {
        let _ = if self.use_color {
            write!(self.out, "{style}{text}{ANSI_RESET}")
        } else {
            write!(self.out, "{text}")
        };
    }

    fn end_line(&mut self) {
        if self.mid_line {
            let _ = writeln!(self.out);
            self.mid_line = false;
        }
    }

    /// Flushes the writer so streamed text shows up immediately.
    fn flush(&mut self) {
        let _ = self.out.flush();
    }
}

impl<W: Write + Send> Renderer for PlainTextRenderer<W> {
    fn print_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let _ = write!(self.out, "{text}");
        self.mid_line = !text.ends_with('\n');
        self.flush();
    }

    fn print_sources(&mut self, sources: &[String]) {
        if sources.is_empty() {
            return;
        }
        self.end_line();
        self.styled(ANSI_DIM, &format!("[sources: {}]", sources.join(", ")));
        let _ = writeln!(self.out);
        self.flush();
    }

    fn print_error(&mut self, error: &str) {
        self.end_line();
        self.styled(ANSI_RED, &format!("Error: {error}"));
        let _ = writeln!(self.out);
        self.flush();
    }

    fn print_info(&mut self, info: &str) {
        self.end_line();
        let _ = writeln!(self.out, "{info}");
        self.flush();
    }

    fn finish_response(&mut self) {
        self.end_line();
        self.flush();
    }

    fn print_interrupted(&mut self) {
        self.end_line();
        self.styled(ANSI_DIM, "[interrupted]");
        let _ = writeln!(self.out);
        self.flush();
    }
}

impl<W: Write + Send> SendObserver for PlainTextRenderer<W> {
    fn on_state(&mut self, state: SendState) {
        if state == SendState::Completed {
            self.finish_response();
        }
    }

    fn on_delta(&mut self, delta: &str, _content: &str) {
        self.print_text(delta);
    }

    fn on_sources(&mut self, sources: &[String]) {
        self.print_sources(sources);
    }

    fn on_failed(&mut self, error: &Error) {
        self.print_error(&error.to_string());
    }
}
