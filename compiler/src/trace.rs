//! Diagnostic sink handed to the parser and code generator.
//!
//! Tracing never influences parsing or lowering; a sink only observes.

pub trait Trace {
    fn event(&mut self, message: &str);
}

impl<T: Trace + ?Sized> Trace for &mut T {
    fn event(&mut self, message: &str) {
        (**self).event(message);
    }
}

/// Discards everything. This is what `parse` and `compile` use.
pub struct NoTrace;

impl Trace for NoTrace {
    fn event(&mut self, _message: &str) {}
}

/// Prints every event to stderr, used by the driver in verbose mode.
pub struct StderrTrace;

impl Trace for StderrTrace {
    fn event(&mut self, message: &str) {
        eprintln!("[trace] {}", message);
    }
}

/// Keeps events in memory.
#[derive(Default, Debug)]
pub struct Recorder(pub Vec<String>);

impl Trace for Recorder {
    fn event(&mut self, message: &str) {
        self.0.push(message.to_string());
    }
}
