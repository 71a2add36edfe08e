// Output sink seam - keeps the engine independent of how progress text
// reaches the user.

use anyhow::Result;

/// Receives every piece of user-visible progress text, in execution order.
pub trait OutputSink {
    fn write(&mut self, text: &str) -> Result<()>;
}

/// Default sink: one line per write on standard output.
pub struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn write(&mut self, text: &str) -> Result<()> {
        println!("{text}");
        Ok(())
    }
}
