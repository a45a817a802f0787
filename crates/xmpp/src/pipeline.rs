use minidom::Element;
use tracing::trace;

pub enum ProcessorResult {
    /// Not ours; offer the stanza to the next processor.
    Continue,
    Handled,
}

pub trait StanzaProcessor: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn priority(&self) -> i32;

    fn process_inbound(&self, stanza: &Element) -> ProcessorResult;
}

/// Inbound processors run in ascending priority order until one handles
/// the stanza.
pub struct StanzaPipeline {
    processors: Vec<Box<dyn StanzaProcessor>>,
}

impl StanzaPipeline {
    pub fn new() -> Self {
        Self {
            processors: Vec::new(),
        }
    }

    pub fn register(&mut self, processor: Box<dyn StanzaProcessor>) {
        self.processors.push(processor);
        self.processors.sort_by_key(|p| p.priority());
    }

    /// Returns true if some processor handled the stanza.
    pub fn process_inbound(&self, stanza: &Element) -> bool {
        for processor in &self.processors {
            if let ProcessorResult::Handled = processor.process_inbound(stanza) {
                trace!(processor = processor.name(), "stanza handled");
                return true;
            }
        }
        false
    }
}

impl Default for StanzaPipeline {
    fn default() -> Self {
        Self::new()
    }
}
