use crate::format::RelayFormat;
use serde::Serialize;

/// Ordered record of the wire formats a request body has been translated
/// through, e.g. `[openai]` or `[openai, claude]`. Append-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ConversionChain(Vec<RelayFormat>);

impl ConversionChain {
    /// Seeds the chain with the inbound format. No-op once anything is recorded.
    pub fn initialize(&mut self, format: RelayFormat) {
        if self.0.is_empty() {
            self.0.push(format);
        }
    }

    /// Records a conversion hop. Repeating the current last format is a no-op;
    /// a format may still reappear after a different one.
    pub fn append(&mut self, format: RelayFormat) {
        if self.0.last() == Some(&format) {
            return;
        }
        self.0.push(format);
    }

    pub fn last(&self) -> Option<RelayFormat> {
        self.0.last().copied()
    }

    pub fn as_slice(&self) -> &[RelayFormat] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RelayFormat::{Claude, OpenAi, OpenAiResponses};

    #[test]
    fn initialize_only_seeds_empty_chain() {
        let mut chain = ConversionChain::default();
        chain.initialize(OpenAi);
        assert_eq!(chain.as_slice(), &[OpenAi]);
        chain.initialize(Claude);
        assert_eq!(chain.as_slice(), &[OpenAi]);
    }

    #[test]
    fn adjacent_repeats_are_suppressed() {
        let mut chain = ConversionChain::default();
        chain.initialize(OpenAi);
        chain.append(OpenAi);
        assert_eq!(chain.as_slice(), &[OpenAi]);
        chain.append(Claude);
        assert_eq!(chain.as_slice(), &[OpenAi, Claude]);
        chain.append(Claude);
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn non_adjacent_repeat_is_kept() {
        let mut chain = ConversionChain::default();
        chain.initialize(OpenAi);
        chain.append(OpenAiResponses);
        chain.append(OpenAi);
        assert_eq!(chain.as_slice(), &[OpenAi, OpenAiResponses, OpenAi]);
        assert_eq!(chain.last(), Some(OpenAi));
    }

    #[test]
    fn append_on_empty_chain_starts_it() {
        let mut chain = ConversionChain::default();
        chain.append(Claude);
        assert_eq!(chain.as_slice(), &[Claude]);
        chain.initialize(OpenAi);
        assert_eq!(chain.as_slice(), &[Claude]);
    }

    #[test]
    fn serializes_as_plain_list() {
        let mut chain = ConversionChain::default();
        chain.initialize(OpenAi);
        chain.append(Claude);
        assert_eq!(
            serde_json::to_value(&chain).unwrap(),
            serde_json::json!(["openai", "claude"])
        );
    }
}
