/// Argument text left over after route unfolding.
///
/// Decoders consume from the front. A nested callable decodes from whatever
/// its parent left, so the cursor is shared down a continuation chain.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    text: String,
    pos: usize,
}

impl Payload {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            pos: 0,
        }
    }

    /// Unconsumed text.
    pub fn rest(&self) -> &str {
        &self.text[self.pos..]
    }

    /// Whether only whitespace is left.
    pub fn is_blank(&self) -> bool {
        self.rest().trim().is_empty()
    }

    /// Consume `n` bytes; stops at the end of the text.
    pub fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.text.len());
    }

    /// Consume up to and including the next line break.
    pub fn take_line(&mut self) -> &str {
        let start = self.pos;
        let rest = &self.text[start..];
        let (line_len, consumed) = match rest.find('\n') {
            Some(i) => (i, i + 1),
            None => (rest.len(), rest.len()),
        };
        self.pos += consumed;
        self.text[start..start + line_len].trim_end_matches('\r')
    }

    /// Position to come back to with [`Payload::reset`].
    pub fn mark(&self) -> usize {
        self.pos
    }

    pub fn reset(&mut self, mark: usize) {
        self.pos = mark.min(self.text.len());
    }
}
