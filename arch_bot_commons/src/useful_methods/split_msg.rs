/// Iterator that splits text into chunks, all of which are under a specified size in bytes.
///
/// Tries to fit as many whole lines into a chunk as possible. A single line that is
/// too long on its own is split at the last character boundary that fits.
/// Leading and trailing whitespace of each chunk is trimmed.
pub struct SplitOverLengthLines<'a> {
    data: &'a str,
    max_len: usize,
}

impl<'a> SplitOverLengthLines<'a> {
    /// Create a new splitter with specified max length by bytes.
    ///
    /// # Panics
    /// Panics if a max length of 3 or less is specified.
    /// It may be impossible to output data at such lengths due to
    /// characters being up to 4 bytes in size.
    #[must_use]
    pub fn new(data: &'a str, max_len: usize) -> Self {
        assert!(max_len >= 4, "Max length is too small");
        SplitOverLengthLines { data, max_len }
    }
}

impl<'a> Iterator for SplitOverLengthLines<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        self.data = self.data.trim_start();
        if self.data.is_empty() {
            return None;
        }

        if self.data.len() <= self.max_len {
            let output = self.data.trim_end();
            self.data = "";
            return Some(output);
        }

        // Last newline that still fits. Cut right before it.
        let window_end = floor_char_boundary(self.data, self.max_len);
        let cut = match self.data[..window_end].rfind('\n') {
            Some(newline) if newline > 0 => newline,
            // No line fits whole. Cut the line itself.
            _ => window_end,
        };

        let (output, rest) = self.data.split_at(cut);
        self.data = rest;
        Some(output.trim_end())
    }
}

/// Largest index not above `index` that lies on a character boundary of `text`.
fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
