use std::io::BufRead;

use smt_core::sentence::Sentence;
use tracing::warn;

/// A stream of input lines as sentences numbered from 0.
///
/// Lines in `<seg id="N">` form keep their own id and numbering resumes at
/// `N + 1`, so ids stay unique as long as explicit ids ascend. Ids wrap
/// around after `u32::MAX`. Reading stops at the first I/O error, which is
/// logged.
pub struct TranslationRequest<R> {
    reader: R,
    next_id: u32,
    line: String,
}

impl<R: BufRead> TranslationRequest<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            next_id: 0,
            line: String::new(),
        }
    }
}

impl<R: BufRead> Iterator for TranslationRequest<R> {
    type Item = Sentence;

    fn next(&mut self) -> Option<Sentence> {
        self.line.clear();
        match self.reader.read_line(&mut self.line) {
            Ok(0) => None,
            Ok(_) => {
                let sentence = Sentence::parse(self.next_id, &self.line);
                self.next_id = sentence.id().wrapping_add(1);
                Some(sentence)
            }
            Err(e) => {
                warn!(line = self.next_id, error = %e, "stopped reading input");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_lines_and_keeps_blank_ones() {
        let input = "das haus\n\n<seg id=\"9\">ein buch</seg>\n@list_rules\n";
        let sentences: Vec<Sentence> = TranslationRequest::new(input.as_bytes()).collect();
        let ids: Vec<u32> = sentences.iter().map(Sentence::id).collect();
        assert_eq!(ids, vec![0, 1, 9, 10]);
        assert!(sentences[1].is_empty());
        assert_eq!(sentences[2].text(), "ein buch");
        assert_eq!(sentences[3].metadata().unwrap().kind(), "list_rules");
    }

    #[test]
    fn test_ids_wrap_instead_of_overflowing() {
        let input = "<seg id=\"4294967295\">letzte</seg>\nerste\n";
        let ids: Vec<u32> = TranslationRequest::new(input.as_bytes()).map(|s| s.id()).collect();
        assert_eq!(ids, vec![u32::MAX, 0]);
    }

    #[test]
    fn test_segment_without_id_takes_the_next_number() {
        let input = "eins\n<seg>zwei</seg>\n";
        let sentences: Vec<Sentence> = TranslationRequest::new(input.as_bytes()).collect();
        assert_eq!(sentences[1].id(), 1);
        assert_eq!(sentences[1].text(), "zwei");
    }
}
