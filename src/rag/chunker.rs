/// Smallest chunk size honored regardless of settings.
pub const MIN_CHUNK_SIZE: usize = 200;

const SENTENCE_ENDS: &[char] = &['.', '!', '?', '。', '！', '？', ';', '；', ':'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl ChunkConfig {
    /// Overlap is capped at half the chunk size so packing always advances.
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(MIN_CHUNK_SIZE);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size / 2),
        }
    }
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits collapsed text after sentence punctuation that is followed by a
/// space. Delimiters stay with their sentence.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut iter = text.char_indices().peekable();
    while let Some((i, ch)) = iter.next() {
        if !SENTENCE_ENDS.contains(&ch) {
            continue;
        }
        if let Some(&(j, next)) = iter.peek() {
            if next.is_whitespace() {
                let s = text[start..i + ch.len_utf8()].trim();
                if !s.is_empty() {
                    out.push(s);
                }
                start = j + next.len_utf8();
            }
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn tail_chars(s: &str, n: usize) -> &str {
    let len = char_len(s);
    if n >= len {
        return s;
    }
    match s.char_indices().nth(len - n) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

fn hard_split(s: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    chars
        .chunks(size)
        .map(|c| c.iter().collect::<String>())
        .collect()
}

struct Packer {
    cfg: ChunkConfig,
    chunks: Vec<String>,
    current: Vec<String>,
    current_len: usize,
    /// `current` holds nothing but the overlap carried from the last flush.
    carried_only: bool,
}

impl Packer {
    fn push(&mut self, sentence: String) {
        let len = char_len(&sentence);
        let sep = usize::from(!self.current.is_empty());
        if !self.current.is_empty()
            && !self.carried_only
            && self.current_len + sep + len > self.cfg.chunk_size
        {
            self.flush(true);
        }
        let sep = usize::from(!self.current.is_empty());
        self.current_len += sep + len;
        self.current.push(sentence);
        self.carried_only = false;
    }

    fn flush(&mut self, carry_overlap: bool) {
        if self.current.is_empty() {
            return;
        }
        if self.carried_only {
            self.current.clear();
            self.current_len = 0;
            self.carried_only = false;
            return;
        }
        let chunk = self.current.join(" ").trim().to_string();
        self.current.clear();
        self.current_len = 0;
        if chunk.is_empty() {
            return;
        }
        if carry_overlap && self.cfg.overlap > 0 {
            let keep = tail_chars(&chunk, self.cfg.overlap).trim_start().to_string();
            if !keep.is_empty() {
                self.current_len = char_len(&keep);
                self.current.push(keep);
                self.carried_only = true;
            }
        }
        self.chunks.push(chunk);
    }
}

/// Sentence-aware packing into chunks of roughly `chunk_size` characters,
/// carrying the last `overlap` characters into the next chunk.
pub fn split_text(text: &str, cfg: ChunkConfig) -> Vec<String> {
    let cleaned = collapse_whitespace(text);
    if cleaned.is_empty() {
        return Vec::new();
    }
    let mut packer = Packer {
        cfg,
        chunks: Vec::new(),
        current: Vec::new(),
        current_len: 0,
        carried_only: false,
    };
    for sentence in split_sentences(&cleaned) {
        if char_len(sentence) > cfg.chunk_size {
            for piece in hard_split(sentence, cfg.chunk_size) {
                packer.push(piece);
            }
        } else {
            packer.push(sentence.to_string());
        }
    }
    packer.flush(false);

    if packer.chunks.is_empty() {
        return vec![cleaned.chars().take(cfg.chunk_size).collect()];
    }
    packer.chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_enforces_floor_and_overlap_cap() {
        assert_eq!(ChunkConfig::new(50, 80), ChunkConfig { chunk_size: 200, overlap: 80 });
        assert_eq!(ChunkConfig::new(300, 400), ChunkConfig { chunk_size: 300, overlap: 150 });
    }

    #[test]
    fn sentences_split_on_punctuation_followed_by_space() {
        let s = split_sentences("Ratio 3.5 holds. Is it? Yes! Định nghĩa: một khái niệm。 Done");
        assert_eq!(
            s,
            vec!["Ratio 3.5 holds.", "Is it?", "Yes!", "Định nghĩa:", "một khái niệm。", "Done"]
        );
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = split_text("  A short\n\nnote.  ", ChunkConfig::new(500, 80));
        assert_eq!(chunks, vec!["A short note.".to_string()]);
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(split_text(" \n\t ", ChunkConfig::new(500, 80)).is_empty());
    }

    #[test]
    fn chunks_respect_size_and_carry_overlap() {
        let sentence = "The mitochondria is the powerhouse of the cell and makes energy.";
        let text = std::iter::repeat(sentence).take(30).collect::<Vec<_>>().join(" ");
        let cfg = ChunkConfig::new(200, 40);
        let chunks = split_text(&text, cfg);
        assert!(chunks.len() > 5);
        for c in &chunks {
            assert!(c.chars().count() <= 200 + 40, "chunk too long: {}", c.len());
        }
        for pair in chunks.windows(2) {
            let tail: String = pair[0]
                .chars()
                .rev()
                .take(40)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            assert!(pair[1].starts_with(tail.trim_start()));
        }
    }

    #[test]
    fn oversized_sentence_is_hard_split() {
        let word = "x".repeat(450);
        let chunks = split_text(&word, ChunkConfig::new(200, 0));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 200);
        assert_eq!(chunks[2].len(), 50);
    }

    #[test]
    fn tail_chars_is_char_boundary_safe() {
        assert_eq!(tail_chars("học tập", 3), "tập");
        assert_eq!(tail_chars("ab", 5), "ab");
    }
}
