use crate::rag::chunker::split_sentences;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

pub const BLANK: &str = "_____";

const MIN_SENTENCE_CHARS: usize = 20;
const MIN_QUESTION_CHARS: usize = 40;
const MIN_WORD: usize = 4;
const MAX_WORD: usize = 18;

const VI_STOP: &[&str] = &[
    "và", "hoặc", "của", "cho", "trong", "trên", "tại", "bởi", "với", "là", "một", "những",
    "các", "được", "đã", "sẽ", "đang", "này", "kia", "đó", "khi", "từ", "theo", "về", "có",
    "không", "đến", "hay", "nên", "cần", "nếu", "thì", "ra", "vào", "cũng",
];
const EN_STOP: &[&str] = &[
    "the", "and", "or", "of", "to", "in", "for", "on", "at", "by", "with", "a", "an", "is",
    "are", "was", "were", "be", "as", "it", "that", "this", "from", "we", "you", "they", "he",
    "she", "i", "but", "not", "have", "has", "had", "will", "shall", "can", "could", "may",
    "might", "do", "does", "did",
];

#[derive(Debug, Error)]
pub enum QuizError {
    #[error("unknown language: {0}")]
    BadLanguage(String),
    #[error("unknown difficulty: {0}")]
    BadDifficulty(String),
    #[error("no questions could be built from this document")]
    NothingBuilt,
    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Vi,
    En,
}

impl Language {
    pub fn parse(s: &str) -> Result<Self, QuizError> {
        match s {
            "vi" => Ok(Self::Vi),
            "en" => Ok(Self::En),
            other => Err(QuizError::BadLanguage(other.to_string())),
        }
    }

    fn stopwords(self) -> &'static [&'static str] {
        match self {
            Self::Vi => VI_STOP,
            Self::En => EN_STOP,
        }
    }

    fn explanation(self) -> &'static str {
        match self {
            Self::Vi => "Điền từ còn thiếu dựa trên câu trong tài liệu.",
            Self::En => "Fill the missing word from the document context.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn parse(s: &str) -> Result<Self, QuizError> {
        match s {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            other => Err(QuizError::BadDifficulty(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub question: String,
    pub choices: Vec<String>,
    pub answer_index: usize,
    pub explanation: String,
}

#[derive(Debug, Clone, Copy)]
pub struct QuizOptions {
    pub num_questions: usize,
    pub language: Language,
    pub seed: u64,
}

/// How many chunks a quiz of `n` questions draws from.
pub fn fetch_limit(n: usize) -> usize {
    (n * 6).max(10)
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn is_stopword(word: &str, language: Language) -> bool {
    let lower = word.to_lowercase();
    language.stopwords().contains(&lower.as_str())
}

fn is_candidate(word: &str, language: Language) -> bool {
    let n = char_len(word);
    (MIN_WORD..=MAX_WORD).contains(&n)
        && !word.chars().all(|c| c.is_numeric())
        && !is_stopword(word, language)
}

fn fallback_distractors(answer: &str) -> Vec<String> {
    let reversed: String = answer.chars().rev().collect();
    vec![
        reversed,
        format!("{}x", answer),
        format!("{}s", answer),
        format!("x{}", answer),
        format!("{}es", answer),
    ]
}

struct Builder<'a> {
    word_re: Regex,
    pool: Vec<&'a str>,
    opts: QuizOptions,
    rng: StdRng,
}

impl<'a> Builder<'a> {
    fn cloze(&mut self, sentence: &str, qid: usize) -> Option<Question> {
        let s = sentence.trim();
        if char_len(s) < MIN_QUESTION_CHARS {
            return None;
        }
        let lang = self.opts.language;
        let candidates: Vec<&str> = self
            .word_re
            .find_iter(s)
            .map(|m| m.as_str())
            .filter(|w| is_candidate(w, lang))
            .collect();
        let answer = candidates.choose(&mut self.rng)?.to_string();
        let question = s.replacen(answer.as_str(), BLANK, 1);

        let answer_lower = answer.to_lowercase();
        let mut source: Vec<&str> = self
            .pool
            .iter()
            .copied()
            .filter(|w| w.to_lowercase() != answer_lower && !is_stopword(w, lang))
            .collect();
        source.shuffle(&mut self.rng);

        let mut distractors: Vec<String> = Vec::with_capacity(3);
        let push_unique = |w: String, out: &mut Vec<String>| {
            let lower = w.to_lowercase();
            if lower != answer_lower && !out.iter().any(|d| d.to_lowercase() == lower) {
                out.push(w);
            }
        };
        for w in source {
            if distractors.len() >= 3 {
                break;
            }
            push_unique(w.to_string(), &mut distractors);
        }
        for w in fallback_distractors(&answer) {
            if distractors.len() >= 3 {
                break;
            }
            push_unique(w, &mut distractors);
        }

        let mut choices = distractors;
        choices.push(answer.clone());
        choices.shuffle(&mut self.rng);
        let answer_index = choices.iter().position(|c| *c == answer)?;
        Some(Question {
            id: format!("q{}", qid),
            question,
            choices,
            answer_index,
            explanation: lang.explanation().to_string(),
        })
    }
}

/// Rule-based cloze questions drawn from document chunks. The same chunks,
/// options and seed always produce the same quiz.
pub fn generate(chunks: &[String], opts: QuizOptions) -> Result<Vec<Question>, QuizError> {
    let word_re = Regex::new(r"\w+")?;

    let mut sentences: Vec<&str> = chunks
        .iter()
        .flat_map(|c| split_sentences(c))
        .map(str::trim)
        .filter(|s| char_len(s) > MIN_SENTENCE_CHARS)
        .collect();

    let pool: Vec<&str> = chunks
        .iter()
        .flat_map(|c| word_re.find_iter(c).map(|m| m.as_str()))
        .filter(|w| (MIN_WORD..=MAX_WORD).contains(&char_len(w)))
        .collect();

    let mut builder = Builder {
        word_re,
        pool,
        opts,
        rng: StdRng::seed_from_u64(opts.seed),
    };
    sentences.shuffle(&mut builder.rng);

    let mut questions = Vec::new();
    for sentence in sentences {
        if questions.len() >= opts.num_questions {
            break;
        }
        if let Some(q) = builder.cloze(sentence, questions.len() + 1) {
            questions.push(q);
        }
    }
    if questions.is_empty() {
        return Err(QuizError::NothingBuilt);
    }
    Ok(questions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks() -> Vec<String> {
        vec![
            "Photosynthesis converts light energy into chemical energy inside chloroplasts. \
             Mitochondria release stored energy through cellular respiration in every cell. \
             Ribosomes assemble proteins by reading messenger molecules from the nucleus."
                .to_string(),
            "Enzymes accelerate biochemical reactions without being consumed themselves. \
             Short one."
                .to_string(),
        ]
    }

    fn opts(n: usize, seed: u64) -> QuizOptions {
        QuizOptions {
            num_questions: n,
            language: Language::En,
            seed,
        }
    }

    #[test]
    fn same_seed_same_quiz() {
        let a = generate(&chunks(), opts(3, 42)).expect("quiz");
        let b = generate(&chunks(), opts(3, 42)).expect("quiz");
        assert_eq!(a, b);
    }

    #[test]
    fn questions_are_well_formed() {
        let qs = generate(&chunks(), opts(10, 7)).expect("quiz");
        assert_eq!(qs.len(), 4);
        for (i, q) in qs.iter().enumerate() {
            assert_eq!(q.id, format!("q{}", i + 1));
            assert!(q.question.contains(BLANK));
            assert_eq!(q.choices.len(), 4);
            let answer = &q.choices[q.answer_index];
            assert!(!is_stopword(answer, Language::En));
            let mut lower: Vec<String> = q.choices.iter().map(|c| c.to_lowercase()).collect();
            lower.sort();
            lower.dedup();
            assert_eq!(lower.len(), 4, "choices must be distinct: {:?}", q.choices);
        }
    }

    #[test]
    fn short_material_builds_nothing() {
        let err = generate(&["Too short. Nope.".to_string()], opts(5, 1)).expect_err("empty");
        assert!(matches!(err, QuizError::NothingBuilt));
    }

    #[test]
    fn single_sentence_uses_fallback_distractors() {
        let only = vec!["Thermodynamics governs energy transfer across systems.".to_string()];
        let qs = generate(&only, opts(1, 3)).expect("quiz");
        assert_eq!(qs[0].choices.len(), 4);
    }

    #[test]
    fn fetch_limit_has_floor() {
        assert_eq!(fetch_limit(1), 10);
        assert_eq!(fetch_limit(5), 30);
    }
}
