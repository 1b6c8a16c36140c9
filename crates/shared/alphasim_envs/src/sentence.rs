//! Next-word prediction over a small sentence corpus.
//!
//! Sentences are the sequences and words are ticks within them, so the stack
//! is Tick < Sequence < Epoch < Run with the Tick bound changing per sentence.

use std::collections::BTreeMap;
use std::path::Path;

use alphasim::counter::{CounterStack, Scale};
use alphasim::environment::{Environment, IndexOrder, Pattern};
use alphasim::error::SimError;
use alphasim::prng::Prng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// End-of-sentence target after the last word.
pub const EOS: &str = "<eos>";

pub const INPUT: &str = "Input";
pub const OUTPUT: &str = "Output";
pub const MODIFIER: &str = "Modifier";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Token {
    pub word: String,
    /// Optional modifier phrase presented alongside the word.
    #[serde(default)]
    pub modifier: Option<String>,
}

impl Token {
    pub fn word(word: &str) -> Self {
        Self {
            word: word.to_string(),
            modifier: None,
        }
    }

    pub fn modified(word: &str, modifier: &str) -> Self {
        Self {
            word: word.to_string(),
            modifier: Some(modifier.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Sentence {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SentenceCorpus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sentences: Vec<Sentence>,
}

impl SentenceCorpus {
    pub fn builtin_roles() -> Self {
        let s = |id: &str, tokens: Vec<Token>| Sentence {
            id: id.to_string(),
            tokens,
        };
        Self {
            name: "roles".to_string(),
            sentences: vec![
                s(
                    "s0",
                    vec![
                        Token::word("the"),
                        Token::word("cat"),
                        Token::modified("chased", "quickly"),
                        Token::word("the"),
                        Token::word("dog"),
                    ],
                ),
                s("s1", vec![Token::word("a"), Token::word("dog"), Token::word("slept")]),
                s(
                    "s2",
                    vec![
                        Token::word("the"),
                        Token::word("bird"),
                        Token::modified("sang", "softly"),
                    ],
                ),
            ],
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self, SimError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// Word and modifier indices, sorted, with [`EOS`] as the last word.
#[derive(Debug, Clone, Default)]
struct Vocab {
    words: BTreeMap<String, usize>,
    modifiers: BTreeMap<String, usize>,
}

impl Vocab {
    fn build(corpus: &SentenceCorpus) -> Self {
        let mut words = BTreeMap::new();
        let mut modifiers = BTreeMap::new();
        for tok in corpus.sentences.iter().flat_map(|s| &s.tokens) {
            words.insert(tok.word.clone(), 0);
            if let Some(m) = &tok.modifier {
                modifiers.insert(m.clone(), 0);
            }
        }
        for (i, v) in words.values_mut().enumerate() {
            *v = i;
        }
        let eos = words.len();
        words.insert(EOS.to_string(), eos);
        for (i, v) in modifiers.values_mut().enumerate() {
            *v = i;
        }
        Self { words, modifiers }
    }

    fn word(&self, w: &str) -> Option<Pattern> {
        self.words
            .get(w)
            .map(|&i| Pattern::one_hot(self.words.len(), i))
    }

    fn modifier(&self, m: &str) -> Option<Pattern> {
        self.modifiers
            .get(m)
            .map(|&i| Pattern::one_hot(self.modifiers.len(), i))
    }
}

#[derive(Debug)]
pub struct SentenceEnv {
    name: String,
    corpus: SentenceCorpus,
    vocab: Vocab,
    counters: CounterStack,
    order: IndexOrder,
    rng: Prng,
}

impl SentenceEnv {
    pub fn new(name: &str, corpus: SentenceCorpus, sequential: bool) -> Self {
        let vocab = Vocab::build(&corpus);
        let n = corpus.sentences.len() as i64;
        Self {
            name: name.to_string(),
            corpus,
            vocab,
            counters: CounterStack::new([
                (Scale::Tick, 1),
                (Scale::Sequence, n),
                (Scale::Epoch, 0),
                (Scale::Run, 0),
            ]),
            order: IndexOrder::new(sequential),
            rng: Prng::new(1),
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.words.len()
    }

    pub fn modifier_count(&self) -> usize {
        self.vocab.modifiers.len()
    }

    fn current_sentence(&self) -> Option<&Sentence> {
        let seq = self.counters.cur(Scale::Sequence)?;
        let idx = self.order.index(seq)?;
        self.corpus.sentences.get(idx)
    }

    /// Current sentence and tick, once the first step has happened.
    fn current(&self) -> Option<(&Sentence, usize)> {
        let tick = usize::try_from(self.counters.cur(Scale::Tick)?).ok()?;
        let sentence = self.current_sentence()?;
        (tick < sentence.tokens.len()).then_some((sentence, tick))
    }

    /// Tick bound follows the length of whichever sentence is current.
    fn sync_tick_max(&mut self) {
        let len = self.current_sentence().map_or(1, |s| s.tokens.len());
        self.counters.set_max(Scale::Tick, len as i64);
    }
}

impl Environment for SentenceEnv {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, run: i64) -> Result<(), SimError> {
        let n = self.corpus.sentences.len();
        if n == 0 {
            return Err(SimError::env_init(&self.name, "corpus has no sentences"));
        }
        if let Some(s) = self.corpus.sentences.iter().find(|s| s.tokens.is_empty()) {
            return Err(SimError::env_init(
                &self.name,
                format!("sentence `{}` is empty", s.id),
            ));
        }
        self.counters.set_max(Scale::Sequence, n as i64);
        self.counters.reset(run);
        self.order.reset(n, &mut self.rng);
        self.sync_tick_max();
        Ok(())
    }

    fn step(&mut self) -> bool {
        self.counters.step();
        if self.counters.wrapped(Scale::Sequence) {
            self.order.reshuffle(&mut self.rng);
            debug!(env = %self.name, "reshuffled sentences");
        }
        self.sync_tick_max();
        true
    }

    fn counters(&self) -> &CounterStack {
        &self.counters
    }

    fn counters_mut(&mut self) -> &mut CounterStack {
        &mut self.counters
    }

    fn state(&self, element: &str) -> Option<Pattern> {
        let (sentence, tick) = self.current()?;
        let tok = &sentence.tokens[tick];
        match element {
            INPUT => self.vocab.word(&tok.word),
            OUTPUT => {
                let next = sentence.tokens.get(tick + 1).map_or(EOS, |t| t.word.as_str());
                self.vocab.word(next)
            }
            MODIFIER => tok.modifier.as_deref().and_then(|m| self.vocab.modifier(m)),
            _ => None,
        }
    }

    fn reseed(&mut self, seed: u64) {
        self.rng.reseed(seed);
    }

    fn item_name(&self) -> String {
        match self.current() {
            Some((s, tick)) => format!("{}:{}", s.id, s.tokens[tick].word),
            None => String::new(),
        }
    }
}
