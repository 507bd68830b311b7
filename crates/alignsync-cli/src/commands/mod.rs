//! Command handlers

pub mod config;
pub mod journal;
pub mod link;
pub mod project;
pub mod status;
pub mod sync;
pub mod transfer;
pub mod words;

/// Source and target corpora holding Ruth 1:1, words 1 to `words`
#[cfg(test)]
pub(crate) fn ruth_corpora(words: u16) -> Vec<alignsync_core::Corpus> {
    use alignsync_core::{AlignmentSide, Corpus, Language, Reference, Word};

    [("wlc", AlignmentSide::Source), ("kjv", AlignmentSide::Target)]
        .into_iter()
        .map(|(id, side)| {
            let mut corpus = Corpus::new(id, id.to_uppercase(), side, Language::new("und"));
            corpus.words = (1..=words)
                .map(|w| Word::new(Reference::word(8, 1, 1, w).unwrap(), id, side, format!("w{}", w)))
                .collect();
            corpus
        })
        .collect()
}
