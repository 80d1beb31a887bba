use std::io::Write;
use std::path::Path;

use lexdict_core::suggest::{ProximityInfo, Suggest, SuggestRequest, WordComposer};
use lexdict_core::Dictionary;

use crate::CliError;

pub fn predict(path: &Path, prev_word: &str, prefix: &str, n: usize, out: &mut impl Write) -> Result<(), CliError> {
    let dict = Dictionary::open(path, false)?;
    let predictions = dict.get_predictions(prev_word, prefix);
    if predictions.is_empty() {
        writeln!(out, "(no predictions after '{prev_word}')")?;
    }
    for p in predictions.iter().take(n) {
        writeln!(out, "{}\t{}", p.word, p.probability)?;
    }
    Ok(())
}

/// Decode `typed` as taps on a QWERTY layout.
pub fn suggest(
    path: &Path,
    typed: &str,
    prev_word: Option<&str>,
    n: usize,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let dict = Dictionary::open(path, false)?;
    let proximity = ProximityInfo::qwerty();
    let composer = WordComposer::from_typed(typed);
    let mut request = SuggestRequest::new(&composer);
    request.prev_word = prev_word;
    request.proximity = Some(&proximity);
    request.max_results = n;

    for s in Suggest::default().get_suggestions(&dict, &request) {
        let kind = format!("{:?}", s.kind).to_lowercase();
        writeln!(out, "{}\t{}\t{kind}", s.word, s.score)?;
    }
    Ok(())
}
