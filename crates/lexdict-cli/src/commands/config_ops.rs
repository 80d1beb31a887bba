use std::fs;
use std::io::Write;
use std::path::Path;

use crate::CliError;

pub fn settings_export(out: &mut impl Write) -> Result<(), CliError> {
    write!(out, "{}", lexdict_core::settings::default_toml())?;
    Ok(())
}

pub fn settings_validate(file: &Path, out: &mut impl Write) -> Result<(), CliError> {
    let content = fs::read_to_string(file)?;
    let s = lexdict_core::settings::parse_settings_toml(&content)?;
    writeln!(
        out,
        "OK: suggest.max_results={}, gc.max_unigram_count={}, pool.max_open={}",
        s.suggest.max_results, s.gc.max_unigram_count, s.pool.max_open
    )?;
    Ok(())
}
