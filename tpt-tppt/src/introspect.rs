//! Static introspection helpers a hosting decoder can run against a `.tppt`
//! base name before committing to opening it, mirroring the original
//! `tppt.h`'s `numScores`/`checkFileExists`/`totalMemmapSize` static methods.

use std::path::Path;

use tpt_base::Result;

use crate::config::TppConfig;

/// Every file `PhraseTable::open` needs, relative to a `.tppt` base name.
const REQUIRED_SUFFIXES: &[&str] =
    &[".src.tdx", ".trg.tdx", ".trg.repos.dat", ".trg.repos.idx", ".trie", ".cbk", ".trgref", ".config"];

/// Total score-column count a config implies: float scores plus (if
/// present) the single packed count column. Does not count the alignment
/// column, which is boolean rather than a score.
pub fn num_scores(config: &TppConfig) -> u32 {
    config.num_float_scores + u32::from(config.num_count_columns > 0)
}

/// `true` if every file `PhraseTable::open` would need for the TPPT at
/// `base` is present (does not validate their contents).
pub fn check_file_exists(base: &Path) -> bool {
    REQUIRED_SUFFIXES.iter().all(|suffix| suffixed(base, suffix).is_file())
}

/// Sum of the on-disk sizes of every file a `PhraseTable::open` at `base`
/// would memory-map, in bytes. Useful for a caller sizing an address-space
/// budget across several open models before actually opening any of them.
pub fn total_memmap_size(base: &Path) -> Result<u64> {
    let mut total = 0u64;
    for suffix in REQUIRED_SUFFIXES {
        let path = suffixed(base, suffix);
        let meta = std::fs::metadata(&path)
            .map_err(|e| tpt_base::err(format!("failed to stat {}: {e}", path.display())))?;
        total += meta.len();
    }
    Ok(total)
}

fn suffixed(base: &Path, suffix: &str) -> std::path::PathBuf {
    let mut s = base.as_os_str().to_os_string();
    s.push(suffix);
    s.into()
}
