//! Subcommand bodies for spec.md §6.3's `textpt_encode_phrases` /
//! `textpt_encode_scores` / `textpt_assemble` / `tppt_dump`.

use std::path::Path;

use tpt_base::{err, Result};
use tpt_tppt::{build, parse_line, PhraseTable, TppConfig};
use tracing::info;

fn read_rows(text_pt: &Path, alignment: bool, counts: bool) -> Result<Vec<tpt_tppt::TextRow>> {
    let text = std::fs::read_to_string(text_pt)
        .map_err(|e| err(format!("failed to read {}: {e}", text_pt.display())))?;
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| parse_line(l, alignment, counts))
        .collect()
}

fn base_path(base: &Path, suffix: &str) -> std::path::PathBuf {
    let mut s = base.as_os_str().to_os_string();
    s.push(suffix);
    s.into()
}

fn write(path: &std::path::Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).map_err(|e| err(format!("failed to write {}: {e}", path.display())))
}

pub fn encode_phrases(text_pt: &Path, base: &Path, alignment: bool, counts: bool) -> Result<()> {
    let rows = read_rows(text_pt, alignment, counts)?;
    info!(rows = rows.len(), "textpt_encode_phrases: parsed phrase table");
    let artifacts = build(&rows, tpt_codec::DEFAULT_MAX_BLOCKS)?;

    write(&base_path(base, ".src.tdx"), &artifacts.src_tdx)?;
    write(&base_path(base, ".trg.tdx"), &artifacts.trg_tdx)?;
    write(&base_path(base, ".src.repos.dat"), &artifacts.src_repo_dat)?;
    write(&base_path(base, ".src.repos.idx"), &artifacts.src_repo_idx)?;
    write(&base_path(base, ".trg.repos.dat"), &artifacts.trg_repo_dat)?;
    write(&base_path(base, ".trg.repos.idx"), &artifacts.trg_repo_idx)?;
    write(&base_path(base, ".src.col"), &u64_col_bytes(&artifacts.src_col))?;
    write(&base_path(base, ".trg.col"), &u64_col_bytes(&artifacts.trg_col))?;
    info!(base = %base.display(), "textpt_encode_phrases: done");
    Ok(())
}

pub fn encode_scores(text_pt: &Path, base: &Path, alignment: bool, counts: bool, max_blocks: u32) -> Result<()> {
    let rows = read_rows(text_pt, alignment, counts)?;
    let artifacts = build(&rows, max_blocks)?;

    write(&base_path(base, ".cbk"), &artifacts.codebooks)?;
    write(&base_path(base, ".trgref"), &artifacts.trg_ref_table)?;
    write(&base_path(base, ".config"), artifacts.config.to_json().as_bytes())?;
    info!(base = %base.display(), "textpt_encode_scores: done");
    Ok(())
}

pub fn assemble(text_pt: &Path, base: &Path, alignment: bool, counts: bool, max_blocks: u32) -> Result<()> {
    let rows = read_rows(text_pt, alignment, counts)?;
    let artifacts = build(&rows, max_blocks)?;

    // Writes the full set a `PhraseTable::open` needs, regardless of
    // whether the earlier passes were run against this base name -- see
    // the module doc comment in `main.rs`.
    write(&base_path(base, ".src.tdx"), &artifacts.src_tdx)?;
    write(&base_path(base, ".trg.tdx"), &artifacts.trg_tdx)?;
    write(&base_path(base, ".trg.repos.dat"), &artifacts.trg_repo_dat)?;
    write(&base_path(base, ".trg.repos.idx"), &artifacts.trg_repo_idx)?;
    write(&base_path(base, ".cbk"), &artifacts.codebooks)?;
    write(&base_path(base, ".trgref"), &artifacts.trg_ref_table)?;
    write(&base_path(base, ".config"), artifacts.config.to_json().as_bytes())?;
    write(&base_path(base, ".trie"), &artifacts.trie)?;
    info!(base = %base.display(), rows = rows.len(), "textpt_assemble: wrote .tppt artifacts");
    Ok(())
}

pub fn dump(base: &Path) -> Result<()> {
    let config_json = std::fs::read_to_string(base_path(base, ".config"))
        .map_err(|e| err(format!("failed to read {}.config: {e}", base.display())))?;
    let config = TppConfig::from_json(&config_json)?;
    let codebooks = std::fs::read(base_path(base, ".cbk")).map_err(|e| err(format!("failed to read .cbk: {e}")))?;
    let trg_ref_table = std::fs::read(base_path(base, ".trgref")).map_err(|e| err(format!("failed to read .trgref: {e}")))?;

    let table = PhraseTable::open(
        tpt_base::ioutil::MmapReader::open(base_path(base, ".src.tdx"))?,
        tpt_base::ioutil::MmapReader::open(base_path(base, ".trg.tdx"))?,
        tpt_base::ioutil::MmapReader::open(base_path(base, ".trg.repos.dat"))?,
        tpt_base::ioutil::MmapReader::open(base_path(base, ".trg.repos.idx"))?,
        tpt_base::ioutil::MmapReader::open(base_path(base, ".trie"))?,
        &codebooks,
        &trg_ref_table,
        config,
    )?;

    for line in table.dump()? {
        println!("{line}");
    }
    Ok(())
}

fn u64_col_bytes(col: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(col.len() * 8);
    for &v in col {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

