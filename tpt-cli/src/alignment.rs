//! Subcommand bodies for spec.md §6.3's `tp_alignment_build` /
//! `tp_alignment_dump`. See [`crate::Command::TpAlignmentBuild`] for the
//! line format these two read and write.

use std::path::Path;

use tpt_base::{err, ioutil::MmapReader, Result};
use tpt_tpa::{TpaReader, TpaWriter};
use tracing::info;

fn parse_alignment_line(line: &str) -> Result<Vec<Vec<u32>>> {
    let (count_field, pairs_field) = line.split_once(" ||| ").ok_or_else(|| {
        err(format!("tp_alignment_build: malformed line (expected 'N ||| i-j ...'): {line:?}"))
    })?;
    let n: usize = count_field
        .trim()
        .parse()
        .map_err(|_| err(format!("tp_alignment_build: bad source length {count_field:?}")))?;
    let mut sets = vec![Vec::new(); n];
    for pair in pairs_field.split_whitespace() {
        let (i, j) = pair
            .split_once('-')
            .ok_or_else(|| err(format!("tp_alignment_build: malformed link {pair:?}")))?;
        let i: usize = i.parse().map_err(|_| err(format!("tp_alignment_build: bad source index {i:?}")))?;
        let j: u32 = j.parse().map_err(|_| err(format!("tp_alignment_build: bad target index {j:?}")))?;
        let set = sets
            .get_mut(i)
            .ok_or_else(|| err(format!("tp_alignment_build: source index {i} out of range (N={n})")))?;
        set.push(j);
    }
    Ok(sets)
}

fn format_alignment_line(sets: &[Vec<u32>]) -> String {
    let links: Vec<String> = sets
        .iter()
        .enumerate()
        .flat_map(|(i, set)| set.iter().map(move |&j| format!("{i}-{j}")))
        .collect();
    format!("{} ||| {}", sets.len(), links.join(" "))
}

pub fn build(green: &Path, out: &Path) -> Result<()> {
    let text = std::fs::read_to_string(green).map_err(|e| err(format!("failed to read {}: {e}", green.display())))?;
    let mut writer = TpaWriter::new();
    let mut lines = 0u32;
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let sets = parse_alignment_line(line)?;
        writer.push_line(&sets);
        lines += 1;
    }
    std::fs::write(out, writer.finish()).map_err(|e| err(format!("failed to write {}: {e}", out.display())))?;
    info!(lines, out = %out.display(), "tp_alignment_build: done");
    Ok(())
}

pub fn dump(tpa: &Path, from: Option<u32>, to: Option<u32>) -> Result<()> {
    let reader = TpaReader::parse(MmapReader::open(tpa)?)?;
    let from = from.unwrap_or(0);
    let to = to.unwrap_or(reader.size());
    if to > reader.size() || from > to {
        return Err(err(format!("tp_alignment_dump: range [{from}, {to}) out of bounds for {} lines", reader.size())));
    }
    for i in from..to {
        println!("{}", format_alignment_line(&reader.get(i)?));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_line() {
        let sets = parse_alignment_line("3 ||| 0-0 1-2 2-1").unwrap();
        assert_eq!(sets, vec![vec![0], vec![2], vec![1]]);
    }

    #[test]
    fn parses_empty_sets() {
        let sets = parse_alignment_line("2 ||| ").unwrap();
        assert_eq!(sets, vec![Vec::<u32>::new(), Vec::new()]);
    }

    #[test]
    fn parses_multi_link_source_position() {
        let sets = parse_alignment_line("2 ||| 0-0 0-1 1-2").unwrap();
        assert_eq!(sets, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn rejects_out_of_range_source_index() {
        assert!(parse_alignment_line("1 ||| 1-0").is_err());
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(parse_alignment_line("0-0 1-1").is_err());
    }

    #[test]
    fn round_trips_through_format() {
        let sets = vec![vec![0, 1], vec![], vec![2]];
        let line = format_alignment_line(&sets);
        assert_eq!(line, "3 ||| 0-0 0-1 2-2");
        assert_eq!(parse_alignment_line(&line).unwrap(), sets);
    }
}
