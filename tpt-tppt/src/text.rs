//! Text phrase-table row parsing: the `textpt_*` programs' common input
//! format (spec.md §6.3), a pipe-delimited line of
//! `src ||| trg ||| scores [||| alignment] [||| counts]` fields, mirroring
//! the layout the phrase-table text format already uses upstream. Scoring
//! itself is out of scope (spec.md §1); this only tokenizes the line.

use tpt_base::{err, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct TextRow {
    pub src: Vec<String>,
    pub trg: Vec<String>,
    pub float_scores: Vec<f32>,
    pub alignment: Option<Vec<Vec<u32>>>,
    pub counts: Vec<u32>,
}

pub fn parse_line(line: &str, has_alignment: bool, has_counts: bool) -> Result<TextRow> {
    let mut fields = line.split(" ||| ");
    let src: Vec<String> = fields
        .next()
        .ok_or_else(|| err("text phrase table: missing source-phrase field"))?
        .split_whitespace()
        .map(String::from)
        .collect();
    let trg: Vec<String> = fields
        .next()
        .ok_or_else(|| err("text phrase table: missing target-phrase field"))?
        .split_whitespace()
        .map(String::from)
        .collect();
    let scores_field = fields
        .next()
        .ok_or_else(|| err("text phrase table: missing scores field"))?;
    let float_scores = scores_field
        .split_whitespace()
        .map(|s| s.parse::<f32>().map_err(|e| err(format!("text phrase table: bad score {s:?}: {e}"))))
        .collect::<Result<Vec<f32>>>()?;

    let alignment = if has_alignment {
        let field = fields
            .next()
            .ok_or_else(|| err("text phrase table: missing alignment field"))?;
        Some(parse_alignment(field, src.len())?)
    } else {
        None
    };

    let counts = if has_counts {
        let field = fields
            .next()
            .ok_or_else(|| err("text phrase table: missing counts field"))?;
        field
            .split_whitespace()
            .map(|s| s.parse::<u32>().map_err(|e| err(format!("text phrase table: bad count {s:?}: {e}"))))
            .collect::<Result<Vec<u32>>>()?
    } else {
        Vec::new()
    };

    Ok(TextRow { src, trg, float_scores, alignment, counts })
}

fn parse_alignment(field: &str, src_len: usize) -> Result<Vec<Vec<u32>>> {
    let mut sets = vec![Vec::new(); src_len];
    for pair in field.split_whitespace() {
        let (i, j) = pair
            .split_once('-')
            .ok_or_else(|| err(format!("text phrase table: malformed alignment pair {pair:?}")))?;
        let i: usize = i.parse().map_err(|_| err(format!("text phrase table: bad alignment index {i:?}")))?;
        let j: u32 = j.parse().map_err(|_| err(format!("text phrase table: bad alignment index {j:?}")))?;
        let set = sets
            .get_mut(i)
            .ok_or_else(|| err(format!("text phrase table: alignment source index {i} out of range")))?;
        set.push(j);
    }
    Ok(sets)
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn parses_the_smallest_seed_rows() {
        let row = parse_line("a ||| b ||| 1 1", false, false).unwrap();
        assert_eq!(row.src, vec!["a"]);
        assert_eq!(row.trg, vec!["b"]);
        assert_eq!(row.float_scores, vec![1.0, 1.0]);
        assert_eq!(row.alignment, None);
        assert!(row.counts.is_empty());
    }

    #[test]
    fn parses_alignment_and_counts() {
        let row = parse_line("a b ||| x y ||| 0.5 0.5 ||| 0-0 1-1 ||| 3 4", true, true).unwrap();
        assert_eq!(row.alignment, Some(vec![vec![0], vec![1]]));
        assert_eq!(row.counts, vec![3, 4]);
    }

    #[test]
    fn missing_alignment_field_is_an_error_when_expected() {
        assert!(parse_line("a ||| b ||| 1", true, false).is_err());
    }

    #[test]
    fn alignment_index_out_of_range_is_rejected() {
        assert!(parse_line("a ||| x y ||| 1 ||| 5-0", true, false).is_err());
    }
}
