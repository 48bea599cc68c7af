//! ARPA back-off language-model text format parsing (spec.md §4.9 pass 1's
//! input). spec.md §1 excludes "the legacy ARPA reading facet that excludes
//! vertical tab from whitespace" -- honored here by using `str::split_whitespace`
//! (Unicode whitespace, which already includes vertical tab) with no
//! special-casing of any particular control character.

use tpt_base::{err, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct ArpaEntry {
    pub tokens: Vec<String>,
    pub log_prob: f32,
    pub backoff: Option<f32>,
}

/// `orders[k-1]` holds every order-`k` entry, in file order.
#[derive(Clone, Debug, Default)]
pub struct ArpaModel {
    pub orders: Vec<Vec<ArpaEntry>>,
}

impl ArpaModel {
    pub fn max_order(&self) -> u32 {
        self.orders.len() as u32
    }
}

pub fn parse_arpa(text: &str) -> Result<ArpaModel> {
    let mut model = ArpaModel::default();
    let mut current_order: Option<usize> = None;
    let mut saw_end = false;

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line == "\\data\\" {
            continue;
        }
        if line == "\\end\\" {
            saw_end = true;
            break;
        }
        if line.starts_with("ngram ") {
            continue; // declared counts are advisory; actual entry counts govern
        }
        if let Some(rest) = line.strip_prefix('\\') {
            if let Some(order_str) = rest.strip_suffix("-grams:") {
                let order: usize = order_str
                    .parse()
                    .map_err(|_| err(format!("arpa: malformed section header {line:?}")))?;
                if order == 0 {
                    return Err(err("arpa: n-gram order must be >= 1"));
                }
                while model.orders.len() < order {
                    model.orders.push(Vec::new());
                }
                current_order = Some(order);
                continue;
            }
        }

        let order = current_order.ok_or_else(|| err(format!("arpa: entry line outside any n-gram section: {line:?}")))?;
        let mut fields = line.split_whitespace();
        let log_prob: f32 = fields
            .next()
            .ok_or_else(|| err("arpa: entry line missing log-probability field"))?
            .parse()
            .map_err(|e| err(format!("arpa: bad log-probability on line {line:?}: {e}")))?;
        let mut tokens = Vec::with_capacity(order);
        for _ in 0..order {
            let w = fields
                .next()
                .ok_or_else(|| err(format!("arpa: order-{order} entry has fewer than {order} tokens: {line:?}")))?;
            tokens.push(w.to_string());
        }
        let backoff = match fields.next() {
            Some(s) => Some(s.parse::<f32>().map_err(|e| err(format!("arpa: bad back-off weight on line {line:?}: {e}")))?),
            None => None,
        };
        model.orders[order - 1].push(ArpaEntry { tokens, log_prob, backoff });
    }

    if !saw_end {
        return Err(err("arpa: missing \\end\\ marker"));
    }
    Ok(model)
}
