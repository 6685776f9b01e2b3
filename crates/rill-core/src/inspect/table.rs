//! Tables built from keyed emissions.

use super::format::{FormatOptions, format};
use crate::value::Value;

const SEPARATOR: &str = " │ ";

/// Accumulates keyed emissions of one cell run.
///
/// Row `i`, column `j` holds the `j`-th value emitted under the `i`-th key,
/// rows in order of first use.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyedEchoAggregator {
    rows: Vec<(String, Vec<Value>)>,
}

impl KeyedEchoAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &str, value: Value) {
        match self.rows.iter_mut().find(|(k, _)| k == key) {
            Some((_, values)) => values.push(value),
            None => self.rows.push((key.to_string(), vec![value])),
        }
    }

    pub fn row(&self, key: &str) -> Option<&[Value]> {
        self.rows
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, values)| values.as_slice())
    }

    pub fn rows(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.rows.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of columns: the longest row.
    pub fn columns(&self) -> usize {
        self.rows.iter().map(|(_, v)| v.len()).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn reset(&mut self) {
        self.rows.clear();
    }

    /// Cell texts, with `""` where a row is shorter than the table.
    pub fn cells(&self, options: &FormatOptions) -> Vec<(String, Vec<String>)> {
        let columns = self.columns();
        self.rows
            .iter()
            .map(|(key, values)| {
                let mut cells: Vec<String> = values.iter().map(|v| format(v, options)).collect();
                cells.resize(columns, String::new());
                (key.clone(), cells)
            })
            .collect()
    }

    /// Render as aligned text, one line per key.
    pub fn render(&self, options: &FormatOptions) -> String {
        let rows = self.cells(options);
        let label_width = rows.iter().map(|(k, _)| width(k)).max().unwrap_or(0);
        let mut widths = vec![0; self.columns()];
        for (_, cells) in &rows {
            for (w, cell) in widths.iter_mut().zip(cells) {
                *w = (*w).max(width(cell));
            }
        }

        rows.iter()
            .map(|(key, cells)| {
                let mut line = pad(key, label_width);
                for (cell, w) in cells.iter().zip(&widths) {
                    line.push_str(SEPARATOR);
                    line.push_str(&pad(cell, *w));
                }
                line.trim_end().to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn width(text: &str) -> usize {
    text.chars().count()
}

fn pad(text: &str, to: usize) -> String {
    let mut out = text.to_string();
    out.extend(std::iter::repeat_n(' ', to.saturating_sub(width(text))));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_key_three_calls() {
        let mut table = KeyedEchoAggregator::new();
        for i in 0..3 {
            table.push("k", Value::from(i));
        }
        assert_eq!(table.columns(), 3);
        assert_eq!(
            table.row("k"),
            Some(&[Value::from(0), Value::from(1), Value::from(2)][..])
        );
        assert_eq!(table.render(&FormatOptions::default()), "k │ 0 │ 1 │ 2");
    }

    #[test]
    fn test_binary_search_steps() {
        let items = [1, 3, 5, 7, 9, 11, 13, 15, 17, 19];
        let target = 5;
        let mut table = KeyedEchoAggregator::new();
        let (mut lo, mut hi) = (0usize, items.len() - 1);
        while lo <= hi {
            let mi = (lo + hi) / 2;
            let val = items[mi];
            table.push("lo", lo.into());
            table.push("hi", hi.into());
            table.push("mi", mi.into());
            table.push("val", Value::from(val));
            if val == target {
                break;
            } else if val < target {
                lo = mi + 1;
            } else {
                hi = mi - 1;
            }
        }

        let keys: Vec<&str> = table.rows().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["lo", "hi", "mi", "val"]);
        assert_eq!(table.columns(), 3);
        assert_eq!(
            table.render(&FormatOptions::default()),
            [
                "lo  │ 0 │ 0 │ 2",
                "hi  │ 9 │ 3 │ 3",
                "mi  │ 4 │ 1 │ 2",
                "val │ 9 │ 3 │ 5",
            ]
            .join("\n")
        );
    }

    #[test]
    fn test_short_rows_pad_blank() {
        let mut table = KeyedEchoAggregator::new();
        table.push("a", Value::from("x"));
        table.push("b", Value::from(10));
        table.push("b", Value::from(20));

        let cells = table.cells(&FormatOptions::default());
        assert_eq!(cells[0].1, vec!["\"x\"".to_string(), String::new()]);
        assert_eq!(
            table.render(&FormatOptions::default()),
            "a │ \"x\" │\nb │ 10  │ 20"
        );
    }

    #[test]
    fn test_reset() {
        let mut table = KeyedEchoAggregator::new();
        table.push("k", Value::Null);
        table.reset();
        assert!(table.is_empty());
        assert_eq!(table.render(&FormatOptions::default()), "");
    }
}
