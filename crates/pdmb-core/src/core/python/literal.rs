//! Rendering of Python literals for generated source files.

use std::collections::BTreeMap;
use std::fmt::Write as _;

/// `repr()` of a Python `str`.
pub(crate) fn py_str(value: &str) -> String {
    let quote = if value.contains('\'') && !value.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(value.len() + 2);
    out.push(quote);
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ch if ch == quote => {
                out.push('\\');
                out.push(ch);
            }
            ch if (ch as u32) < 0x20 || ch as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", ch as u32);
            }
            ch => out.push(ch),
        }
    }
    out.push(quote);
    out
}

/// A list literal with one item per line, items indented by `indent`.
pub(crate) fn py_list_block(items: &[String], indent: usize) -> String {
    let mut lines = vec!["[".to_string()];
    for item in items {
        lines.push(format!("{}{},", " ".repeat(indent), py_str(item)));
    }
    lines.push(format!("{}]", " ".repeat(indent.saturating_sub(4))));
    lines.join("\n")
}

/// A dict of lists, one key per line.
pub(crate) fn py_dict_block(data: &BTreeMap<String, Vec<String>>, indent: usize) -> String {
    let mut lines = vec!["{".to_string()];
    for (key, values) in data {
        lines.push(format!(
            "{}{}: {},",
            " ".repeat(indent),
            py_str(key),
            py_list_block(values, indent + 4)
        ));
    }
    lines.push(format!("{}}}", " ".repeat(indent.saturating_sub(4))));
    lines.join("\n")
}

/// A dict of lists on a single line, as `repr()` prints it.
pub(crate) fn py_dict_inline(data: &BTreeMap<String, Vec<String>>) -> String {
    let entries: Vec<String> = data
        .iter()
        .map(|(key, values)| {
            let items: Vec<String> = values.iter().map(|value| py_str(value)).collect();
            format!("{}: [{}]", py_str(key), items.join(", "))
        })
        .collect();
    format!("{{{}}}", entries.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_follow_repr_quoting() {
        assert_eq!(py_str("plain"), "'plain'");
        assert_eq!(py_str("it's"), "\"it's\"");
        assert_eq!(py_str("both ' and \""), "'both \\' and \"'");
        assert_eq!(py_str("C:\\src\npath"), "'C:\\\\src\\npath'");
    }

    #[test]
    fn blocks_are_indented() {
        assert_eq!(
            py_list_block(&["a".into(), "b".into()], 8),
            "[\n        'a',\n        'b',\n    ]"
        );
        let data = BTreeMap::from([("console_scripts".to_string(), vec!["x = y:z".to_string()])]);
        assert_eq!(
            py_dict_block(&data, 4),
            "{\n    'console_scripts': [\n        'x = y:z',\n    ],\n}"
        );
        assert_eq!(py_dict_inline(&data), "{'console_scripts': ['x = y:z']}");
    }
}
