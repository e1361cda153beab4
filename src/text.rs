//! Nested labeled box rendering for message diagnostics.
//!
//! Messages support a secondary textual representation used while
//! bringing up a protocol: a tree of labeled boxes printed as ASCII art
//! at a fixed default width. The rendering is observational only;
//! nothing parses it back. The box label is the stable type tag of the
//! rendered message (`TpktPacket`, `Apdu`, ...).
//!
//! ```
//! use plclink::text::{box_value, AsciiBox};
//!
//! let b = box_value("tpduRef", "0x0F");
//! assert_eq!(
//!     b.to_string(),
//!     "╔═tpduRef╗\n║0x0F    ║\n╚════════╝"
//! );
//! ```

use std::fmt;

/// Default character width for rendered message trees.
pub const DEFAULT_WIDTH: usize = 100;

/// A rectangular block of text lines, all padded to the same width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsciiBox {
    lines: Vec<String>,
}

impl AsciiBox {
    /// Width of the box in characters.
    pub fn width(&self) -> usize {
        self.lines.first().map_or(0, |l| l.chars().count())
    }

    /// Height of the box in lines.
    pub fn height(&self) -> usize {
        self.lines.len()
    }

    fn padded_to(&self, width: usize, height: usize) -> Vec<String> {
        let mut lines: Vec<String> = self
            .lines
            .iter()
            .map(|l| {
                let mut l = l.clone();
                let missing = width.saturating_sub(l.chars().count());
                l.extend(std::iter::repeat(' ').take(missing));
                l
            })
            .collect();
        while lines.len() < height {
            lines.push(" ".repeat(width));
        }
        lines
    }
}

impl fmt::Display for AsciiBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lines.join("\n"))
    }
}

/// Draws a labeled box around arbitrary text content.
pub fn box_string(name: &str, content: &str) -> AsciiBox {
    let content_lines: Vec<&str> = if content.is_empty() {
        Vec::new()
    } else {
        content.lines().collect()
    };
    let inner_width = content_lines
        .iter()
        .map(|l| l.chars().count())
        .chain(std::iter::once(name.chars().count() + 1))
        .max()
        .unwrap_or(1);

    let mut lines = Vec::with_capacity(content_lines.len() + 2);
    let mut top = String::from("╔═");
    top.push_str(name);
    top.extend(std::iter::repeat('═').take(inner_width - name.chars().count() - 1));
    top.push('╗');
    lines.push(top);
    for line in content_lines {
        let mut row = String::from("║");
        row.push_str(line);
        row.extend(std::iter::repeat(' ').take(inner_width - line.chars().count()));
        row.push('║');
        lines.push(row);
    }
    let mut bottom = String::from("╚");
    bottom.extend(std::iter::repeat('═').take(inner_width));
    bottom.push('╝');
    lines.push(bottom);
    AsciiBox { lines }
}

/// Draws a labeled box around a single displayed value.
pub fn box_value(name: &str, value: impl fmt::Display) -> AsciiBox {
    box_string(name, &value.to_string())
}

/// Draws a labeled box around raw bytes rendered as hex pairs.
pub fn box_bytes(name: &str, bytes: &[u8]) -> AsciiBox {
    if bytes.is_empty() {
        return box_string(name, "(empty)");
    }
    // 16 byte pairs per rendered line.
    let content = bytes
        .chunks(16)
        .map(|chunk| {
            chunk
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n");
    box_string(name, &content)
}

/// Packs boxes left to right, wrapping rows so no row exceeds
/// `max_width` characters.
pub fn align_boxes(boxes: &[AsciiBox], max_width: usize) -> AsciiBox {
    let mut lines: Vec<String> = Vec::new();
    let mut row: Vec<&AsciiBox> = Vec::new();
    let mut row_width = 0usize;

    let flush = |row: &mut Vec<&AsciiBox>, lines: &mut Vec<String>| {
        if row.is_empty() {
            return;
        }
        let height = row.iter().map(|b| b.height()).max().unwrap_or(0);
        let padded: Vec<Vec<String>> = row.iter().map(|b| b.padded_to(b.width(), height)).collect();
        for i in 0..height {
            lines.push(
                padded
                    .iter()
                    .map(|b| b[i].as_str())
                    .collect::<Vec<_>>()
                    .concat(),
            );
        }
        row.clear();
    };

    for b in boxes {
        if !row.is_empty() && row_width + b.width() > max_width {
            flush(&mut row, &mut lines);
            row_width = 0;
        }
        row_width += b.width();
        row.push(b);
    }
    flush(&mut row, &mut lines);

    let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    let lines = lines
        .into_iter()
        .map(|mut l| {
            let missing = width.saturating_sub(l.chars().count());
            l.extend(std::iter::repeat(' ').take(missing));
            l
        })
        .collect();
    AsciiBox { lines }
}

/// Wraps an already-rendered box in an outer labeled box.
pub fn box_box(name: &str, inner: &AsciiBox) -> AsciiBox {
    box_string(name, &inner.to_string())
}

/// A message that can render itself as a nested labeled box tree.
pub trait DebugBox {
    /// Renders the message at [`DEFAULT_WIDTH`].
    fn debug_box(&self) -> AsciiBox;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_value_layout() {
        let b = box_value("sid", 7);
        assert_eq!(b.to_string(), "╔═sid╗\n║7   ║\n╚════╝");
    }

    #[test]
    fn test_box_width_grows_with_name() {
        let b = box_value("aVeryLongFieldName", "x");
        assert_eq!(b.width(), "aVeryLongFieldName".len() + 3);
        assert_eq!(b.height(), 3);
    }

    #[test]
    fn test_box_bytes_hex_rows() {
        let b = box_bytes("payload", &[0xDE, 0xAD, 0xBE, 0xEF]);
        let rendered = b.to_string();
        assert!(rendered.contains("de ad be ef"));
        assert!(rendered.starts_with("╔═payload"));
    }

    #[test]
    fn test_align_boxes_wraps_rows() {
        let a = box_value("a", 1);
        let b = box_value("b", 2);
        let aligned = align_boxes(&[a.clone(), b.clone()], 100);
        // Side by side: height of one box, double width.
        assert_eq!(aligned.height(), 3);
        assert_eq!(aligned.width(), a.width() + b.width());

        let stacked = align_boxes(&[a.clone(), b], a.width() + 1);
        assert_eq!(stacked.height(), 6);
    }

    #[test]
    fn test_box_box_nests() {
        let inner = box_value("counter", 3);
        let outer = box_box("Apdu", &inner);
        let rendered = outer.to_string();
        assert!(rendered.starts_with("╔═Apdu"));
        assert!(rendered.contains("║╔═counter╗"));
    }
}
