use std::io::{self, Write};

use super::ifd::{self, ByteOrder, Entry, Ifd};
use super::tags;
use crate::plan::SectionId;

/// Max values shown for one field before the listing is cut short.
const MAX_VALUES: usize = 8;
/// Max bytes shown for byte-like fields.
const MAX_BYTES: usize = 16;
/// Max characters shown for strings.
const MAX_CHARS: usize = 64;

/// Print a section header and one line per field.
pub fn write_section(
    out: &mut dyn Write,
    section: SectionId,
    ifd: &Ifd,
    order: ByteOrder,
) -> io::Result<()> {
    writeln!(
        out,
        "{} ({} field{})",
        tags::section_title(section),
        ifd.entries.len(),
        if ifd.entries.len() == 1 { "" } else { "s" }
    )?;
    writeln!(out, "{}", "─".repeat(72))?;
    for entry in &ifd.entries {
        let name = tags::tag_name(section, entry.tag).unwrap_or("unknown");
        let kind = format!("{}[{}]", ifd::format_name(entry.format), entry.count);
        writeln!(
            out,
            "  0x{:04x} {:<28} {:<14} {}",
            entry.tag,
            name,
            kind,
            render(entry, order)
        )?;
    }
    writeln!(out)
}

/// Maker notes are kept undecoded: show their size and first bytes.
pub fn write_maker_note(out: &mut dyn Write, note: &Entry) -> io::Result<()> {
    writeln!(out, "{} ({} bytes, not decoded)", tags::section_title(SectionId::MAKER), note.data.len())?;
    writeln!(out, "{}", "─".repeat(72))?;
    writeln!(out, "  {}", hex(&note.data))?;
    writeln!(out)
}

/// Render the value of a field as a single line.
pub fn render(entry: &Entry, order: ByteOrder) -> String {
    let data = &entry.data;
    match entry.format {
        ifd::ASCII => {
            let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
            let text = String::from_utf8_lossy(&data[..end]);
            let mut chars = text.chars();
            let shown: String = chars.by_ref().take(MAX_CHARS).collect();
            if chars.next().is_some() {
                format!("\"{shown}\"...")
            } else {
                format!("\"{shown}\"")
            }
        }
        ifd::SHORT => list(data.chunks_exact(2).map(|c| order.u16([c[0], c[1]]).to_string())),
        ifd::SSHORT => list(
            data.chunks_exact(2)
                .map(|c| (order.u16([c[0], c[1]]) as i16).to_string()),
        ),
        ifd::LONG | ifd::IFD => list(data.chunks_exact(4).map(|c| word(order, c).to_string())),
        ifd::SLONG => list(data.chunks_exact(4).map(|c| (word(order, c) as i32).to_string())),
        ifd::RATIONAL => list(
            data.chunks_exact(8)
                .map(|c| format!("{}/{}", word(order, &c[0..4]), word(order, &c[4..8]))),
        ),
        ifd::SRATIONAL => list(data.chunks_exact(8).map(|c| {
            format!(
                "{}/{}",
                word(order, &c[0..4]) as i32,
                word(order, &c[4..8]) as i32
            )
        })),
        ifd::FLOAT => list(
            data.chunks_exact(4)
                .map(|c| f32::from_bits(word(order, c)).to_string()),
        ),
        ifd::DOUBLE => list(data.chunks_exact(8).map(|c| {
            let (hi, lo) = match order {
                ByteOrder::Big => (word(order, &c[0..4]), word(order, &c[4..8])),
                ByteOrder::Little => (word(order, &c[4..8]), word(order, &c[0..4])),
            };
            f64::from_bits(((hi as u64) << 32) | lo as u64).to_string()
        })),
        ifd::SBYTE => list(data.iter().map(|&b| (b as i8).to_string())),
        _ => hex(data),
    }
}

fn word(order: ByteOrder, c: &[u8]) -> u32 {
    order.u32([c[0], c[1], c[2], c[3]])
}

fn list(values: impl Iterator<Item = String>) -> String {
    let mut values = values.peekable();
    let mut shown = Vec::new();
    while let Some(v) = values.next() {
        shown.push(v);
        if shown.len() == MAX_VALUES && values.peek().is_some() {
            return format!("{} ...", shown.join(" "));
        }
    }
    shown.join(" ")
}

fn hex(data: &[u8]) -> String {
    let shown: Vec<String> = data
        .iter()
        .take(MAX_BYTES)
        .map(|b| format!("{b:02x}"))
        .collect();
    if data.len() > MAX_BYTES {
        format!("{} ...", shown.join(" "))
    } else {
        shown.join(" ")
    }
}
