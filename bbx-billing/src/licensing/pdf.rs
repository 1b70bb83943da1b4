//! Minimal text-only PDF writer
//!
//! Produces a PDF 1.4 file with one Helvetica text block per page. Enough
//! for license documents; no images, no compression.

const PAGE_WIDTH: u32 = 612;
const PAGE_HEIGHT: u32 = 792;
const MARGIN_LEFT: u32 = 56;
const FIRST_BASELINE: u32 = 740;
const FONT_SIZE: u32 = 11;
const LEADING: u32 = 15;
const LINES_PER_PAGE: usize = 45;
const MAX_LINE_CHARS: usize = 90;

/// Escape a line for a PDF literal string; non-ASCII becomes '?'
fn escape(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    for c in line.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            ' '..='~' => out.push(c),
            '\t' => out.push(' '),
            _ => out.push('?'),
        }
    }
    out
}

/// Word-wrap to the page width
fn wrap(line: &str) -> Vec<String> {
    if line.chars().count() <= MAX_LINE_CHARS {
        return vec![line.to_string()];
    }

    let mut wrapped = Vec::new();
    let mut current = String::new();
    for word in line.split_whitespace() {
        let needed = if current.is_empty() { 0 } else { 1 } + word.chars().count();
        if !current.is_empty() && current.chars().count() + needed > MAX_LINE_CHARS {
            wrapped.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        wrapped.push(current);
    }
    wrapped
}

fn content_stream(lines: &[String]) -> String {
    let mut stream = format!(
        "BT\n/F1 {} Tf\n{} TL\n{} {} Td\n",
        FONT_SIZE, LEADING, MARGIN_LEFT, FIRST_BASELINE
    );
    for line in lines {
        stream.push_str(&format!("({}) Tj T*\n", escape(line)));
    }
    stream.push_str("ET\n");
    stream
}

/// Render lines into PDF bytes
pub fn render_pdf(title: &str, lines: &[String]) -> Vec<u8> {
    let wrapped: Vec<String> = lines.iter().flat_map(|l| wrap(l)).collect();
    let empty: &[String] = &[];
    let pages: Vec<&[String]> = if wrapped.is_empty() {
        vec![empty]
    } else {
        wrapped.chunks(LINES_PER_PAGE).collect()
    };

    // 1 catalog, 2 page tree, 3 font, 4 info, then (page, content) pairs
    let page_ids: Vec<usize> = (0..pages.len()).map(|i| 5 + i * 2).collect();
    let mut objects: Vec<String> = Vec::with_capacity(4 + pages.len() * 2);

    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());
    let kids = page_ids
        .iter()
        .map(|id| format!("{} 0 R", id))
        .collect::<Vec<_>>()
        .join(" ");
    objects.push(format!(
        "<< /Type /Pages /Kids [{}] /Count {} >>",
        kids,
        pages.len()
    ));
    objects.push("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string());
    objects.push(format!("<< /Title ({}) /Producer (bbx-billing) >>", escape(title)));

    for (page, page_id) in pages.iter().zip(&page_ids) {
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
             /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
            PAGE_WIDTH,
            PAGE_HEIGHT,
            page_id + 1
        ));
        let stream = content_stream(page);
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}endstream",
            stream.len(),
            stream
        ));
    }

    let mut out: Vec<u8> = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");

    let mut offsets = Vec::with_capacity(objects.len());
    for (index, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", index + 1, body).as_bytes());
    }

    let xref_offset = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R /Info 4 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_offset
        )
        .as_bytes(),
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_text(bytes: &[u8]) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_header_and_trailer() {
        let pdf = as_text(&render_pdf("License", &["Hello".to_string()]));
        assert!(pdf.starts_with("%PDF-1.4\n"));
        assert!(pdf.ends_with("%%EOF\n"));
        assert!(pdf.contains("(Hello) Tj"));
        assert!(pdf.contains("/Count 1"));
    }

    #[test]
    fn test_xref_offsets_point_at_objects() {
        let bytes = render_pdf("License", &["a".to_string(), "b".to_string()]);
        let pdf = as_text(&bytes);

        let startxref = pdf.rfind("startxref\n").unwrap();
        let xref_offset: usize = pdf[startxref + 10..]
            .lines()
            .next()
            .unwrap()
            .parse()
            .unwrap();
        assert!(pdf[xref_offset..].starts_with("xref\n"));

        let entries: Vec<&str> = pdf[xref_offset..].lines().skip(3).take(6).collect();
        for (index, entry) in entries.iter().enumerate() {
            let offset: usize = entry[..10].parse().unwrap();
            assert!(
                pdf[offset..].starts_with(&format!("{} 0 obj", index + 1)),
                "entry {} -> {}",
                index + 1,
                offset
            );
        }
    }

    #[test]
    fn test_escaping() {
        assert_eq!(escape(r"a (b) \c"), r"a \(b\) \\c");
        assert_eq!(escape("café"), "caf?");
    }

    #[test]
    fn test_paginates_long_documents() {
        let lines: Vec<String> = (0..100).map(|i| format!("line {}", i)).collect();
        let pdf = as_text(&render_pdf("Long", &lines));
        assert!(pdf.contains("/Count 3"));
    }

    #[test]
    fn test_wraps_long_lines() {
        let long = "word ".repeat(40);
        let wrapped = wrap(long.trim());
        assert!(wrapped.len() > 1);
        assert!(wrapped.iter().all(|l| l.chars().count() <= MAX_LINE_CHARS));
    }

    #[test]
    fn test_empty_document_has_one_page() {
        let pdf = as_text(&render_pdf("Empty", &[]));
        assert!(pdf.contains("/Count 1"));
    }
}
