// report-assembly-service/src/docx/textrun.rs

use std::io::Cursor;

use quick_xml::events::{BytesText, Event};
use quick_xml::{Reader, Writer};
use regex::Regex;

use crate::error::Result;

/// Addressable, mutable view of every `<w:t>` text fragment in one XML part.
///
/// The part is parsed once into an event sequence; text nodes are pulled out
/// as owned strings and mutated in place, and the sequence is serialized once
/// at the end. Non-breaking spaces are treated as plain spaces for matching,
/// and a needle may span any number of adjacent fragments.
pub struct TextRunIndex {
    nodes: Vec<Node>,
    runs: Vec<String>,
}

enum Node {
    Markup(Event<'static>),
    Run(usize),
}

/// Maps one flattened character back to a byte range inside a run.
struct CharLoc {
    run: usize,
    start: usize,
    len: usize,
}

impl TextRunIndex {
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        let mut nodes = Vec::new();
        let mut runs = Vec::new();
        let mut in_text_node = false;
        loop {
            match reader.read_event()? {
                Event::Eof => break,
                Event::Start(e) => {
                    if e.name().as_ref() == b"w:t" {
                        in_text_node = true;
                    }
                    nodes.push(Node::Markup(Event::Start(e.into_owned())));
                }
                Event::End(e) => {
                    if e.name().as_ref() == b"w:t" {
                        in_text_node = false;
                    }
                    nodes.push(Node::Markup(Event::End(e.into_owned())));
                }
                Event::Text(t) if in_text_node => {
                    let text = t.unescape()?.into_owned();
                    nodes.push(Node::Run(runs.len()));
                    runs.push(text);
                }
                other => nodes.push(Node::Markup(other.into_owned())),
            }
        }
        Ok(Self { nodes, runs })
    }

    /// Concatenation of all fragments with NBSP normalized, plus a per-char
    /// map back into the owning fragment.
    fn flattened(&self) -> (String, Vec<CharLoc>) {
        let mut joined = String::new();
        let mut locs = Vec::new();
        for (run_idx, run) in self.runs.iter().enumerate() {
            for (byte_off, ch) in run.char_indices() {
                joined.push(if ch == '\u{a0}' { ' ' } else { ch });
                locs.push(CharLoc {
                    run: run_idx,
                    start: byte_off,
                    len: ch.len_utf8(),
                });
            }
        }
        (joined, locs)
    }

    /// Full text of the part (NBSP-normalized), fragment boundaries erased.
    pub fn text(&self) -> String {
        self.flattened().0
    }

    pub fn contains(&self, needle: &str) -> bool {
        !needle.is_empty() && self.text().contains(&normalize(needle))
    }

    /// Replace the first occurrence of `needle` with `replacement`.
    ///
    /// A match inside one fragment is substituted directly. A match spanning
    /// fragments replaces the covered tail of the first fragment, blanks every
    /// fully covered fragment in between, and trims the covered head of the
    /// last one, leaving the surrounding markup intact.
    pub fn replace_first(&mut self, needle: &str, replacement: &str) -> bool {
        if needle.is_empty() {
            return false;
        }
        let needle = normalize(needle);
        let (joined, locs) = self.flattened();
        let Some(byte_pos) = joined.find(&needle) else {
            return false;
        };
        let char_start = joined[..byte_pos].chars().count();
        let char_end = char_start + needle.chars().count() - 1;
        let first = &locs[char_start];
        let last = &locs[char_end];

        if first.run == last.run {
            self.runs[first.run].replace_range(first.start..last.start + last.len, replacement);
        } else {
            self.runs[last.run].replace_range(..last.start + last.len, "");
            for run in &mut self.runs[first.run + 1..last.run] {
                run.clear();
            }
            let head = &mut self.runs[first.run];
            head.truncate(first.start);
            head.push_str(replacement);
        }
        true
    }

    /// Replace every occurrence of `needle`, bounded by `cap` passes so a
    /// replacement that still contains the needle cannot loop forever.
    pub fn replace_all(&mut self, needle: &str, replacement: &str, cap: u32) -> u32 {
        let mut count = 0;
        while count < cap && self.replace_first(needle, replacement) {
            count += 1;
        }
        count
    }

    /// Strip accidental whitespace just inside `{{` `}}` delimiters. Runs on
    /// the flattened view so padding split across fragments is caught too.
    pub fn normalize_token_whitespace(&mut self) {
        let token = Regex::new(r"(?s)\{\{\s*(.*?)\s*\}\}").expect("static regex");
        // Each pass tightens one token; bounded in case of pathological input.
        for _ in 0..1000 {
            let text = self.text();
            let Some(cap) = token
                .captures_iter(&text)
                .find(|c| c[0] != format!("{{{{{}}}}}", &c[1]))
            else {
                break;
            };
            let canonical = format!("{{{{{}}}}}", &cap[1]);
            self.replace_first(&cap[0], &canonical);
        }
    }

    /// Serialize the (possibly mutated) part back to XML.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        for node in &self.nodes {
            match node {
                Node::Markup(ev) => writer.write_event(ev)?,
                Node::Run(idx) => {
                    writer.write_event(&Event::Text(BytesText::new(&self.runs[*idx])))?
                }
            }
        }
        let bytes = writer.into_inner().into_inner();
        Ok(String::from_utf8(bytes).expect("serialized XML is UTF-8"))
    }
}

fn normalize(s: &str) -> String {
    s.replace('\u{a0}', " ")
}
