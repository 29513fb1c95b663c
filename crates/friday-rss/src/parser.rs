//! RSS 2.0, RSS 1.0 (RDF) and Atom documents into [`ParsedFeed`].

use chrono::{DateTime, Utc};
use friday_storage::FeedMetadata;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use std::sync::LazyLock;

use crate::fetcher::FetchError;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag pattern"));
static SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub guid: Option<String>,
    /// Plain-text body, markup removed.
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub categories: Vec<String>,
}

impl FeedItem {
    /// Source identity of the item: its GUID, else its link.
    pub fn identity(&self) -> Option<&str> {
        self.guid
            .as_deref()
            .or(self.link.as_deref())
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    pub metadata: FeedMetadata,
    pub items: Vec<FeedItem>,
}

#[derive(Default)]
struct ItemDraft {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    summary: Option<String>,
    content: Option<String>,
    published: Option<DateTime<Utc>>,
    updated: Option<DateTime<Utc>>,
    author: Option<String>,
    categories: Vec<String>,
}

impl ItemDraft {
    fn finish(self) -> FeedItem {
        let description = self
            .summary
            .or(self.content)
            .map(|raw| html_to_text(&raw))
            .filter(|text| !text.is_empty());
        FeedItem {
            title: self.title.map(|t| html_to_text(&t)).filter(|t| !t.is_empty()),
            link: self.link,
            guid: self.guid,
            description,
            published_at: self.published.or(self.updated),
            author: self.author,
            categories: self.categories,
        }
    }
}

#[derive(Default)]
struct ParseState {
    root: Option<String>,
    stack: Vec<String>,
    text: String,
    metadata: FeedMetadata,
    channel_updated: Option<DateTime<Utc>>,
    item: Option<ItemDraft>,
    items: Vec<FeedItem>,
}

const ITEM_ELEMENTS: [&str; 2] = ["item", "entry"];
const CHANNEL_ELEMENTS: [&str; 2] = ["channel", "feed"];
const MARKUP_CONTAINERS: [&str; 4] = ["description", "summary", "content", "encoded"];

fn set_once(slot: &mut Option<String>, value: String) {
    if slot.is_none() && !value.is_empty() {
        *slot = Some(value);
    }
}

fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == name)
        .map(|attr| unescape(&String::from_utf8_lossy(attr.value.as_ref())))
}

impl ParseState {
    fn parent(&self) -> Option<&str> {
        self.stack.last().map(String::as_str)
    }

    fn inside_markup(&self) -> bool {
        self.item.is_some()
            && self
                .stack
                .iter()
                .rev()
                .take_while(|name| !ITEM_ELEMENTS.contains(&name.as_str()))
                .any(|name| MARKUP_CONTAINERS.contains(&name.as_str()))
    }

    fn open(&mut self, e: &BytesStart<'_>) {
        let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
        if self.root.is_none() {
            self.root = Some(name.clone());
        }

        if self.inside_markup() {
            // Inline XHTML: keep accumulating so nested markup stays part of the body.
            self.stack.push(name);
            return;
        }

        self.text.clear();
        if ITEM_ELEMENTS.contains(&name.as_str()) {
            self.item = Some(ItemDraft::default());
        }

        if let Some(item) = self.item.as_mut() {
            match name.as_str() {
                "link" => {
                    let rel = attribute(e, b"rel");
                    if matches!(rel.as_deref(), None | Some("alternate")) {
                        if let Some(href) = attribute(e, b"href") {
                            set_once(&mut item.link, href.trim().to_string());
                        }
                    }
                }
                "category" => {
                    if let Some(term) = attribute(e, b"term") {
                        let term = term.trim().to_string();
                        if !term.is_empty() {
                            item.categories.push(term);
                        }
                    }
                }
                _ => {}
            }
        }

        self.stack.push(name);
    }

    fn close(&mut self) {
        let Some(name) = self.stack.pop() else {
            return;
        };

        if self.inside_markup() {
            return;
        }

        let text = self.text.trim().to_string();
        self.text.clear();
        let parent = self.parent().unwrap_or_default().to_string();

        if ITEM_ELEMENTS.contains(&name.as_str()) {
            if let Some(item) = self.item.take() {
                self.items.push(item.finish());
            }
            return;
        }

        if let Some(item) = self.item.as_mut() {
            let direct_child = ITEM_ELEMENTS.contains(&parent.as_str());
            match name.as_str() {
                "title" if direct_child => set_once(&mut item.title, text),
                "link" if direct_child => set_once(&mut item.link, text),
                "guid" | "id" if direct_child => set_once(&mut item.guid, text),
                "description" | "summary" => set_once(&mut item.summary, text),
                "encoded" | "content" => set_once(&mut item.content, text),
                "pubDate" | "published" | "date" | "issued" => {
                    if item.published.is_none() {
                        item.published = parse_date(&text);
                    }
                }
                "updated" | "modified" => {
                    if item.updated.is_none() {
                        item.updated = parse_date(&text);
                    }
                }
                "creator" => set_once(&mut item.author, text),
                "name" if parent == "author" => set_once(&mut item.author, text),
                "author" if direct_child => set_once(&mut item.author, text),
                "category" if !text.is_empty() => item.categories.push(text),
                _ => {}
            }
            return;
        }

        if CHANNEL_ELEMENTS.contains(&parent.as_str()) {
            match name.as_str() {
                "title" => set_once(&mut self.metadata.title, html_to_text(&text)),
                "description" | "subtitle" => {
                    set_once(&mut self.metadata.description, html_to_text(&text))
                }
                "lastBuildDate" => {
                    if self.metadata.last_build_date.is_none() {
                        self.metadata.last_build_date = parse_date(&text);
                    }
                }
                "updated" | "pubDate" => {
                    if self.channel_updated.is_none() {
                        self.channel_updated = parse_date(&text);
                    }
                }
                _ => {}
            }
        }
    }

    fn finish(mut self) -> Result<ParsedFeed, FetchError> {
        match self.root.as_deref() {
            Some("rss") | Some("feed") | Some("RDF") => {}
            Some(other) => {
                return Err(FetchError::Parse(format!(
                    "unsupported document root <{}>",
                    other
                )))
            }
            None => return Err(FetchError::Parse("empty document".to_string())),
        }

        if self.metadata.last_build_date.is_none() {
            self.metadata.last_build_date = self.channel_updated;
        }

        Ok(ParsedFeed {
            metadata: self.metadata,
            items: self.items,
        })
    }
}

pub fn parse_feed(xml: &str) -> Result<ParsedFeed, FetchError> {
    let mut reader = Reader::from_str(xml);
    let mut state = ParseState::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => state.open(&e),
            Ok(Event::Empty(e)) => {
                state.open(&e);
                state.close();
            }
            Ok(Event::End(_)) => state.close(),
            Ok(Event::Text(t)) => state.text.push_str(&unescape(&String::from_utf8_lossy(&t))),
            Ok(Event::CData(c)) => state.text.push_str(&String::from_utf8_lossy(&c)),
            Ok(Event::GeneralRef(r)) => state.text.push_str(&resolve_entity(&String::from_utf8_lossy(&r))),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(FetchError::Parse(format!(
                    "malformed XML at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    state.finish()
}

fn resolve_entity(name: &str) -> String {
    match name {
        "amp" => "&".to_string(),
        "lt" => "<".to_string(),
        "gt" => ">".to_string(),
        "quot" => "\"".to_string(),
        "apos" => "'".to_string(),
        "nbsp" => " ".to_string(),
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()
            } else {
                name.strip_prefix('#').and_then(|dec| dec.parse::<u32>().ok())
            };
            code.and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| format!("&{};", name))
        }
    }
}

/// Replaces character and predefined entity references.
pub fn unescape(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        match tail.find(';') {
            Some(end) if end > 0 && end <= 10 => {
                out.push_str(&resolve_entity(&tail[..end]));
                rest = &tail[end + 1..];
            }
            _ => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Strips tags and collapses whitespace, leaving readable text.
pub fn html_to_text(raw: &str) -> String {
    let without_tags = TAG_RE.replace_all(raw, " ");
    let decoded = unescape(&without_tags);
    SPACE_RE.replace_all(decoded.trim(), " ").into_owned()
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
