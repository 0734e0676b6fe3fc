use crate::config::SelectorConfig;
use crate::error::{Result, ScrapeError};
use crate::models::{PageInfo, ProfileRecord, RawProfile, RosterEntry, RosterPage};
use crate::scraper::cleaner::{join_fragments, non_empty, split_info_line};
use crate::scraper::http_client::PhotoDownloader;
use scraper::{ElementRef, Html, Selector};
use std::path::Path;
use tracing::{debug, info};
use url::Url;

// ── Selectors ─────────────────────────────────────────────────────────────────

/// Compiled form of [`SelectorConfig`].
#[derive(Debug)]
pub struct Selectors {
    role_heading: Selector,
    person_block: Selector,
    segment: Selector,
    name: Selector,
    body: Selector,
    image: Selector,
    info_line: Selector,
    info_delimiter: char,
}

fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| ScrapeError::Selector {
        selector: selector.to_string(),
        reason: format!("{:?}", e),
    })
}

impl Selectors {
    pub fn compile(config: &SelectorConfig) -> Result<Self> {
        Ok(Self {
            role_heading: compile(&config.role_heading)?,
            person_block: compile(&config.person_block)?,
            segment: compile(&format!("{}, {}", config.role_heading, config.person_block))?,
            name: compile(&config.name)?,
            body: compile(&config.body)?,
            image: compile(&config.image)?,
            info_line: compile(&config.info_line)?,
            info_delimiter: config.info_delimiter,
        })
    }
}

// ── Page info ─────────────────────────────────────────────────────────────────

pub fn parse_page_info(doc: &Html, sel: &Selectors) -> PageInfo {
    match doc.select(&sel.info_line).next() {
        Some(el) => split_info_line(&el.text().collect::<String>(), sel.info_delimiter),
        None => {
            debug!("No info line on page");
            PageInfo::default()
        }
    }
}

// ── Segmentation ──────────────────────────────────────────────────────────────

/// Document-order view of a roster page: only the nodes that matter.
#[derive(Debug, Clone, PartialEq)]
pub enum RosterNode {
    Heading(String),
    Person(RawProfile),
}

/// Flatten the document into headings and person blocks, in document order.
/// Anything nested inside a person block belongs to that block.
pub fn flatten(doc: &Html, base_url: &Url, sel: &Selectors) -> Vec<RosterNode> {
    doc.select(&sel.segment)
        .filter(|el| !inside_person_block(el, sel))
        .filter_map(|el| {
            if sel.person_block.matches(&el) {
                Some(RosterNode::Person(parse_profile_block(el, base_url, sel)))
            } else if sel.role_heading.matches(&el) {
                non_empty(&el.text().collect::<String>()).map(RosterNode::Heading)
            } else {
                None
            }
        })
        .collect()
}

fn inside_person_block(el: &ElementRef, sel: &Selectors) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| sel.person_block.matches(&ancestor))
}

/// Left-to-right fold carrying the current role. Blocks seen before the
/// first heading have no role and are dropped.
pub fn assign_roles(nodes: impl IntoIterator<Item = RosterNode>) -> Vec<RosterEntry> {
    let mut role: Option<String> = None;
    let mut entries = Vec::new();
    let mut orphans = 0usize;

    for node in nodes {
        match node {
            RosterNode::Heading(label) => role = Some(label),
            RosterNode::Person(profile) => match &role {
                Some(role) => entries.push(RosterEntry {
                    role: role.clone(),
                    profile,
                }),
                None => orphans += 1,
            },
        }
    }

    if orphans > 0 {
        debug!("Dropped {} person blocks found before any role heading", orphans);
    }
    entries
}

// ── Person blocks ─────────────────────────────────────────────────────────────

pub fn parse_profile_block(block: ElementRef, base_url: &Url, sel: &Selectors) -> RawProfile {
    let name = block
        .select(&sel.name)
        .next()
        .and_then(|el| non_empty(&el.text().collect::<String>()));

    let bio = block.select(&sel.body).next().map(body_text).unwrap_or_default();

    let photo_url = block
        .select(&sel.image)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(str::trim)
        .filter(|src| !src.is_empty())
        .and_then(|src| match base_url.join(src) {
            Ok(url) => Some(url),
            Err(e) => {
                debug!("Unresolvable image src {:?}: {}", src, e);
                None
            }
        });

    RawProfile { name, bio, photo_url }
}

fn is_heading(tag: &str) -> bool {
    matches!(tag, "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
}

/// Body text with every nested h1–h6 left out, so a repeated name does not
/// end up in the biography.
fn body_text(body: ElementRef) -> String {
    let body_id = (*body).id();
    let fragments = body.descendants().filter_map(|node| {
        let text = node.value().as_text()?;
        let under_heading = node
            .ancestors()
            .take_while(|a| a.id() != body_id)
            .filter_map(|a| a.value().as_element())
            .any(|e| is_heading(e.name()));
        if under_heading { None } else { Some(&**text) }
    });
    join_fragments(fragments)
}

// ── Whole page ────────────────────────────────────────────────────────────────

/// Structural pass over one roster page. Pure: no I/O.
pub fn parse_roster(html: &str, base_url: &Url, sel: &Selectors) -> RosterPage {
    let doc = Html::parse_document(html);
    let info = parse_page_info(&doc, sel);
    let entries = assign_roles(flatten(&doc, base_url, sel));
    RosterPage { info, entries }
}

/// Turns rendered roster HTML into records, fetching photos on request.
pub struct ProfileExtractor<'a> {
    selectors: &'a Selectors,
    downloader: &'a PhotoDownloader,
}

impl<'a> ProfileExtractor<'a> {
    pub fn new(selectors: &'a Selectors, downloader: &'a PhotoDownloader) -> Self {
        Self { selectors, downloader }
    }

    pub async fn extract(
        &self,
        html: &str,
        base_url: &Url,
        download_photos: bool,
        photo_dir: &Path,
    ) -> Vec<ProfileRecord> {
        let RosterPage { info, entries } = parse_roster(html, base_url, self.selectors);
        info!(
            "{}: {} profiles (date={:?}, location={:?})",
            base_url,
            entries.len(),
            info.date,
            info.location
        );

        let mut records = Vec::with_capacity(entries.len());
        for RosterEntry { role, profile } in entries {
            let photo_path = match (&profile.photo_url, &profile.name) {
                (Some(url), Some(name)) if download_photos => {
                    self.downloader.download(url, photo_dir, name).await
                }
                _ => None,
            };

            records.push(ProfileRecord {
                name: profile.name,
                bio: profile.bio,
                photo_path,
                role,
                date: info.date.clone(),
                location: info.location.clone(),
            });
        }
        records
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
