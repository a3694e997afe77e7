//! Profile page parsing
//!
//! Extracts the character's name, member group, avatar and free-form
//! profile fields from a rendered profile page. The theme has two skins
//! (the scripted profile layout and the static fallback), so most values
//! are resolved through an ordered list of candidate selectors.

use crate::parse::{page_title, url_from_style, ParseError};
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;

/// Placeholder the forum software renders for unset fields
const NO_INFORMATION: &str = "No Information";

/// Candidate avatar locations, in priority order
const AVATAR_SELECTORS: &[&str] = &[
    ".hero-sq-top",
    ".pf-c",
    ".profile-gif",
    ".hero-rect",
    ".hero-portrait",
];

/// Hero image locations copied into the field map
const HERO_IMAGE_FIELDS: &[(&str, &str)] = &[
    (".hero-portrait", "portrait_image"),
    (".hero-sq-top", "square_image"),
    (".hero-sq-bot", "secondary_square_image"),
    (".hero-rect", "rectangle_gif"),
];

/// Member group id to display name, per the theme's group styling classes
const GROUP_NAMES: &[(&str, &str)] = &[
    ("4", "Admin"),
    ("5", "Reserved"),
    ("6", "Red"),
    ("7", "Orange"),
    ("8", "Yellow"),
    ("9", "Green"),
    ("10", "Blue"),
    ("11", "Purple"),
    ("12", "Corrupted"),
    ("13", "Pastel"),
    ("14", "Pink"),
    ("15", "Neutral"),
];

/// Profile data extracted from a member's profile page
#[derive(Debug, Clone)]
pub struct ParsedProfile {
    pub character_id: String,
    pub name: String,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    pub avatar_url: Option<String>,
    /// Free-form profile fields, keys lowercased
    pub fields: BTreeMap<String, String>,
}

/// Parses a profile page into a [`ParsedProfile`]
///
/// Fails only when no character name can be determined at all, which
/// indicates the page is not a profile (deleted account, error page).
pub fn parse_profile(html: &str, character_id: &str) -> Result<ParsedProfile, ParseError> {
    let document = Html::parse_document(html);

    let name = parse_name(&document).ok_or(ParseError::MissingElement("profile name"))?;
    let (group_id, group_name) = parse_group(&document);
    let avatar_url = avatar_from_document(&document);

    let mut fields = BTreeMap::new();
    collect_dossier_fields(&document, &mut fields);
    if fields.is_empty() {
        collect_labelled_fields(&document, &mut fields);
    }
    collect_codename(&document, &mut fields);
    collect_player(&document, &mut fields);
    collect_metadata_fields(&document, &mut fields);
    collect_hero_images(&document, &mut fields);
    collect_power_grid(&document, &mut fields);

    Ok(ParsedProfile {
        character_id: character_id.to_string(),
        name,
        group_id,
        group_name,
        avatar_url,
        fields,
    })
}

/// Extracts just the avatar URL from a profile page
///
/// Used when resolving last-poster avatars, where the rest of the profile
/// is not needed.
pub fn parse_avatar(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    if let Some(url) = avatar_from_document(&document) {
        return Some(url);
    }

    // Fallback: any element with an inline background image
    let selector = Selector::parse("[style*='background-image']").ok()?;
    document
        .select(&selector)
        .find_map(|el| el.value().attr("style").and_then(url_from_style))
}

fn avatar_from_document(document: &Html) -> Option<String> {
    for sel in AVATAR_SELECTORS {
        if let Ok(selector) = Selector::parse(sel) {
            if let Some(url) = document
                .select(&selector)
                .next()
                .and_then(|el| el.value().attr("style"))
                .and_then(url_from_style)
            {
                return Some(url);
            }
        }
    }
    None
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn select_first_text(document: &Html, selectors: &[&str]) -> Option<String> {
    for sel in selectors {
        if let Ok(selector) = Selector::parse(sel) {
            if let Some(el) = document.select(&selector).next() {
                let text = element_text(el);
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }
    }
    None
}

fn parse_name(document: &Html) -> Option<String> {
    if let Some(name) = select_first_text(document, &["h1.profile-name", "div.pf-e"]) {
        return Some(name);
    }

    // Fallback: page title reads "Viewing Profile -> Name"
    page_title(document).and_then(|title| {
        title
            .rsplit("->")
            .next()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && !title.contains("Board Message"))
    })
}

fn parse_group(document: &Html) -> (Option<String>, Option<String>) {
    // Primary: group-N class on the scripted profile wrapper
    if let Ok(selector) = Selector::parse(".profile-app") {
        if let Some(el) = document.select(&selector).next() {
            for class in el.value().classes() {
                if let Some(id) = class.strip_prefix("group-") {
                    let name = GROUP_NAMES
                        .iter()
                        .find(|(gid, _)| *gid == id)
                        .map(|(_, n)| n.to_string());
                    return (Some(id.to_string()), name);
                }
            }
        }
    }

    // Static skin carries the group label as text
    let name = select_first_text(document, &["div.pf-x div.mp-b"]);
    let id = name.as_deref().and_then(|n| {
        GROUP_NAMES
            .iter()
            .find(|(_, gname)| gname.eq_ignore_ascii_case(n))
            .map(|(gid, _)| gid.to_string())
    });
    (id, name)
}

fn insert_field(fields: &mut BTreeMap<String, String>, key: &str, value: &str) {
    let key = key.trim().to_lowercase();
    let value = value.trim();
    if !key.is_empty() && !value.is_empty() && value != NO_INFORMATION {
        fields.insert(key, value.to_string());
    }
}

/// dt/dd pairs of the dossier list
fn collect_dossier_fields(document: &Html, fields: &mut BTreeMap<String, String>) {
    let dossier = match Selector::parse("dl.profile-dossier").ok() {
        Some(s) => s,
        None => return,
    };
    let (dt_sel, dd_sel) = match (Selector::parse("dt").ok(), Selector::parse("dd").ok()) {
        (Some(dt), Some(dd)) => (dt, dd),
        _ => return,
    };

    for dl in document.select(&dossier) {
        let keys: Vec<String> = dl.select(&dt_sel).map(element_text).collect();
        let values: Vec<String> = dl.select(&dd_sel).map(element_text).collect();
        for (key, value) in keys.iter().zip(values.iter()) {
            insert_field(fields, key, value);
        }
    }
}

/// Static-skin labelled spans: value is the container text minus the label
fn collect_labelled_fields(document: &Html, fields: &mut BTreeMap<String, String>) {
    let (container, label) = match (
        Selector::parse("div.pf-k").ok(),
        Selector::parse("span.pf-l").ok(),
    ) {
        (Some(c), Some(l)) => (c, l),
        _ => return,
    };

    for el in document.select(&container) {
        if let Some(label_el) = el.select(&label).next() {
            let label_text = element_text(label_el);
            let full_text = element_text(el);
            let value = full_text.replacen(&label_text, "", 1);
            insert_field(fields, &label_text, &value);
        }
    }
}

fn collect_codename(document: &Html, fields: &mut BTreeMap<String, String>) {
    if let Some(codename) =
        select_first_text(document, &["h2.profile-codename", "div.pf-s span.pf-1"])
    {
        if !codename.eq_ignore_ascii_case("code name") {
            insert_field(fields, "codename", &codename);
        }
    }
}

/// "played by <b>name</b>" footer
fn collect_player(document: &Html, fields: &mut BTreeMap<String, String>) {
    if let Ok(selector) = Selector::parse("div.pf-z b") {
        if let Some(el) = document.select(&selector).next() {
            insert_field(fields, "player", &element_text(el));
        }
    }
}

/// Player metadata blocks: the title attribute names the field, the text
/// (minus the icon span) is the value
fn collect_metadata_fields(document: &Html, fields: &mut BTreeMap<String, String>) {
    let (container, icon) = match (
        Selector::parse("div.pf-ab").ok(),
        Selector::parse("span.pf-ac").ok(),
    ) {
        (Some(c), Some(i)) => (c, i),
        _ => return,
    };

    for el in document.select(&container) {
        let title = el.value().attr("title").unwrap_or("").trim().to_lowercase();
        if title.is_empty() {
            continue;
        }

        // Trigger warnings carry the whole value inside the title attribute
        if let Some(rest) = title.strip_prefix("please avoid:") {
            insert_field(fields, "triggers", rest.trim());
            continue;
        }

        let mut value = element_text(el);
        if let Some(icon_el) = el.select(&icon).next() {
            let icon_text = element_text(icon_el);
            value = value.replacen(&icon_text, "", 1);
        }
        insert_field(fields, &title, value.trim());
    }
}

fn collect_hero_images(document: &Html, fields: &mut BTreeMap<String, String>) {
    for (sel, key) in HERO_IMAGE_FIELDS {
        if let Ok(selector) = Selector::parse(sel) {
            if let Some(url) = document
                .select(&selector)
                .next()
                .and_then(|el| el.value().attr("style"))
                .and_then(url_from_style)
            {
                insert_field(fields, key, &url);
            }
        }
    }
}

/// Power-grid stats, stored as "power grid - <stat>" fields on a 1-7 scale
///
/// The scripted skin writes the numeric value into data-value on the fill
/// bar. When scripts did not run only the width percentage is present, so
/// the bar width is scaled back onto the integer scale.
fn collect_power_grid(document: &Html, fields: &mut BTreeMap<String, String>) {
    let (stat, label, fill) = match (
        Selector::parse("div.profile-stat").ok(),
        Selector::parse(".profile-stat-label").ok(),
        Selector::parse(".profile-stat-fill").ok(),
    ) {
        (Some(s), Some(l), Some(f)) => (s, l, f),
        _ => return,
    };

    for el in document.select(&stat) {
        let label_el = match el.select(&label).next() {
            Some(l) => l,
            None => continue,
        };
        let fill_el = match el.select(&fill).next() {
            Some(f) => f,
            None => continue,
        };

        let stat_name = element_text(label_el).to_lowercase();
        if stat_name.is_empty() {
            continue;
        }

        let value = fill_el
            .value()
            .attr("data-value")
            .map(str::trim)
            .filter(|v| !v.is_empty() && *v != NO_INFORMATION)
            .map(str::to_string)
            .or_else(|| {
                fill_el
                    .value()
                    .attr("style")
                    .and_then(width_percentage)
                    .map(|pct| scale_to_grid(pct).to_string())
            });

        if let Some(value) = value {
            insert_field(fields, &format!("power grid - {}", stat_name), &value);
        }
    }
}

/// Extracts the percentage from a `width: NN%` style value
fn width_percentage(style: &str) -> Option<f64> {
    let idx = style.find("width")?;
    let rest = &style[idx..];
    let colon = rest.find(':')?;
    let after = rest[colon + 1..].trim_start();
    let end = after.find('%')?;
    after[..end].trim().parse().ok()
}

/// Maps a 0-100 bar width onto the 1-7 stat scale
fn scale_to_grid(pct: f64) -> u8 {
    let scaled = (pct / 100.0 * 7.0).round();
    scaled.clamp(1.0, 7.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE_HTML: &str = r#"<html>
    <head><title>RP Forum -> Viewing Profile -> Scarlet Vane</title></head>
    <body>
      <div class="profile-app group-10">
        <h1 class="profile-name">Scarlet Vane</h1>
        <h2 class="profile-codename">Ember</h2>
        <div class="hero-sq-top" style="background-image: url('https://img.example.com/scarlet-sq.png')"></div>
        <div class="hero-portrait" style="background-image: url('https://img.example.com/scarlet-tall.png')"></div>
        <dl class="profile-dossier">
          <dt>Age</dt><dd>27</dd>
          <dt>Occupation</dt><dd>Courier</dd>
          <dt>Hometown</dt><dd>No Information</dd>
        </dl>
        <div class="pf-z">played by <b>Ash</b></div>
        <div class="profile-stat">
          <span class="profile-stat-label">INT</span>
          <span class="profile-stat-fill" data-value="5"></span>
        </div>
        <div class="profile-stat">
          <span class="profile-stat-label">STR</span>
          <span class="profile-stat-fill" style="width: 42.9%"></span>
        </div>
      </div>
    </body></html>"#;

    #[test]
    fn test_parse_profile_basic_fields() {
        let profile = parse_profile(PROFILE_HTML, "42").unwrap();

        assert_eq!(profile.character_id, "42");
        assert_eq!(profile.name, "Scarlet Vane");
        assert_eq!(profile.group_id.as_deref(), Some("10"));
        assert_eq!(profile.group_name.as_deref(), Some("Blue"));
        assert_eq!(
            profile.avatar_url.as_deref(),
            Some("https://img.example.com/scarlet-sq.png")
        );
        assert_eq!(profile.fields.get("age").map(String::as_str), Some("27"));
        assert_eq!(
            profile.fields.get("occupation").map(String::as_str),
            Some("Courier")
        );
        assert_eq!(profile.fields.get("player").map(String::as_str), Some("Ash"));
        assert_eq!(
            profile.fields.get("codename").map(String::as_str),
            Some("Ember")
        );
    }

    #[test]
    fn test_no_information_fields_dropped() {
        let profile = parse_profile(PROFILE_HTML, "42").unwrap();
        assert!(!profile.fields.contains_key("hometown"));
    }

    #[test]
    fn test_power_grid_primary_and_fallback() {
        let profile = parse_profile(PROFILE_HTML, "42").unwrap();
        // Primary: data-value used directly
        assert_eq!(
            profile.fields.get("power grid - int").map(String::as_str),
            Some("5")
        );
        // Fallback: 42.9% of the bar scales to 3 on the 1-7 scale
        assert_eq!(
            profile.fields.get("power grid - str").map(String::as_str),
            Some("3")
        );
    }

    #[test]
    fn test_name_from_title_fallback() {
        let html = r#"<html><head><title>RP Forum -> Viewing Profile -> Mirage</title></head>
            <body><div class="profile-app"></div></body></html>"#;
        let profile = parse_profile(html, "7").unwrap();
        assert_eq!(profile.name, "Mirage");
    }

    #[test]
    fn test_missing_name_is_parse_error() {
        let html = "<html><head></head><body><p>nothing here</p></body></html>";
        assert!(parse_profile(html, "7").is_err());
    }

    #[test]
    fn test_parse_avatar_priority_order() {
        let html = r#"<html><body>
            <div class="hero-rect" style="background-image: url('https://img.example.com/rect.gif')"></div>
            <div class="hero-sq-top" style="background-image: url('https://img.example.com/sq.png')"></div>
        </body></html>"#;
        // hero-sq-top outranks hero-rect regardless of document order
        assert_eq!(
            parse_avatar(html).as_deref(),
            Some("https://img.example.com/sq.png")
        );
    }

    #[test]
    fn test_parse_avatar_generic_fallback() {
        let html = r#"<html><body>
            <div class="banner" style="background-image: url('https://img.example.com/banner.png')"></div>
        </body></html>"#;
        assert_eq!(
            parse_avatar(html).as_deref(),
            Some("https://img.example.com/banner.png")
        );
    }

    #[test]
    fn test_scale_to_grid_bounds() {
        assert_eq!(scale_to_grid(0.0), 1);
        assert_eq!(scale_to_grid(100.0), 7);
        assert_eq!(scale_to_grid(57.1), 4);
    }

    #[test]
    fn test_labelled_field_fallback_skin() {
        let html = r#"<html><body>
            <div class="pf-e">Static Name</div>
            <div class="pf-k"><span class="pf-l">Alias</span>Shadow</div>
        </body></html>"#;
        let profile = parse_profile(html, "9").unwrap();
        assert_eq!(profile.name, "Static Name");
        assert_eq!(profile.fields.get("alias").map(String::as_str), Some("Shadow"));
    }
}
