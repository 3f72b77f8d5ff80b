//! In-page scripts used by the Chromium driver.
//!
//! Every selector is embedded as a JSON string literal, and every script
//! evaluates to a JSON value (never `undefined`).

use crate::models::SiteSelectors;

fn literal(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

pub(crate) fn scroll_by(step_px: u32) -> String {
    format!(
        "(() => {{ window.scrollBy(0, {step_px}); \
         return document.body ? document.body.scrollHeight : 0; }})()"
    )
}

pub(crate) fn count(selector: &str) -> String {
    format!(
        "document.querySelectorAll({}).length",
        literal(selector)
    )
}

pub(crate) fn attribute(selector: &str, name: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); \
         return el ? el.getAttribute({}) : null; }})()",
        literal(selector),
        literal(name)
    )
}

/// Click card `index`; evaluates to `{{found, summary}}`.
pub(crate) fn activate_card(selectors: &SiteSelectors, index: u32, read_summary: bool) -> String {
    format!(
        r#"(() => {{
    const cards = document.querySelectorAll({card});
    if (cards.length <= {index}) return {{ found: false, summary: null }};
    const card = cards[{index}];
    let summary = null;
    if ({read_summary}) {{
        const text = (sel) => {{
            const el = card.querySelector(sel);
            const value = el ? el.innerText.trim() : "";
            return value.length ? value : null;
        }};
        let banner = null;
        const image = card.querySelector({image});
        if (image) {{
            const bg = image.style.backgroundImage || "";
            const match = bg.match(/url\(["']?(.*?)["']?\)/);
            banner = match ? match[1] : null;
        }}
        summary = {{ banner_url: banner, event_title: text({name}), venue: text({venue}) }};
    }}
    card.scrollIntoView();
    card.click();
    return {{ found: true, summary: summary }};
}})()"#,
        card = literal(&selectors.card),
        image = literal(&selectors.card_image),
        name = literal(&selectors.card_name),
        venue = literal(&selectors.card_venue),
    )
}

pub(crate) fn go_back(return_button: &str) -> String {
    format!(
        "(() => {{ const button = document.querySelector({}); \
         if (button) {{ button.click(); return 'button'; }} \
         history.back(); return 'history'; }})()",
        literal(return_button)
    )
}
