//! Renders the live map page.

use shinbot_core::VisitRecord;

const MAP_TEMPLATE: &str = include_str!("../assets/map.html");
const HISTORY_PLACEHOLDER: &str = "__HISTORY_JSON__";

/// The map page with `snapshot` embedded as its initial data.
pub fn render_map(snapshot: &[VisitRecord]) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(snapshot)?;
    Ok(MAP_TEMPLATE.replace(HISTORY_PLACEHOLDER, &escape_for_script(&json)))
}

/// JSON is valid JavaScript, but a `</script>` inside a string would end the
/// element early. `<` only ever appears inside JSON strings, where
/// `\u003c` decodes to the same character.
fn escape_for_script(json: &str) -> String {
    json.replace('<', "\\u003c")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

#[cfg(test)]
mod tests {
    use super::*;
    use shinbot_core::{Circle, CollectionOutcome};

    fn visit(seq: u64) -> VisitRecord {
        let mut record = VisitRecord::for_circle(&Circle {
            lat: 12.5,
            lon: -40.25,
            radius_km: 321.0,
        });
        record.seq = seq;
        record.resources.push(CollectionOutcome {
            lat: 12.0,
            lon: -40.0,
            amount: 7,
            owned: true,
        });
        record
    }

    #[test]
    fn embeds_the_snapshot() {
        let page = render_map(&[visit(0), visit(1)]).unwrap();
        assert!(!page.contains(HISTORY_PLACEHOLDER));
        assert!(page.contains(r#""radius_km":321.0"#));
        assert!(page.contains(r#""owned":true"#));
        assert!(page.contains("new WebSocket"));
    }

    #[test]
    fn empty_history_renders_an_empty_array() {
        let page = render_map(&[]).unwrap();
        assert!(page.contains("var visits = [];"));
    }

    #[test]
    fn script_terminators_are_escaped() {
        let escaped = escape_for_script(r#"{"name":"</script><script>alert(1)</script>"}"#);
        assert!(!escaped.contains("</script>"));
        let decoded: serde_json::Value = serde_json::from_str(&escaped).unwrap();
        assert_eq!(decoded["name"], "</script><script>alert(1)</script>");
    }
}
