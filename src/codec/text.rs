//! Flat text payload
//!
//! Renders the tags of a result as `name: {encoded}` entries joined by commas.

use crate::model::Tag;

/// Render tags as `"A: {..},B: {..}"`
pub fn render_tags(tags: &[Tag]) -> String {
    let mut out = String::new();
    for tag in tags {
        out.push_str(&tag.name);
        out.push_str(": {");
        out.push_str(tag.encoded());
        out.push_str("},");
    }
    // Drop the trailing separator
    out.pop();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ValueKind;

    #[test]
    fn test_render_tags() {
        let tags = vec![
            Tag::from_encoded("T1", false, ValueKind::Decimal, "t1:1.00000000"),
            Tag::from_encoded("P1", true, ValueKind::Integer, "t1:OPEN,t2:CLOSED"),
        ];

        assert_eq!(
            render_tags(&tags),
            "T1: {t1:1.00000000},P1: {t1:OPEN,t2:CLOSED}"
        );
    }

    #[test]
    fn test_render_no_tags() {
        assert_eq!(render_tags(&[]), "");
    }
}
