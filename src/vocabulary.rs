//! Component Vocabulary for the Islet Compiler
//!
//! The tag vocabulary is closed and versioned: every tag a template may use
//! is listed here, with its category. Unknown tags are rejected at parse
//! time, never passed through.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Bumped whenever a tag is added or a category changes meaning. Recorded in
/// every compiled artifact; the runtime refuses artifacts from a newer
/// vocabulary than it was built against.
pub const VOCABULARY_VERSION: u32 = 2;

/// Category of a vocabulary tag. Categories drive island classification:
/// state, conditional, loop, event and action tags require hydration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagCategory {
    Display,
    Layout,
    Media,
    Form,
    State,
    Conditional,
    Loop,
    Event,
    Action,
}

impl TagCategory {
    /// Whether a tag of this category forces its subtree into an island.
    pub fn hydrates(&self) -> bool {
        matches!(
            self,
            TagCategory::State
                | TagCategory::Conditional
                | TagCategory::Loop
                | TagCategory::Event
                | TagCategory::Action
        )
    }
}

/// Entry in the vocabulary table.
#[derive(Debug, Clone, Copy)]
pub struct TagSpec {
    /// Canonical CamelCase tag name as written in templates.
    pub canonical: &'static str,
    pub category: TagCategory,
}

/// Event trigger kinds, one per event tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventTrigger {
    Click,
    Change,
    Submit,
    Mount,
    Interval,
    Hover,
    Key,
    Visible,
}

lazy_static! {
    /// The full tag table, keyed by lowercased tag name. The HTML parser
    /// lowercases tag names, so lookups normalize the same way; the canonical
    /// casing is restored from the table entry.
    static ref VOCABULARY: HashMap<&'static str, TagSpec> = {
        let mut m = HashMap::new();
        fn add(m: &mut HashMap<&'static str, TagSpec>, canonical: &'static str, category: TagCategory) {
            let key: &'static str = Box::leak(canonical.to_ascii_lowercase().into_boxed_str());
            m.insert(key, TagSpec { canonical, category });
        }

        // Display
        add(&mut m, "Text", TagCategory::Display);
        add(&mut m, "Heading", TagCategory::Display);
        add(&mut m, "Subheading", TagCategory::Display);
        add(&mut m, "Paragraph", TagCategory::Display);
        add(&mut m, "Quote", TagCategory::Display);
        add(&mut m, "Code", TagCategory::Display);
        add(&mut m, "CodeBlock", TagCategory::Display);
        add(&mut m, "Divider", TagCategory::Display);
        add(&mut m, "Spacer", TagCategory::Display);
        add(&mut m, "Badge", TagCategory::Display);
        add(&mut m, "Label", TagCategory::Display);
        add(&mut m, "Icon", TagCategory::Display);
        add(&mut m, "Avatar", TagCategory::Display);
        add(&mut m, "Timestamp", TagCategory::Display);
        add(&mut m, "Markdown", TagCategory::Display);
        add(&mut m, "Emoji", TagCategory::Display);
        add(&mut m, "Chip", TagCategory::Display);
        add(&mut m, "ProgressBar", TagCategory::Display);
        add(&mut m, "Meter", TagCategory::Display);
        add(&mut m, "Tooltip", TagCategory::Display);
        add(&mut m, "StatusDot", TagCategory::Display);
        add(&mut m, "Link", TagCategory::Display);
        add(&mut m, "NavLink", TagCategory::Display);
        add(&mut m, "Username", TagCategory::Display);
        add(&mut m, "VisitorCount", TagCategory::Display);
        add(&mut m, "GuestbookEntry", TagCategory::Display);
        add(&mut m, "ProfileField", TagCategory::Display);
        add(&mut m, "PostTitle", TagCategory::Display);
        add(&mut m, "PostBody", TagCategory::Display);
        add(&mut m, "RingBadge", TagCategory::Display);

        // Layout
        add(&mut m, "Page", TagCategory::Layout);
        add(&mut m, "Section", TagCategory::Layout);
        add(&mut m, "Row", TagCategory::Layout);
        add(&mut m, "Column", TagCategory::Layout);
        add(&mut m, "Grid", TagCategory::Layout);
        add(&mut m, "GridCell", TagCategory::Layout);
        add(&mut m, "Stack", TagCategory::Layout);
        add(&mut m, "Card", TagCategory::Layout);
        add(&mut m, "Panel", TagCategory::Layout);
        add(&mut m, "Sidebar", TagCategory::Layout);
        add(&mut m, "Header", TagCategory::Layout);
        add(&mut m, "Footer", TagCategory::Layout);
        add(&mut m, "Center", TagCategory::Layout);
        add(&mut m, "Box", TagCategory::Layout);
        add(&mut m, "Frame", TagCategory::Layout);
        add(&mut m, "Marquee", TagCategory::Layout);
        add(&mut m, "Table", TagCategory::Layout);
        add(&mut m, "TableRow", TagCategory::Layout);
        add(&mut m, "TableCell", TagCategory::Layout);
        add(&mut m, "List", TagCategory::Layout);
        add(&mut m, "ListItem", TagCategory::Layout);
        add(&mut m, "Details", TagCategory::Layout);
        add(&mut m, "Banner", TagCategory::Layout);
        add(&mut m, "Collage", TagCategory::Layout);

        // Media
        add(&mut m, "Image", TagCategory::Media);
        add(&mut m, "Gallery", TagCategory::Media);
        add(&mut m, "Audio", TagCategory::Media);
        add(&mut m, "Video", TagCategory::Media);
        add(&mut m, "Embed", TagCategory::Media);
        add(&mut m, "Sticker", TagCategory::Media);
        add(&mut m, "Gif", TagCategory::Media);
        add(&mut m, "BackgroundImage", TagCategory::Media);
        add(&mut m, "MusicPlayer", TagCategory::Media);
        add(&mut m, "PixelArt", TagCategory::Media);

        // Form
        add(&mut m, "Button", TagCategory::Form);
        add(&mut m, "TextInput", TagCategory::Form);
        add(&mut m, "TextArea", TagCategory::Form);
        add(&mut m, "Checkbox", TagCategory::Form);
        add(&mut m, "RadioGroup", TagCategory::Form);
        add(&mut m, "SelectBox", TagCategory::Form);
        add(&mut m, "OptionItem", TagCategory::Form);
        add(&mut m, "Slider", TagCategory::Form);
        add(&mut m, "Form", TagCategory::Form);
        add(&mut m, "SubmitButton", TagCategory::Form);

        // State
        add(&mut m, "Var", TagCategory::State);

        // Conditionals
        add(&mut m, "If", TagCategory::Conditional);
        add(&mut m, "ElseIf", TagCategory::Conditional);
        add(&mut m, "Else", TagCategory::Conditional);
        add(&mut m, "Switch", TagCategory::Conditional);
        add(&mut m, "Case", TagCategory::Conditional);
        add(&mut m, "Default", TagCategory::Conditional);

        // Loops
        add(&mut m, "ForEach", TagCategory::Loop);
        add(&mut m, "Repeat", TagCategory::Loop);
        add(&mut m, "Break", TagCategory::Loop);
        add(&mut m, "Continue", TagCategory::Loop);

        // Events
        add(&mut m, "OnClick", TagCategory::Event);
        add(&mut m, "OnChange", TagCategory::Event);
        add(&mut m, "OnSubmit", TagCategory::Event);
        add(&mut m, "OnMount", TagCategory::Event);
        add(&mut m, "OnInterval", TagCategory::Event);
        add(&mut m, "OnHover", TagCategory::Event);
        add(&mut m, "OnKey", TagCategory::Event);
        add(&mut m, "OnVisible", TagCategory::Event);

        // Actions
        add(&mut m, "Set", TagCategory::Action);
        add(&mut m, "Increment", TagCategory::Action);
        add(&mut m, "Decrement", TagCategory::Action);
        add(&mut m, "Toggle", TagCategory::Action);
        add(&mut m, "Push", TagCategory::Action);
        add(&mut m, "Pop", TagCategory::Action);
        add(&mut m, "RemoveAt", TagCategory::Action);
        add(&mut m, "Filter", TagCategory::Action);
        add(&mut m, "Clear", TagCategory::Action);
        add(&mut m, "Delay", TagCategory::Action);
        add(&mut m, "Sequence", TagCategory::Action);

        m
    };
}

/// Look up a tag by name, case-insensitively. Returns the table entry with
/// the canonical casing, or `None` for tags outside the vocabulary.
pub fn lookup(tag: &str) -> Option<&'static TagSpec> {
    VOCABULARY.get(tag.to_ascii_lowercase().as_str())
}

/// Map an event tag's canonical name to its trigger kind.
pub fn event_trigger(canonical: &str) -> Option<EventTrigger> {
    match canonical {
        "OnClick" => Some(EventTrigger::Click),
        "OnChange" => Some(EventTrigger::Change),
        "OnSubmit" => Some(EventTrigger::Submit),
        "OnMount" => Some(EventTrigger::Mount),
        "OnInterval" => Some(EventTrigger::Interval),
        "OnHover" => Some(EventTrigger::Hover),
        "OnKey" => Some(EventTrigger::Key),
        "OnVisible" => Some(EventTrigger::Visible),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let spec = lookup("foreach").expect("ForEach is in the vocabulary");
        assert_eq!(spec.canonical, "ForEach");
        assert_eq!(spec.category, TagCategory::Loop);

        let spec = lookup("FOREACH").unwrap();
        assert_eq!(spec.canonical, "ForEach");
    }

    #[test]
    fn test_unknown_tag() {
        assert!(lookup("div").is_none());
        assert!(lookup("Blink").is_none());
    }

    #[test]
    fn test_hydrating_categories() {
        assert!(lookup("Var").unwrap().category.hydrates());
        assert!(lookup("If").unwrap().category.hydrates());
        assert!(lookup("OnClick").unwrap().category.hydrates());
        assert!(!lookup("Card").unwrap().category.hydrates());
        assert!(!lookup("Image").unwrap().category.hydrates());
    }

    #[test]
    fn test_event_triggers_cover_event_tags() {
        for tag in [
            "OnClick", "OnChange", "OnSubmit", "OnMount", "OnInterval", "OnHover", "OnKey",
            "OnVisible",
        ] {
            assert!(event_trigger(tag).is_some(), "{tag} has no trigger");
        }
        assert!(event_trigger("Set").is_none());
    }
}
