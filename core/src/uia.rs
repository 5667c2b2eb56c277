//! Accessibility-tree search and serialization.
//!
//! Search is fuzzy and multi-property: a query is scored against name,
//! automation id, help text, and class name, with per-property
//! acceptance thresholds. This is how the engine "sees" a window
//! without pixels.

use serde::Serialize;
use serde_json::Value as JsonValue;
use serde_json::json;

use crate::error::Result;
use crate::error::ToolError;
use crate::platform::Bounds;
use crate::platform::Desktop;
use crate::platform::ElementId;
use crate::platform::WindowInfo;

const NAME_THRESHOLD: f64 = 0.70;
const SECONDARY_THRESHOLD: f64 = 0.60;

/// Queries shorter than this skip edit-distance scoring; a one- or
/// two-character query only matches exactly, by word, or by prefix.
const MIN_FUZZY_QUERY_LEN: usize = 3;

const MAX_WINDOW_SUGGESTIONS: usize = 15;

#[derive(Debug, Clone, Serialize)]
pub struct ElementMatch {
    #[serde(skip)]
    pub element: ElementId,
    pub property_matched: String,
    pub score: f64,
    pub name: String,
    pub automation_id: String,
    pub control_type: String,
    pub bbox: Option<Bounds>,
}

/// Wagner-Fischer edit distance, O(m*n) time, O(min(m,n)) space.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (a, b) = if a.len() < b.len() { (b, a) } else { (a, b) };
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut curr = vec![i + 1];
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr.push(substitution.min(prev[j + 1] + 1).min(curr[j] + 1));
        }
        prev = curr;
    }
    prev[b.len()]
}

/// Normalized similarity in [0, 1]; 1.0 means identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(a, b) as f64 / max_len as f64)
}

/// Find a top-level window by title fragment, or fall back to the
/// foreground window. The not-found error lists available titles so the
/// caller can correct itself.
pub fn resolve_window(desktop: &dyn Desktop, title: Option<&str>) -> Result<WindowInfo> {
    match title {
        Some(fragment) => match desktop.find_window(fragment)? {
            Some(info) => Ok(info),
            None => {
                let available: Vec<String> = desktop
                    .list_windows()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|w| w.title)
                    .filter(|t| !t.trim().is_empty())
                    .take(MAX_WINDOW_SUGGESTIONS)
                    .collect();
                Err(
                    ToolError::invalid(format!("Window '{fragment}' not found")).with_hint(
                        format!("Available windows: {}", available.join(", ")),
                    ),
                )
            }
        },
        None => desktop
            .foreground_window()
            .ok_or_else(|| ToolError::external("no active window")),
    }
}

fn score_property(query: &str, value: &str, threshold: f64) -> Option<f64> {
    if value.is_empty() {
        return None;
    }
    let value = value.to_lowercase();
    if value == query {
        return Some(1.0);
    }
    let padded = format!(" {value} ");
    if padded.contains(&format!(" {query} ")) {
        return Some(0.95);
    }
    if value.starts_with(query) {
        return Some(0.90);
    }
    if query.chars().count() < MIN_FUZZY_QUERY_LEN {
        return None;
    }
    let score = similarity(query, &value);
    (score >= threshold).then_some(score)
}

/// Multi-property fuzzy search below `root`. Exact matches stop the
/// traversal early; otherwise the top `max_results` candidates are
/// returned ranked by score.
pub fn find_elements(
    desktop: &dyn Desktop,
    root: ElementId,
    query: &str,
    control_type: Option<&str>,
    max_depth: u32,
    max_results: usize,
) -> Vec<ElementMatch> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return Vec::new();
    }
    let ct_filter = control_type.map(str::to_lowercase);
    let mut candidates = Vec::new();
    walk(
        desktop,
        root,
        &query,
        ct_filter.as_deref(),
        max_depth,
        0,
        &mut candidates,
    );
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    candidates.truncate(max_results);
    candidates
}

fn walk(
    desktop: &dyn Desktop,
    element: ElementId,
    query: &str,
    ct_filter: Option<&str>,
    max_depth: u32,
    depth: u32,
    candidates: &mut Vec<ElementMatch>,
) -> bool {
    if depth > max_depth {
        return false;
    }
    let Ok(props) = desktop.element_props(element) else {
        return false;
    };

    // The control-type filter suppresses this element but children are
    // still traversed.
    let type_ok = ct_filter
        .map(|ct| props.control_type.to_lowercase() == ct)
        .unwrap_or(true);
    if type_ok {
        let scored = [
            ("name", props.name.as_str(), NAME_THRESHOLD),
            ("automation_id", props.automation_id.as_str(), SECONDARY_THRESHOLD),
            ("help_text", props.help_text.as_str(), SECONDARY_THRESHOLD),
            ("class_name", props.class_name.as_str(), SECONDARY_THRESHOLD),
        ]
        .into_iter()
        .filter_map(|(prop, value, threshold)| {
            score_property(query, value, threshold).map(|score| (prop, score))
        })
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        if let Some((prop, score)) = scored {
            let exact = score >= 1.0;
            candidates.push(ElementMatch {
                element,
                property_matched: prop.to_string(),
                score: (score * 1000.0).round() / 1000.0,
                name: props.name.clone(),
                automation_id: props.automation_id.clone(),
                control_type: props.control_type.clone(),
                bbox: props.bounds,
            });
            if exact {
                return true;
            }
        }
    }

    if let Ok(children) = desktop.children(element) {
        for child in children {
            if walk(desktop, child, query, ct_filter, max_depth, depth + 1, candidates) {
                return true;
            }
        }
    }
    false
}

/// First Document/Edit element below `root`, the "main editable area"
/// heuristic used when typing into a window without naming an element.
pub fn find_editable_element(
    desktop: &dyn Desktop,
    root: ElementId,
    max_depth: u32,
) -> Option<ElementId> {
    find_by(desktop, root, max_depth, 0, &|props| {
        matches!(props.control_type.as_str(), "Document" | "Edit")
    })
}

/// First element with the given automation id.
pub fn find_by_automation_id(
    desktop: &dyn Desktop,
    root: ElementId,
    automation_id: &str,
    max_depth: u32,
) -> Option<ElementId> {
    find_by(desktop, root, max_depth, 0, &|props| {
        props.automation_id == automation_id
    })
}

fn find_by(
    desktop: &dyn Desktop,
    element: ElementId,
    max_depth: u32,
    depth: u32,
    predicate: &dyn Fn(&crate::platform::ElementProps) -> bool,
) -> Option<ElementId> {
    if depth > max_depth {
        return None;
    }
    let props = desktop.element_props(element).ok()?;
    if predicate(&props) {
        return Some(element);
    }
    for child in desktop.children(element).ok()? {
        if let Some(found) = find_by(desktop, child, max_depth, depth + 1, predicate) {
            return Some(found);
        }
    }
    None
}

/// Serialize the subtree under `element` for `get_ui_tree`. Invisible
/// nodes are pruned unless requested; each node carries its properties,
/// readable value, and pattern capabilities.
pub fn build_tree(
    desktop: &dyn Desktop,
    element: ElementId,
    max_depth: u32,
    include_invisible: bool,
    depth: u32,
) -> Option<JsonValue> {
    if depth > max_depth {
        return Some(json!({"truncated": true, "reason": format!("max_depth={max_depth} reached")}));
    }
    let props = desktop.element_props(element).ok()?;
    if !include_invisible && !props.is_visible {
        return None;
    }

    let mut node = json!({
        "name": props.name,
        "control_type": props.control_type,
        "automation_id": props.automation_id,
        "class_name": props.class_name,
        "is_enabled": props.is_enabled,
        "is_visible": props.is_visible,
    });
    if let Some(value) = props.value {
        if !value.is_empty() {
            node["value"] = json!(value);
        }
    }
    if !props.patterns.is_empty() {
        node["patterns"] = json!(props.patterns);
    }

    if depth < max_depth {
        let children: Vec<JsonValue> = desktop
            .children(element)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|c| build_tree(desktop, c, max_depth, include_invisible, depth + 1))
            .collect();
        if !children.is_empty() {
            node["children"] = json!(children);
        }
    }
    Some(node)
}

pub fn count_elements(tree: &JsonValue) -> usize {
    let mut count = 1;
    if let Some(children) = tree.get("children").and_then(JsonValue::as_array) {
        for child in children {
            count += count_elements(child);
        }
    }
    count
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::platform::ElementProps;
    use crate::platform::sim::SimDesktop;
    use pretty_assertions::assert_eq;

    fn props(name: &str, control_type: &str) -> ElementProps {
        ElementProps {
            name: name.to_string(),
            control_type: control_type.to_string(),
            is_enabled: true,
            is_visible: true,
            ..Default::default()
        }
    }

    fn window_bounds() -> crate::platform::Bounds {
        crate::platform::Bounds {
            x: 0,
            y: 0,
            width: 640,
            height: 480,
        }
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn exact_match_wins_and_stops_early() {
        let sim = SimDesktop::new();
        let win = sim.add_window("App", window_bounds(), 1);
        sim.add_element(win, None, props("Save As...", "Button"));
        sim.add_element(win, None, props("Save", "Button"));
        sim.add_element(win, None, props("Never Visited", "Button"));

        let root = sim.root_element(win).unwrap();
        let matches = find_elements(&sim, root, "Save", None, 5, 5);
        assert_eq!(matches[0].score, 1.0);
        assert_eq!(matches[0].name, "Save");
        assert_eq!(matches[0].property_matched, "name");
    }

    #[test]
    fn prefix_and_word_matches_rank_below_exact() {
        let sim = SimDesktop::new();
        let win = sim.add_window("App", window_bounds(), 1);
        sim.add_element(win, None, props("Savepoint", "Button"));
        sim.add_element(win, None, props("Auto Save Mode", "Button"));

        let root = sim.root_element(win).unwrap();
        let matches = find_elements(&sim, root, "save", None, 5, 5);
        assert_eq!(matches.len(), 2);
        // Whole-word containment (0.95) outranks prefix (0.90).
        assert_eq!(matches[0].name, "Auto Save Mode");
        assert_eq!(matches[0].score, 0.95);
        assert_eq!(matches[1].name, "Savepoint");
        assert_eq!(matches[1].score, 0.9);
    }

    #[test]
    fn fuzzy_match_respects_name_threshold() {
        let sim = SimDesktop::new();
        let win = sim.add_window("App", window_bounds(), 1);
        sim.add_element(win, None, props("Sign In", "Button"));
        sim.add_element(win, None, props("Completely Different", "Button"));

        let root = sim.root_element(win).unwrap();
        let matches = find_elements(&sim, root, "sign in", None, 5, 5);
        assert_eq!(matches.len(), 1);

        let matches = find_elements(&sim, root, "sing in", None, 5, 5);
        assert_eq!(matches.len(), 1, "one transposition stays above 0.70");
        assert!(matches[0].score >= 0.70 && matches[0].score < 0.90);
    }

    #[test]
    fn short_queries_never_use_edit_distance() {
        let sim = SimDesktop::new();
        let win = sim.add_window("App", window_bounds(), 1);
        sim.add_element(win, None, props("ab", "Button"));
        sim.add_element(win, None, props("xz", "Button"));

        let root = sim.root_element(win).unwrap();
        // "ay" is within distance 1 of both, but short queries only
        // match exactly / by word / by prefix.
        let matches = find_elements(&sim, root, "ay", None, 5, 5);
        assert!(matches.is_empty());
        let matches = find_elements(&sim, root, "ab", None, 5, 5);
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn control_type_filter_suppresses_but_still_descends() {
        let sim = SimDesktop::new();
        let win = sim.add_window("App", window_bounds(), 1);
        let group = sim.add_element(win, None, props("Save Group", "Group"));
        sim.add_element(win, Some(group), props("Save", "Button"));

        let root = sim.root_element(win).unwrap();
        let matches = find_elements(&sim, root, "save", Some("Button"), 5, 5);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].control_type, "Button");
    }

    #[test]
    fn tree_prunes_invisible_nodes() {
        let sim = SimDesktop::new();
        let win = sim.add_window("App", window_bounds(), 1);
        sim.add_element(win, None, props("Shown", "Button"));
        let mut hidden = props("Hidden", "Button");
        hidden.is_visible = false;
        sim.add_element(win, None, hidden);

        let root = sim.root_element(win).unwrap();
        let tree = build_tree(&sim, root, 3, false, 0).unwrap();
        assert_eq!(count_elements(&tree), 2);
        let tree_all = build_tree(&sim, root, 3, true, 0).unwrap();
        assert_eq!(count_elements(&tree_all), 3);
    }
}
