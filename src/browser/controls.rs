//! Control snapshots: the per-round inventory of interactive elements.
//!
//! Each round the page is re-scanned; every visible control gets an opaque
//! `ControlId` scoped to that round and is tagged in the DOM with a marker
//! attribute, so later actions address the exact element that was shown to
//! the planner. The planner sees `"<kind>:<index>"` labels; the inventory
//! maps labels back to ids with a lookup, never by parsing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// DOM attribute used to tag collected controls.
pub const CONTROL_MARKER_ATTR: &str = "data-unsub-control";

/// Kind of interactive element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlKind {
    Button,
    Link,
    RoleButton,
    Clickable,
    Input,
    Textarea,
    Select,
    Checkbox,
    Radio,
}

impl ControlKind {
    pub const ALL: [ControlKind; 9] = [
        Self::Button,
        Self::Link,
        Self::RoleButton,
        Self::Clickable,
        Self::Input,
        Self::Textarea,
        Self::Select,
        Self::Checkbox,
        Self::Radio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Button => "button",
            Self::Link => "link",
            Self::RoleButton => "roleButton",
            Self::Clickable => "clickable",
            Self::Input => "input",
            Self::Textarea => "textarea",
            Self::Select => "select",
            Self::Checkbox => "checkbox",
            Self::Radio => "radio",
        }
    }

    /// CSS selector that enumerates this kind.
    pub fn selector(&self) -> &'static str {
        match self {
            Self::Button => "button, input[type=submit], input[type=button], input[type=image]",
            Self::Link => "a[href]",
            Self::RoleButton => "[role=button]:not(button)",
            Self::Clickable => "div[onclick], span[onclick]",
            Self::Input => {
                "input:not([type=hidden]):not([type=submit]):not([type=button]):not([type=image]):not([type=checkbox]):not([type=radio])"
            }
            Self::Textarea => "textarea",
            Self::Select => "select",
            Self::Checkbox => "input[type=checkbox]",
            Self::Radio => "input[type=radio]",
        }
    }

    /// Whether a fill action makes sense on this kind.
    pub fn accepts_text(&self) -> bool {
        matches!(self, Self::Input | Self::Textarea)
    }

    pub fn is_toggle(&self) -> bool {
        matches!(self, Self::Checkbox | Self::Radio)
    }
}

impl std::fmt::Display for ControlKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-kind caps on how many controls are collected.
#[derive(Debug, Clone)]
pub struct ControlCaps {
    caps: HashMap<ControlKind, usize>,
}

impl ControlCaps {
    pub fn get(&self, kind: ControlKind) -> usize {
        self.caps.get(&kind).copied().unwrap_or(0)
    }

    pub fn with(mut self, kind: ControlKind, cap: usize) -> Self {
        self.caps.insert(kind, cap);
        self
    }
}

impl Default for ControlCaps {
    fn default() -> Self {
        let caps = HashMap::from([
            (ControlKind::Button, 40),
            (ControlKind::Link, 40),
            (ControlKind::RoleButton, 20),
            (ControlKind::Clickable, 20),
            (ControlKind::Input, 20),
            (ControlKind::Textarea, 10),
            (ControlKind::Select, 10),
            (ControlKind::Checkbox, 20),
            (ControlKind::Radio, 20),
        ]);
        Self { caps }
    }
}

/// Opaque, round-scoped handle to a collected control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlId {
    round: u32,
    ordinal: u32,
}

impl ControlId {
    pub fn new(round: u32, ordinal: u32) -> Self {
        Self { round, ordinal }
    }

    /// Marker value written to the DOM for this control.
    pub fn marker(&self) -> String {
        format!("r{}-{}", self.round, self.ordinal)
    }

    /// CSS selector that matches exactly this control.
    pub fn selector(&self) -> String {
        format!("[{}=\"{}\"]", CONTROL_MARKER_ATTR, self.marker())
    }
}

/// A control as reported by the page scan, before ids are assigned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawControl {
    pub kind: Option<ControlKind>,
    /// Position within its kind (0-based).
    pub index: u32,
    /// Position across all kinds; pairs with the round to form the DOM marker.
    pub ordinal: u32,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, rename = "type")]
    pub input_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub checked: Option<bool>,
    #[serde(default)]
    pub options: Vec<String>,
}

/// Point-in-time description of one interactive element.
#[derive(Debug, Clone)]
pub struct ControlSnapshot {
    pub id: ControlId,
    pub kind: ControlKind,
    pub index: u32,
    pub text: Option<String>,
    pub input_type: Option<String>,
    pub name: Option<String>,
    pub placeholder: Option<String>,
    pub checked: Option<bool>,
    pub options: Vec<String>,
}

impl ControlSnapshot {
    /// Label presented to the planner.
    pub fn label(&self) -> String {
        format!("{}:{}", self.kind, self.index)
    }

    /// Compact JSON description for the planning prompt.
    pub fn to_prompt_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("id".into(), self.label().into());
        obj.insert("kind".into(), self.kind.as_str().into());
        if let Some(text) = &self.text {
            obj.insert("text".into(), text.clone().into());
        }
        if let Some(t) = &self.input_type {
            obj.insert("type".into(), t.clone().into());
        }
        if let Some(n) = &self.name {
            obj.insert("name".into(), n.clone().into());
        }
        if let Some(p) = &self.placeholder {
            obj.insert("placeholder".into(), p.clone().into());
        }
        if let Some(c) = self.checked {
            obj.insert("checked".into(), c.into());
        }
        if !self.options.is_empty() {
            obj.insert("options".into(), self.options.clone().into());
        }
        serde_json::Value::Object(obj)
    }
}

/// Arena of controls collected in one round.
#[derive(Debug, Clone, Default)]
pub struct ControlInventory {
    controls: Vec<ControlSnapshot>,
    by_label: HashMap<String, usize>,
}

impl ControlInventory {
    /// Build an inventory from a page scan, dropping entries with an unknown kind.
    pub fn from_raw(round: u32, raw: Vec<RawControl>) -> Self {
        let mut inventory = Self::default();
        for control in raw {
            let Some(kind) = control.kind else {
                continue;
            };
            let snapshot = ControlSnapshot {
                id: ControlId::new(round, control.ordinal),
                kind,
                index: control.index,
                text: non_empty(control.text),
                input_type: non_empty(control.input_type),
                name: non_empty(control.name),
                placeholder: non_empty(control.placeholder),
                checked: control.checked,
                options: control.options,
            };
            let label = snapshot.label();
            if inventory.by_label.contains_key(&label) {
                continue;
            }
            inventory.by_label.insert(label, inventory.controls.len());
            inventory.controls.push(snapshot);
        }
        inventory
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ControlSnapshot> {
        self.controls.iter()
    }

    /// Resolve a planner label (`"button:3"`) to its snapshot.
    pub fn resolve(&self, label: &str) -> Option<&ControlSnapshot> {
        self.by_label.get(label.trim()).map(|&i| &self.controls[i])
    }

    /// Count of controls per kind, for the step trace.
    pub fn kind_counts(&self) -> serde_json::Value {
        let mut counts = serde_json::Map::new();
        for kind in ControlKind::ALL {
            let n = self.controls.iter().filter(|c| c.kind == kind).count();
            if n > 0 {
                counts.insert(kind.as_str().into(), n.into());
            }
        }
        serde_json::Value::Object(counts)
    }
}

/// Decode a page-scan result item by item, skipping entries that don't fit.
pub fn decode_raw_controls(values: Vec<serde_json::Value>) -> Vec<RawControl> {
    values
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|v| !v.is_empty())
}

/// Build the page script that tags and describes visible controls.
///
/// The script clears markers from earlier rounds first, so a stale id can
/// never match an element.
pub fn collect_script(round: u32, caps: &ControlCaps) -> String {
    let kinds: Vec<serde_json::Value> = ControlKind::ALL
        .iter()
        .map(|k| {
            serde_json::json!({
                "kind": k.as_str(),
                "selector": k.selector(),
                "cap": caps.get(*k),
            })
        })
        .collect();
    let kinds_json = serde_json::Value::Array(kinds).to_string();
    let attr = CONTROL_MARKER_ATTR;

    format!(
        r#"(() => {{
            const round = {round};
            const kinds = {kinds_json};
            document.querySelectorAll("[{attr}]").forEach(el => el.removeAttribute("{attr}"));
            const visible = el => {{
                if (!el.isConnected) return false;
                const style = window.getComputedStyle(el);
                if (style.visibility === "hidden" || style.display === "none") return false;
                return el.getClientRects().length > 0 || el.type === "checkbox" || el.type === "radio";
            }};
            const clip = (s, n) => (s || "").replace(/\s+/g, " ").trim().slice(0, n);
            const out = [];
            const seen = new Set();
            let ordinal = 0;
            for (const k of kinds) {{
                if (k.cap <= 0) continue;
                let index = 0;
                for (const el of document.querySelectorAll(k.selector)) {{
                    if (index >= k.cap) break;
                    if (seen.has(el) || !visible(el)) continue;
                    seen.add(el);
                    el.setAttribute("{attr}", "r" + round + "-" + ordinal);
                    const text = clip(el.innerText || el.value || el.getAttribute("aria-label") || el.getAttribute("title") || el.getAttribute("alt"), 120);
                    const entry = {{
                        kind: k.kind,
                        index: index,
                        ordinal: ordinal,
                        text: text || null,
                        type: el.getAttribute("type"),
                        name: el.getAttribute("name"),
                        placeholder: el.getAttribute("placeholder"),
                        checked: (el.type === "checkbox" || el.type === "radio") ? !!el.checked : null,
                        options: []
                    }};
                    if (el.tagName === "SELECT") {{
                        entry.options = Array.from(el.options).slice(0, 15).map(o => clip(o.label || o.value, 60));
                    }}
                    out.push(entry);
                    index += 1;
                    ordinal += 1;
                }}
            }}
            return out;
        }})()"#
    )
}
