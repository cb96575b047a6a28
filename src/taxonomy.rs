//! Category taxonomy: the fixed set of log categories, their classification
//! patterns and their ordered sub-type tables.
//!
//! Every priority-ordered table in the crate is a [`RuleList`], an explicit
//! sequence of `(pattern, result)` pairs. Evaluation order is the order of
//! declaration.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::filter::Severity;

/// Name of the catch-all sub-type used when no specific sub-pattern matches.
pub const CATCH_ALL_SUBTYPE: &str = "Other";

#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("invalid pattern for {owner}: {source}")]
    Pattern {
        owner: String,
        #[source]
        source: regex::Error,
    },
    #[error("taxonomy file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("taxonomy json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown category: {0}")]
    UnknownCategory(String),
}

/// Compile a pattern the way every taxonomy rule is matched: case-insensitive
/// search anywhere in the line.
pub fn compile_pattern(owner: &str, pattern: &str) -> Result<Regex, TaxonomyError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| TaxonomyError::Pattern { owner: owner.to_string(), source })
}

#[derive(Debug, Clone)]
pub struct Rule<T> {
    pub pattern: Regex,
    pub result: T,
}

/// Ordered `(predicate, result)` list.
#[derive(Debug, Clone)]
pub struct RuleList<T> {
    rules: Vec<Rule<T>>,
}

impl<T> Default for RuleList<T> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<T> RuleList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pattern: Regex, result: T) {
        self.rules.push(Rule { pattern, result });
    }

    /// Result of the earliest rule whose pattern occurs in `text`.
    pub fn first_match(&self, text: &str) -> Option<&T> {
        self.rules
            .iter()
            .find(|r| r.pattern.is_match(text))
            .map(|r| &r.result)
    }

    pub fn find_rule<F>(&self, mut pred: F) -> Option<&Rule<T>>
    where
        F: FnMut(&T) -> bool,
    {
        self.rules.iter().find(|r| pred(&r.result))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule<T>> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl RuleList<String> {
    /// Build from `(name, pattern)` pairs, preserving order.
    pub fn from_pairs(owner: &str, pairs: &[(&str, &str)]) -> Result<Self, TaxonomyError> {
        let mut list = Self::new();
        for (name, pattern) in pairs {
            let re = compile_pattern(&format!("{owner}/{name}"), pattern)?;
            list.push(re, (*name).to_string());
        }
        Ok(list)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.result.as_str())
    }
}

/// The closed set of log categories, in declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CategoryKind {
    Application,
    System,
    Crash,
    #[serde(rename = "GC")]
    Gc,
    Network,
    Broadcast,
    Service,
    Device,
}

impl CategoryKind {
    pub const ALL: [CategoryKind; 8] = [
        CategoryKind::Application,
        CategoryKind::System,
        CategoryKind::Crash,
        CategoryKind::Gc,
        CategoryKind::Network,
        CategoryKind::Broadcast,
        CategoryKind::Service,
        CategoryKind::Device,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CategoryKind::Application => "Application",
            CategoryKind::System => "System",
            CategoryKind::Crash => "Crash",
            CategoryKind::Gc => "GC",
            CategoryKind::Network => "Network",
            CategoryKind::Broadcast => "Broadcast",
            CategoryKind::Service => "Service",
            CategoryKind::Device => "Device",
        }
    }

    /// Key used for per-category output resources.
    pub fn key(self) -> String {
        self.name().to_lowercase()
    }
}

impl fmt::Display for CategoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CategoryKind {
    type Err = TaxonomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CategoryKind::ALL
            .iter()
            .copied()
            .find(|k| k.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TaxonomyError::UnknownCategory(s.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct Category {
    pub kind: CategoryKind,
    pub description: String,
    pub pattern: Regex,
    pub color: String,
    /// Specific sub-types only; the catch-all is implicit. Empty means the
    /// generic level-based table applies.
    pub subtypes: RuleList<String>,
}

#[derive(Debug, Clone)]
pub struct Taxonomy {
    categories: Vec<Category>,
    generic_subtypes: RuleList<String>,
    severities: RuleList<Severity>,
}

struct CategoryDef {
    kind: CategoryKind,
    description: &'static str,
    pattern: &'static str,
    color: &'static str,
    subtypes: &'static [(&'static str, &'static str)],
}

const DEFAULT_CATEGORIES: &[CategoryDef] = &[
    CategoryDef {
        kind: CategoryKind::Application,
        description: "Application-specific logs",
        pattern: r"ActivityManager|PackageManager|ApplicationContext",
        color: "blue",
        subtypes: &[
            ("Activity", r"Activity|startActivity"),
            ("Fragment", r"Fragment"),
            ("View", r"View|Inflate"),
            ("Lifecycle", r"onCreate|onStart|onResume|onPause|onStop|onDestroy"),
        ],
    },
    CategoryDef {
        kind: CategoryKind::System,
        description: "System-level logs",
        pattern: r"SystemServer|System\.err|SystemClock|SystemProperties",
        color: "green",
        subtypes: &[
            ("Boot", r"boot|start up|startup|starting"),
            ("Memory", r"memory|heap|ram"),
            ("CPU", r"cpu|processor"),
            ("Battery", r"battery|power"),
        ],
    },
    CategoryDef {
        kind: CategoryKind::Crash,
        description: "Application crashes and exceptions",
        pattern: r"FATAL|Exception|ANR|crash|force close|stacktrace",
        color: "red",
        subtypes: &[
            ("NullPointer", r"NullPointerException"),
            ("OutOfMemory", r"OutOfMemoryError"),
            ("IllegalState", r"IllegalStateException"),
            ("ANR", r"ANR|Not Responding"),
        ],
    },
    CategoryDef {
        kind: CategoryKind::Gc,
        description: "Garbage Collection events",
        pattern: r"dalvikvm.*GC|art.*GC|GC_|collector",
        color: "purple",
        subtypes: &[
            ("Dalvik GC", r"dalvikvm.*GC"),
            ("ART GC", r"art.*GC"),
            ("Explicit GC", r"Explicit GC"),
            ("Concurrent GC", r"Concurrent GC"),
        ],
    },
    CategoryDef {
        kind: CategoryKind::Network,
        description: "Network activity logs",
        pattern: r"ConnectivityManager|NetworkInfo|WifiManager|HttpURLConnection|socket|wifi|TCP|UDP|DNS",
        color: "cyan",
        subtypes: &[
            ("WiFi", r"wifi|wlan"),
            ("Mobile", r"mobile|cellular|data connection"),
            ("HTTP", r"http|https|URL"),
            ("Socket", r"socket|tcp|udp"),
        ],
    },
    CategoryDef {
        kind: CategoryKind::Broadcast,
        description: "Broadcast receivers and events",
        pattern: r"BroadcastReceiver|sendBroadcast|onReceive|Intent.*broadcast",
        color: "yellow",
        subtypes: &[
            ("System", r"android\.intent\.action|system broadcast"),
            ("App", r"com\."),
            ("Sticky", r"sticky|registerReceiver"),
            ("Ordered", r"ordered broadcast"),
        ],
    },
    CategoryDef {
        kind: CategoryKind::Service,
        description: "Service lifecycle events",
        pattern: r"Service|startService|stopService|bindService|onBind",
        color: "orange",
        subtypes: &[
            ("Start", r"startService"),
            ("Stop", r"stopService"),
            ("Bind", r"bindService|onBind"),
            ("Unbind", r"unbindService|onUnbind"),
        ],
    },
    CategoryDef {
        kind: CategoryKind::Device,
        description: "Device state and hardware",
        pattern: r"PowerManager|BatteryManager|sensor|hardware|camera|location|bluetooth|telephony",
        color: "magenta",
        subtypes: &[
            ("Battery", r"battery|BatteryManager"),
            ("Power", r"power|PowerManager|wake|sleep"),
            ("Sensor", r"sensor|Sensor"),
            ("Camera", r"camera|Camera"),
            ("Location", r"location|LocationManager|GPS"),
        ],
    },
];

/// Level-marker sub-types for categories without a bespoke table.
const GENERIC_SUBTYPES: &[(&str, &str)] = &[
    ("Error", r"error|exception|fail"),
    ("Warning", r"warn|warning"),
    ("Info", r"info|information"),
    ("Debug", r"debug"),
    ("Verbose", r"verbose"),
];

const SEVERITY_PATTERNS: &[(Severity, &str)] = &[
    (Severity::Error, r"E/|ERROR|Exception|FATAL"),
    (Severity::Warning, r"W/|WARN|WARNING"),
    (Severity::Info, r"I/|INFO"),
    (Severity::Debug, r"D/|DEBUG"),
    (Severity::Verbose, r"V/|VERBOSE"),
];

/// On-disk override for one category. Missing fields keep the built-in value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryOverride {
    pub description: Option<String>,
    pub pattern: Option<String>,
    pub color: Option<String>,
    /// Ordered `[name, pattern]` pairs. An empty list selects the generic table.
    pub subtypes: Option<Vec<(String, String)>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaxonomyFile {
    #[serde(default)]
    pub categories: std::collections::BTreeMap<CategoryKind, CategoryOverride>,
}

impl Taxonomy {
    /// The built-in device-log taxonomy.
    pub fn builtin() -> Result<Self, TaxonomyError> {
        let mut categories = Vec::with_capacity(DEFAULT_CATEGORIES.len());
        for def in DEFAULT_CATEGORIES {
            categories.push(Category {
                kind: def.kind,
                description: def.description.to_string(),
                pattern: compile_pattern(def.kind.name(), def.pattern)?,
                color: def.color.to_string(),
                subtypes: RuleList::from_pairs(def.kind.name(), def.subtypes)?,
            });
        }
        let generic_subtypes = RuleList::from_pairs("generic", GENERIC_SUBTYPES)?;
        let mut severities = RuleList::new();
        for (sev, pattern) in SEVERITY_PATTERNS {
            severities.push(compile_pattern(sev.name(), pattern)?, *sev);
        }
        Ok(Self { categories, generic_subtypes, severities })
    }

    /// Built-in taxonomy with per-category overrides applied.
    pub fn with_overrides(file: &TaxonomyFile) -> Result<Self, TaxonomyError> {
        let mut tax = Self::builtin()?;
        for cat in tax.categories.iter_mut() {
            let Some(ov) = file.categories.get(&cat.kind) else { continue };
            let owner = cat.kind.name();
            if let Some(d) = &ov.description {
                cat.description = d.clone();
            }
            if let Some(p) = &ov.pattern {
                cat.pattern = compile_pattern(owner, p)?;
            }
            if let Some(c) = &ov.color {
                cat.color = c.clone();
            }
            if let Some(subs) = &ov.subtypes {
                let pairs: Vec<(&str, &str)> =
                    subs.iter().map(|(n, p)| (n.as_str(), p.as_str())).collect();
                cat.subtypes = RuleList::from_pairs(owner, &pairs)?;
            }
        }
        Ok(tax)
    }

    pub fn from_json_str(s: &str) -> Result<Self, TaxonomyError> {
        let file: TaxonomyFile = serde_json::from_str(s)?;
        Self::with_overrides(&file)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, TaxonomyError> {
        let text = std::fs::read_to_string(path).map_err(|source| TaxonomyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Categories in declared order.
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn category(&self, kind: CategoryKind) -> &Category {
        // builtin() populates every kind, in ALL order
        &self.categories[kind as usize]
    }

    /// Sub-type table for `kind`, falling back to the generic level table.
    pub fn subtypes(&self, kind: CategoryKind) -> &RuleList<String> {
        let cat = self.category(kind);
        if cat.subtypes.is_empty() {
            &self.generic_subtypes
        } else {
            &cat.subtypes
        }
    }

    pub fn generic_subtypes(&self) -> &RuleList<String> {
        &self.generic_subtypes
    }

    pub fn severities(&self) -> &RuleList<Severity> {
        &self.severities
    }

    /// Pattern for one named sub-type within `kind`.
    pub fn subtype_pattern(&self, kind: CategoryKind, name: &str) -> Option<&Regex> {
        self.subtypes(kind)
            .find_rule(|n| n.eq_ignore_ascii_case(name))
            .map(|r| &r.pattern)
    }

    pub fn severity_pattern(&self, severity: Severity) -> Option<&Regex> {
        self.severities.find_rule(|s| *s == severity).map(|r| &r.pattern)
    }
}
