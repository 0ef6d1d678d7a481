//! Heuristic content and operation classification.
//!
//! These are the only fuzzy checks in the core. They are approximate on purpose and must stay
//! stable: a planning requirement that says "implement" is still planning prose, while a
//! `function foo(` in planning output is treated as code.

use crate::boundary::{ActorType, OperationType};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Code-like construct found in text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeSignal {
    FunctionDeclaration,
    VariableDeclaration,
    ImportStatement,
    ClassDeclaration,
    CodeBlock,
}

/// Deliberative phrase found in text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategicSignal {
    ShouldWe,
    Recommend,
    LetsConsider,
    ISuggest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "category", content = "signal", rename_all = "snake_case")]
pub enum ContentSignal {
    Code(CodeSignal),
    Strategic(StrategicSignal),
}

impl fmt::Display for ContentSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ContentSignal::Code(CodeSignal::FunctionDeclaration) => "function declaration",
            ContentSignal::Code(CodeSignal::VariableDeclaration) => "variable declaration",
            ContentSignal::Code(CodeSignal::ImportStatement) => "import statement",
            ContentSignal::Code(CodeSignal::ClassDeclaration) => "class declaration",
            ContentSignal::Code(CodeSignal::CodeBlock) => "code block",
            ContentSignal::Strategic(StrategicSignal::ShouldWe) => "strategic phrase 'should we'",
            ContentSignal::Strategic(StrategicSignal::Recommend) => "strategic phrase 'recommend'",
            ContentSignal::Strategic(StrategicSignal::LetsConsider) => {
                "strategic phrase 'let's consider'"
            }
            ContentSignal::Strategic(StrategicSignal::ISuggest) => "strategic phrase 'I suggest'",
        };
        f.write_str(text)
    }
}

/// Every signal detected in a piece of text, in detection order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentClassification {
    pub signals: Vec<ContentSignal>,
}

impl ContentClassification {
    pub fn is_neutral(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn has_code(&self) -> bool {
        self.signals
            .iter()
            .any(|s| matches!(s, ContentSignal::Code(_)))
    }

    pub fn has_strategic(&self) -> bool {
        self.signals
            .iter()
            .any(|s| matches!(s, ContentSignal::Strategic(_)))
    }

    /// Signals the given actor type is not allowed to emit.
    pub fn disallowed_for(&self, actor_type: ActorType) -> Vec<ContentSignal> {
        self.signals
            .iter()
            .copied()
            .filter(|signal| match (actor_type, signal) {
                (ActorType::Planning, ContentSignal::Code(_)) => true,
                (ActorType::Execution, ContentSignal::Strategic(_)) => true,
                _ => false,
            })
            .collect()
    }
}

struct Patterns {
    code: Vec<(CodeSignal, Regex)>,
    strategic: Vec<(StrategicSignal, Regex)>,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let code = vec![
            (
                CodeSignal::FunctionDeclaration,
                r"\b(?:function\s+\w+\s*\(|fn\s+\w+\s*[<(]|def\s+\w+\s*\()",
            ),
            (
                CodeSignal::VariableDeclaration,
                r"\b(?:const|let|var)\s+(?:mut\s+)?\w+\s*(?::\s*[\w<>\[\]]+\s*)?=",
            ),
            (
                CodeSignal::ImportStatement,
                r#"(?m)^\s*(?:import\s+[\w{}*,\s]+\s+from\s+['"]|import\s+['"]|use\s+[\w:]+(?:::\{[^}]*\})?\s*;|from\s+[\w.]+\s+import\s+\w)"#,
            ),
            (
                CodeSignal::ClassDeclaration,
                r"\b(?:class|interface)\s+\w+[^{\n]*\{",
            ),
            (CodeSignal::CodeBlock, r"(?:\{[^{}]*;[^{}]*\}|```)"),
        ]
        .into_iter()
        .filter_map(|(signal, pattern)| Regex::new(pattern).ok().map(|re| (signal, re)))
        .collect();

        let strategic = vec![
            (StrategicSignal::ShouldWe, r"(?i)\bshould\s+we\b"),
            (StrategicSignal::Recommend, r"(?i)\brecommend"),
            (StrategicSignal::LetsConsider, r"(?i)\blet['’]s\s+consider\b"),
            (StrategicSignal::ISuggest, r"(?i)\bi\s+suggest\b"),
        ]
        .into_iter()
        .filter_map(|(signal, pattern)| Regex::new(pattern).ok().map(|re| (signal, re)))
        .collect();

        Patterns { code, strategic }
    })
}

/// Scan text for code-like constructs and deliberative language.
pub fn classify_content(text: &str) -> ContentClassification {
    let patterns = patterns();
    let mut signals = Vec::new();
    for (signal, re) in &patterns.code {
        if re.is_match(text) {
            signals.push(ContentSignal::Code(*signal));
        }
    }
    for (signal, re) in &patterns.strategic {
        if re.is_match(text) {
            signals.push(ContentSignal::Strategic(*signal));
        }
    }
    ContentClassification { signals }
}

const PLANNING_KEYWORDS: &[&str] = &["plan", "analyze", "decide", "strategy"];
const EXECUTION_KEYWORDS: &[&str] = &["execute", "implement", "run", "deploy"];

/// Map a free-text operation description onto an operation type.
///
/// Planning keywords win over execution keywords; anything else is an analysis.
pub fn classify_operation(description: &str) -> OperationType {
    let lowered = description.to_lowercase();
    if PLANNING_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        OperationType::Plan
    } else if EXECUTION_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        OperationType::Execute
    } else {
        OperationType::Analyze
    }
}
