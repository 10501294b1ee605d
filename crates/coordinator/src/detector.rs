//! Command detection.
//!
//! Two tiers, in priority order:
//!
//! 1. Explicit syntax: `<prefix><word>[ <argument>]`. The word is the command
//!    name, taken verbatim, and nothing else is consulted.
//! 2. Natural language: the lower-cased message is tested against one ordered
//!    rule table. Several tags may fire; each fires at most once. Table order
//!    is also execution precedence: the first detected tag owns the turn.

use std::sync::LazyLock;

use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandTag {
    Remember,
    Recall,
    Delete,
    Clear,
    Help,
}

impl CommandTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandTag::Remember => "remember",
            CommandTag::Recall => "recall",
            CommandTag::Delete => "delete",
            CommandTag::Clear => "clear",
            CommandTag::Help => "help",
        }
    }

    /// Resolve an explicit command name (case-insensitive) through its aliases.
    pub fn from_command_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "remember" | "save" | "store" => Some(CommandTag::Remember),
            "recall" | "memories" | "show" => Some(CommandTag::Recall),
            "delete" | "forget" | "remove" => Some(CommandTag::Delete),
            "clear" | "reset" => Some(CommandTag::Clear),
            "help" | "commands" => Some(CommandTag::Help),
            _ => None,
        }
    }

    /// Context flag raised while this tag is being processed.
    pub fn context_flag(&self) -> Option<&'static str> {
        use crate::state;
        match self {
            CommandTag::Remember => Some(state::PROCESSING_REMEMBER),
            CommandTag::Recall => Some(state::PROCESSING_RECALL),
            CommandTag::Delete => Some(state::PROCESSING_DELETE),
            CommandTag::Clear => Some(state::CLEAR_CONTEXT),
            CommandTag::Help => None,
        }
    }
}

/// A prefixed command as typed by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplicitCommand {
    pub name: String,
    pub argument: Option<String>,
}

impl ExplicitCommand {
    pub fn tag(&self) -> Option<CommandTag> {
        CommandTag::from_command_name(&self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    pub explicit: Option<ExplicitCommand>,
    pub tags: Vec<CommandTag>,
}

impl Detection {
    /// True when the turn should go straight to response generation.
    pub fn is_empty(&self) -> bool {
        self.explicit.is_none() && self.tags.is_empty()
    }

    pub fn primary(&self) -> Option<CommandTag> {
        self.tags.first().copied()
    }
}

struct CommandRule {
    tag: CommandTag,
    patterns: RegexSet,
    /// Must also match for the rule to fire.
    requires: Option<Regex>,
    /// Suppresses the rule when it matches.
    excludes: Option<Regex>,
}

impl CommandRule {
    fn new(tag: CommandTag, patterns: &[&str]) -> Self {
        Self {
            tag,
            patterns: RegexSet::new(patterns).unwrap(),
            requires: None,
            excludes: None,
        }
    }

    fn requires(mut self, pattern: &str) -> Self {
        self.requires = Some(Regex::new(pattern).unwrap());
        self
    }

    fn excludes(mut self, pattern: &str) -> Self {
        self.excludes = Some(Regex::new(pattern).unwrap());
        self
    }

    fn matches(&self, lower: &str) -> bool {
        self.patterns.is_match(lower)
            && self.requires.as_ref().map_or(true, |r| r.is_match(lower))
            && !self.excludes.as_ref().is_some_and(|r| r.is_match(lower))
    }
}

static RULES: LazyLock<Vec<CommandRule>> = LazyLock::new(|| {
    vec![
        CommandRule::new(
            CommandTag::Remember,
            &[
                r"\bremember\s+(this|that|it)\b",
                r"\bremember\s+(what\s+i\s+(just\s+)?said|what\s+i\s+am\s+about\s+to\s+say|the\s+following|this\s+(information|detail|message|note|for\s+me))\b",
                r"\bi\s+(need|want)\s+you\s+to\s+remember\b",
                r"\b(don['’]?t|do\s+not)\s+forget\s+(about\s+)?(this|that|it)\b",
                r"\bsave\s+(this|that|it|our\s+conversation|the\s+conversation|this\s+conversation)\b",
                r"\bstore\s+(this|that|it)\b",
                r"\b(put|add)\s+(this|that|it)\s+(in|into|to)\s+(your\s+)?(long[-\s]*term\s+)?memory\b",
                r"\bcommit\s+(this|that|it)\s+to\s+memory\b",
                r"\bkeep\s+(this|that|it)\s+(in\s+mind|for\s+later)\b",
                r"\b(hold\s+on\s+to|keep\s+track\s+of|make\s+a\s+note\s+of)\s+(this|that|it)\b",
                r"\bnote\s+(this|that|it)\s+for\s+later\b",
            ],
        )
        .excludes(r"\b(do|did)\s+you\s+remember\b"),
        CommandRule::new(
            CommandTag::Delete,
            &[r"\b(delete|remove|erase|wipe|purge)\b", r"\bforget\b"],
        )
        .requires(
            r"\b(memory|memories|remembered|saved|notes?|records?|everything|conversations?)\b",
        )
        .excludes(r"\b(don['’]?t|do\s+not|never|not)\s+(forget|delete|remove|erase|wipe|purge)\b"),
        CommandRule::new(
            CommandTag::Recall,
            &[
                r"^\s*recall\b",
                r"\b(please|can\s+you|could\s+you)\s+recall\b",
                r"\bwhat\s+(do|can|did)\s+you\s+(remember|recall)\b",
                r"\bwhat\s+do\s+you\s+know\s+about\s+me\b",
                r"\b(do|did)\s+you\s+remember\b",
                r"\b(tell|show|give)\s+me\b.*\b(memory|memories|what\s+you\s+remember)\b",
                r"\bremind\s+me\s+what\s+you\s+remember\b",
                r"\b(list|show)\s+(my|your)\s+(memories|saved\s+\w+)\b",
            ],
        ),
        CommandRule::new(
            CommandTag::Clear,
            &[
                r"^\s*(clear|reset)\b",
                r"\b(clear|reset)\s+(the\s+|our\s+|this\s+|my\s+)?(context|conversation|chat|session|history)\b",
                r"\bclear\s+(all\s+)?(of\s+)?(my\s+|your\s+)?(memory|memories)\b",
            ],
        ),
        CommandRule::new(
            CommandTag::Help,
            &[
                r"^\s*help\b",
                r"\bwhat\s+can\s+you\s+do\b",
                r"\b(list|show)\s+(me\s+)?(the\s+|your\s+|available\s+)?commands\b",
                r"\bhow\s+do\s+i\s+use\s+(you|this)\b",
            ],
        ),
    ]
});

pub struct CommandDetector {
    prefix: char,
}

impl CommandDetector {
    pub fn new(prefix: char) -> Self {
        Self { prefix }
    }

    pub fn detect(&self, message: &str) -> Detection {
        if let Some(explicit) = self.parse_explicit(message) {
            let tags = explicit.tag().into_iter().collect();
            return Detection {
                explicit: Some(explicit),
                tags,
            };
        }

        let lower = message.to_lowercase();
        let tags = RULES
            .iter()
            .filter(|rule| rule.matches(&lower))
            .map(|rule| rule.tag)
            .collect();
        Detection {
            explicit: None,
            tags,
        }
    }

    /// `/name` or `/name argument text`; anything else is not a command.
    pub fn parse_explicit(&self, message: &str) -> Option<ExplicitCommand> {
        let rest = message.trim().strip_prefix(self.prefix)?;
        let name_len = rest
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
            .map_or(rest.len(), |(i, _)| i);
        let name = &rest[..name_len];
        if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return None;
        }

        let tail = &rest[name_len..];
        if !tail.is_empty() && !tail.starts_with(char::is_whitespace) {
            return None;
        }
        let argument = Some(tail.trim()).filter(|a| !a.is_empty()).map(str::to_string);

        Some(ExplicitCommand {
            name: name.to_string(),
            argument,
        })
    }
}

impl Default for CommandDetector {
    fn default() -> Self {
        Self::new('/')
    }
}
