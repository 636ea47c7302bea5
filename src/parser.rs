use serde::{Deserialize, Serialize};

pub const CONFIRM_CODE_LEN: usize = 6;

const KEYWORDS: &[&str] = &[
    "list", "ls", "delete", "rm", "move", "mv", "summary", "sum", "help", "commands", "to",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List { path: String },
    Delete { path: String },
    Move { source: String, destination: String },
    Summary { path: String },
    Help,
    ConfirmReply { code: String },
    Unrecognized { raw: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    List,
    Delete,
    Move,
    Summary,
    Help,
    ConfirmReply,
    Unrecognized,
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CommandKind::List => "LIST",
            CommandKind::Delete => "DELETE",
            CommandKind::Move => "MOVE",
            CommandKind::Summary => "SUMMARY",
            CommandKind::Help => "HELP",
            CommandKind::ConfirmReply => "CONFIRM",
            CommandKind::Unrecognized => "UNRECOGNIZED",
        };
        f.write_str(label)
    }
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::List { .. } => CommandKind::List,
            Command::Delete { .. } => CommandKind::Delete,
            Command::Move { .. } => CommandKind::Move,
            Command::Summary { .. } => CommandKind::Summary,
            Command::Help => CommandKind::Help,
            Command::ConfirmReply { .. } => CommandKind::ConfirmReply,
            Command::Unrecognized { .. } => CommandKind::Unrecognized,
        }
    }

    pub fn is_destructive(&self) -> bool {
        matches!(self, Command::Delete { .. } | Command::Move { .. })
    }

    /// Primary path the command operates on, when it has one.
    pub fn target_path(&self) -> Option<&str> {
        match self {
            Command::List { path } | Command::Delete { path } | Command::Summary { path } => {
                Some(path)
            }
            Command::Move { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn destination_path(&self) -> Option<&str> {
        match self {
            Command::Move { destination, .. } => Some(destination),
            _ => None,
        }
    }
}

type GrammarRule = fn(&str) -> Option<Command>;

// Evaluated in priority order; keyword rules run before the confirm-code
// shape rule, so a recognized keyword prefix always wins.
const GRAMMAR_RULES: &[GrammarRule] = &[
    match_help,
    match_list,
    match_delete,
    match_move,
    match_summary,
    match_confirm_code,
];

pub fn parse(raw: &str) -> Command {
    let text = raw.trim();
    for rule in GRAMMAR_RULES {
        if let Some(command) = rule(text) {
            return command;
        }
    }
    Command::Unrecognized {
        raw: text.to_string(),
    }
}

pub fn normalize_path(raw: &str) -> String {
    let mut path = String::from("/");
    for segment in raw.trim().split('/').filter(|s| !s.is_empty()) {
        if path.len() > 1 {
            path.push('/');
        }
        path.push_str(segment);
    }
    path
}

fn split_keyword(text: &str) -> (&str, &str) {
    match text.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (text, ""),
    }
}

fn keyword_matches(head: &str, aliases: &[&str]) -> bool {
    aliases.iter().any(|kw| head.eq_ignore_ascii_case(kw))
}

fn match_help(text: &str) -> Option<Command> {
    if text == "?" || keyword_matches(text, &["help", "commands"]) {
        return Some(Command::Help);
    }
    None
}

fn match_list(text: &str) -> Option<Command> {
    let (head, rest) = split_keyword(text);
    if !keyword_matches(head, &["list", "ls"]) {
        return None;
    }
    Some(Command::List {
        path: normalize_path(rest),
    })
}

fn match_delete(text: &str) -> Option<Command> {
    let (head, rest) = split_keyword(text);
    if !keyword_matches(head, &["delete", "rm"]) {
        return None;
    }
    if rest.is_empty() {
        return Some(Command::Unrecognized {
            raw: text.to_string(),
        });
    }
    Some(Command::Delete {
        path: normalize_path(rest),
    })
}

fn match_move(text: &str) -> Option<Command> {
    let (head, rest) = split_keyword(text);
    if !keyword_matches(head, &["move", "mv"]) {
        return None;
    }
    let Some((source, destination)) = split_on_to_separator(rest) else {
        return Some(Command::Unrecognized {
            raw: text.to_string(),
        });
    };
    Some(Command::Move {
        source: normalize_path(source),
        destination: normalize_path(destination),
    })
}

fn match_summary(text: &str) -> Option<Command> {
    let (head, rest) = split_keyword(text);
    if !keyword_matches(head, &["summary", "sum"]) {
        return None;
    }
    if rest.is_empty() {
        return Some(Command::Unrecognized {
            raw: text.to_string(),
        });
    }
    Some(Command::Summary {
        path: normalize_path(rest),
    })
}

fn match_confirm_code(text: &str) -> Option<Command> {
    if text.len() != CONFIRM_CODE_LEN
        || !text.chars().all(|ch| ch.is_ascii_alphanumeric())
        || !text.chars().any(|ch| ch.is_ascii_digit())
        || KEYWORDS.iter().any(|kw| text.eq_ignore_ascii_case(kw))
    {
        return None;
    }
    Some(Command::ConfirmReply {
        code: text.to_ascii_uppercase(),
    })
}

// The separator is the standalone word `TO` (any case); it must appear
// exactly once between two non-empty paths.
fn split_on_to_separator(rest: &str) -> Option<(&str, &str)> {
    let mut split_at = None;
    let mut offset = 0usize;
    for token in rest.split_whitespace() {
        let start = rest[offset..].find(token).map(|i| offset + i)?;
        if token.eq_ignore_ascii_case("to") {
            if split_at.is_some() {
                return None;
            }
            split_at = Some((start, start + token.len()));
        }
        offset = start + token.len();
    }
    let (sep_start, sep_end) = split_at?;
    let source = rest[..sep_start].trim();
    let destination = rest[sep_end..].trim();
    if source.is_empty() || destination.is_empty() {
        return None;
    }
    Some((source, destination))
}

pub fn help_message() -> String {
    [
        "Available commands:",
        "  LIST <path>            show files in a folder (alias: ls)",
        "  DELETE <path>          delete a file, confirmation required (alias: rm)",
        "  MOVE <path> TO <path>  move a file, confirmation required (alias: mv)",
        "  SUMMARY <path>         summarize a file or folder (alias: sum)",
        "  HELP                   show this message (alias: ?)",
        "",
        "Destructive commands reply with a confirmation code; send the code",
        "back within 5 minutes to proceed. All operations are logged and",
        "rate limited to 30 commands per hour.",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_parses_with_path_and_defaults_to_root() {
        assert_eq!(
            parse("LIST /ProjectX"),
            Command::List {
                path: "/ProjectX".to_string()
            }
        );
        assert_eq!(
            parse("ls Documents"),
            Command::List {
                path: "/Documents".to_string()
            }
        );
        assert_eq!(
            parse("list"),
            Command::List {
                path: "/".to_string()
            }
        );
    }

    #[test]
    fn delete_requires_a_path() {
        assert_eq!(
            parse("DELETE /ProjectX/report.pdf"),
            Command::Delete {
                path: "/ProjectX/report.pdf".to_string()
            }
        );
        assert_eq!(
            parse("rm  /old.txt"),
            Command::Delete {
                path: "/old.txt".to_string()
            }
        );
        assert_eq!(
            parse("DELETE"),
            Command::Unrecognized {
                raw: "DELETE".to_string()
            }
        );
    }

    #[test]
    fn move_splits_on_a_single_to_separator() {
        assert_eq!(
            parse("MOVE /a.pdf TO /Archive"),
            Command::Move {
                source: "/a.pdf".to_string(),
                destination: "/Archive".to_string(),
            }
        );
        assert_eq!(
            parse("mv /My Files/a.pdf to /Archive 2024"),
            Command::Move {
                source: "/My Files/a.pdf".to_string(),
                destination: "/Archive 2024".to_string(),
            }
        );
        assert!(matches!(
            parse("MOVE /a TO /b TO /c"),
            Command::Unrecognized { .. }
        ));
        assert!(matches!(parse("MOVE TO /b"), Command::Unrecognized { .. }));
        assert!(matches!(parse("MOVE /a /b"), Command::Unrecognized { .. }));
    }

    #[test]
    fn summary_and_help_aliases_parse() {
        assert_eq!(
            parse("sum /doc.pdf"),
            Command::Summary {
                path: "/doc.pdf".to_string()
            }
        );
        assert_eq!(parse("HELP"), Command::Help);
        assert_eq!(parse("?"), Command::Help);
        assert_eq!(parse("commands"), Command::Help);
        assert!(matches!(parse("summary"), Command::Unrecognized { .. }));
    }

    #[test]
    fn confirm_code_shape_requires_a_digit_and_no_keyword() {
        assert_eq!(
            parse("a1b2c3"),
            Command::ConfirmReply {
                code: "A1B2C3".to_string()
            }
        );
        assert_eq!(
            parse("banana"),
            Command::Unrecognized {
                raw: "banana".to_string()
            }
        );
        assert!(matches!(parse("abc12"), Command::Unrecognized { .. }));
        assert!(matches!(parse("abc1234"), Command::Unrecognized { .. }));
    }

    #[test]
    fn unmatched_text_and_empty_input_become_unrecognized() {
        assert_eq!(
            parse("banana split please"),
            Command::Unrecognized {
                raw: "banana split please".to_string()
            }
        );
        assert_eq!(
            parse("   "),
            Command::Unrecognized {
                raw: String::new()
            }
        );
    }

    #[test]
    fn paths_are_normalized() {
        assert_eq!(normalize_path("ProjectX"), "/ProjectX");
        assert_eq!(normalize_path("//a///b/"), "/a/b");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/My Documents/Files"), "/My Documents/Files");
    }
}
