use fileclerk::parser::{parse, Command};

#[test]
fn canonical_grammar_examples_parse() {
    assert_eq!(
        parse("LIST /ProjectX"),
        Command::List {
            path: "/ProjectX".to_string()
        }
    );
    assert_eq!(
        parse("DELETE /ProjectX/report.pdf"),
        Command::Delete {
            path: "/ProjectX/report.pdf".to_string()
        }
    );
    assert_eq!(
        parse("MOVE /a.pdf TO /Archive"),
        Command::Move {
            source: "/a.pdf".to_string(),
            destination: "/Archive".to_string(),
        }
    );
    assert_eq!(
        parse("banana"),
        Command::Unrecognized {
            raw: "banana".to_string()
        }
    );
}

#[test]
fn keywords_are_case_insensitive_and_whitespace_tolerant() {
    assert_eq!(
        parse("  list   /ProjectX  "),
        Command::List {
            path: "/ProjectX".to_string()
        }
    );
    assert_eq!(
        parse("Move /a.pdf To /Archive"),
        Command::Move {
            source: "/a.pdf".to_string(),
            destination: "/Archive".to_string(),
        }
    );
    assert_eq!(parse("HeLp"), Command::Help);
}

#[test]
fn keyword_prefix_wins_over_confirm_code_shape() {
    // `DELETE` alone is six alphanumeric characters but carries a keyword
    // prefix, so it must not classify as a confirmation reply.
    assert_eq!(
        parse("DELETE"),
        Command::Unrecognized {
            raw: "DELETE".to_string()
        }
    );
    assert_eq!(
        parse("a1b2c3"),
        Command::ConfirmReply {
            code: "A1B2C3".to_string()
        }
    );
}

#[test]
fn paths_with_spaces_survive_parsing() {
    assert_eq!(
        parse("list /My Documents/Important Files"),
        Command::List {
            path: "/My Documents/Important Files".to_string()
        }
    );
    assert_eq!(
        parse("MOVE /My Files/report.pdf TO /Archive 2024"),
        Command::Move {
            source: "/My Files/report.pdf".to_string(),
            destination: "/Archive 2024".to_string(),
        }
    );
}

#[test]
fn relative_paths_are_rooted() {
    assert_eq!(
        parse("ls Documents"),
        Command::List {
            path: "/Documents".to_string()
        }
    );
    assert_eq!(
        parse("rm old//notes.txt/"),
        Command::Delete {
            path: "/old/notes.txt".to_string()
        }
    );
}
