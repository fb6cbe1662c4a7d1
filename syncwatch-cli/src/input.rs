//! Commands typed while a session is running

use syncwatch_core::CoordinatorCommand;

pub const HELP: &str = "commands: source <url> | title <text> | quit";

/// Parse one stdin line. Blank lines give `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<CoordinatorCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word {
        "source" | "open" if !rest.is_empty() => CoordinatorCommand::SetSource {
            url: rest.to_string(),
            send_to_peer: true,
        },
        "source" | "open" => return Err("usage: source <url>".to_string()),
        "title" if !rest.is_empty() => CoordinatorCommand::SetTitle(rest.to_string()),
        "title" => return Err("usage: title <text>".to_string()),
        "quit" | "exit" => CoordinatorCommand::Shutdown,
        other => return Err(format!("unknown command {:?}; {}", other, HELP)),
    };
    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source() {
        assert_eq!(
            parse_command("source  %HOMEPATH%\\Videos\\a b.mkv "),
            Ok(Some(CoordinatorCommand::SetSource {
                url: "%HOMEPATH%\\Videos\\a b.mkv".to_string(),
                send_to_peer: true,
            }))
        );
        assert!(parse_command("source").is_err());
    }

    #[test]
    fn test_title_and_quit() {
        assert_eq!(
            parse_command("title movie night"),
            Ok(Some(CoordinatorCommand::SetTitle("movie night".to_string())))
        );
        assert_eq!(parse_command("quit"), Ok(Some(CoordinatorCommand::Shutdown)));
    }

    #[test]
    fn test_blank_and_unknown() {
        assert_eq!(parse_command("   "), Ok(None));
        assert!(parse_command("dance").is_err());
    }
}
