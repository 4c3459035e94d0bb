use std::io::{self, BufRead};
use std::thread;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// Operator commands read from stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    Level(String),
    Close,
    Players,
    Status,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (word, rest) = match line.split_once(' ') {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match word {
            "say" if !rest.is_empty() => Some(Self::Say(rest.to_string())),
            "level" if !rest.is_empty() => Some(Self::Level(rest.to_string())),
            "close" => Some(Self::Close),
            "players" => Some(Self::Players),
            "status" => Some(Self::Status),
            "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Reads commands on a background thread until stdin closes.
pub fn spawn() -> UnboundedReceiver<Command> {
    let (tx, rx) = unbounded_channel();
    let spawned = thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            forward(io::stdin().lock(), &tx);
            log::debug!("Console input closed");
        });
    if let Err(e) = spawned {
        log::error!("Failed to start console: {}", e);
    }
    rx
}

fn forward(input: impl BufRead, tx: &UnboundedSender<Command>) {
    for line in input.lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match Command::parse(&line) {
            Some(command) => {
                if tx.send(command).is_err() {
                    return;
                }
            }
            None => log::warn!(
                "Unknown command '{}' (say, level, close, players, status, quit)",
                line.trim()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(
            Command::parse("say hello there"),
            Some(Command::Say("hello there".to_string()))
        );
        assert_eq!(
            Command::parse("  level arena "),
            Some(Command::Level("arena".to_string()))
        );
        assert_eq!(Command::parse("close"), Some(Command::Close));
        assert_eq!(Command::parse("exit"), Some(Command::Quit));
        assert_eq!(Command::parse("level"), None);
        assert_eq!(Command::parse("dance"), None);
    }

    #[test]
    fn forwards_parsed_lines_in_order() {
        let (tx, mut rx) = unbounded_channel();
        forward(io::Cursor::new("say hi\n\ndance\nstatus\n"), &tx);
        assert_eq!(rx.try_recv().ok(), Some(Command::Say("hi".to_string())));
        assert_eq!(rx.try_recv().ok(), Some(Command::Status));
        assert!(rx.try_recv().is_err());
    }
}
