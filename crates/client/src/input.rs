use std::io::{self, BufRead};
use std::thread;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// A line typed by the user: chat, or a slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserLine {
    Chat(String),
    Level(String),
    Close,
    Quit,
}

impl UserLine {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Some(Self::Chat(line.to_string()));
        };

        let (word, rest) = command.split_once(' ').unwrap_or((command, ""));
        match (word, rest.trim()) {
            ("level", level) if !level.is_empty() => Some(Self::Level(level.to_string())),
            ("close", _) => Some(Self::Close),
            ("quit", _) => Some(Self::Quit),
            _ => None,
        }
    }
}

pub fn spawn() -> UnboundedReceiver<UserLine> {
    let (tx, rx) = unbounded_channel();
    let spawned = thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || forward(io::stdin().lock(), &tx));
    if let Err(e) = spawned {
        log::error!("Failed to read stdin: {}", e);
    }
    rx
}

fn forward(input: impl BufRead, tx: &UnboundedSender<UserLine>) {
    for line in input.lines() {
        let Ok(line) = line else { break };
        match UserLine::parse(&line) {
            Some(parsed) => {
                if tx.send(parsed).is_err() {
                    return;
                }
            }
            None if line.trim().is_empty() => {}
            None => log::warn!("Unknown command '{}' (/level, /close, /quit)", line.trim()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_and_commands() {
        assert_eq!(
            UserLine::parse(" hello all "),
            Some(UserLine::Chat("hello all".to_string()))
        );
        assert_eq!(
            UserLine::parse("/level arena"),
            Some(UserLine::Level("arena".to_string()))
        );
        assert_eq!(UserLine::parse("/close"), Some(UserLine::Close));
        assert_eq!(UserLine::parse("/level"), None);
        assert_eq!(UserLine::parse("/jump"), None);
        assert_eq!(UserLine::parse("   "), None);
    }

    #[test]
    fn forwards_lines_until_the_reader_is_gone() {
        let (tx, mut rx) = unbounded_channel();
        forward(io::Cursor::new("hello\n/jump\n/quit\n"), &tx);
        assert_eq!(rx.try_recv().ok(), Some(UserLine::Chat("hello".to_string())));
        assert_eq!(rx.try_recv().ok(), Some(UserLine::Quit));

        drop(rx);
        forward(io::Cursor::new("ignored\n"), &tx);
    }
}
