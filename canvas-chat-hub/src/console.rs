use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    select,
};
use tracing::warn;

use crate::{
    cli::ClientArgs,
    client::{ChatClient, ClientEvent},
    message::{ControlEvent, DrawAction},
    view::{LocalView, Origin, Segment, ViewUpdate},
};

/// A line typed at the terminal.
#[derive(Debug, PartialEq, Eq)]
pub enum InputCommand {
    Chat(String),
    Draw { action: DrawAction, x: i32, y: i32 },
    Clear,
    Quit,
    Empty,
}

impl InputCommand {
    /// Parses `/draw <start|move|end> <x> <y>`, `/clear`, `/quit`, or chat.
    ///
    /// Lines starting with `//` are sent as chat with one slash removed.
    pub fn parse(line: &str) -> Result<Self> {
        let text = line.trim_end_matches(&['\n', '\r'][..]);
        if text.trim().is_empty() {
            return Ok(InputCommand::Empty);
        }

        if let Some(escaped) = text.strip_prefix("//") {
            return Ok(InputCommand::Chat(format!("/{escaped}")));
        }
        let Some(command) = text.strip_prefix('/') else {
            return Ok(InputCommand::Chat(text.to_string()));
        };

        let parts: Vec<&str> = command.split_whitespace().collect();
        match parts.as_slice() {
            [name] if name.eq_ignore_ascii_case("quit") => Ok(InputCommand::Quit),
            [name] if name.eq_ignore_ascii_case("clear") => Ok(InputCommand::Clear),
            [name, action, x, y] if name.eq_ignore_ascii_case("draw") => {
                let action = parse_action(action)?;
                let x = x.parse().map_err(|_| anyhow!("invalid x coordinate: {x}"))?;
                let y = y.parse().map_err(|_| anyhow!("invalid y coordinate: {y}"))?;
                Ok(InputCommand::Draw { action, x, y })
            }
            [name, ..] if name.eq_ignore_ascii_case("draw") => {
                Err(anyhow!("usage: /draw <start|move|end> <x> <y>"))
            }
            _ => Err(anyhow!(
                "unknown command. Try: /draw <start|move|end> <x> <y>, /clear, /quit"
            )),
        }
    }
}

fn parse_action(action: &str) -> Result<DrawAction> {
    match action.to_ascii_lowercase().as_str() {
        "start" => Ok(DrawAction::Start),
        "move" => Ok(DrawAction::Move),
        "end" => Ok(DrawAction::End),
        other => Err(anyhow!("unknown draw action: {other}")),
    }
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let client = ChatClient::new(args.server, Duration::from_millis(args.connect_timeout_ms));
    let mut events = client.connect().await?;
    write_stdout(&format!("*** connected to {}", client.server())).await?;

    let mut view = LocalView::new();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        select! {
            event = events.recv() => {
                if !handle_client_event(event, &mut view).await? {
                    break;
                }
            }
            line = stdin.next_line() => {
                if !handle_stdin_input(line, &client, &mut view).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }

    client.disconnect().await;
    Ok(())
}

async fn handle_client_event(event: Option<ClientEvent>, view: &mut LocalView) -> Result<bool> {
    let Some(event) = event else {
        return Ok(false);
    };

    match view.apply(event) {
        Some(ViewUpdate::Disconnected) => {
            write_stdout("*** disconnected from server").await?;
            Ok(false)
        }
        Some(update) => {
            render_update(update).await?;
            Ok(true)
        }
        None => Ok(true),
    }
}

async fn handle_stdin_input(
    line: io::Result<Option<String>>,
    client: &ChatClient,
    view: &mut LocalView,
) -> Result<bool> {
    let Some(line) = line? else {
        return Ok(false);
    };

    let command = match InputCommand::parse(&line) {
        Ok(command) => command,
        Err(err) => {
            write_stderr(&format!("!!! {err}")).await?;
            return Ok(true);
        }
    };

    let sent = match command {
        InputCommand::Empty => return Ok(true),
        InputCommand::Quit => {
            write_stdout("*** leaving chat").await?;
            return Ok(false);
        }
        InputCommand::Chat(text) => client.send(&text).await,
        InputCommand::Draw { action, x, y } => {
            if let Some(segment) = view.draw_local(action, x, y) {
                write_stdout(&render_segment(segment)).await?;
            }
            client
                .send_control(ControlEvent::Draw { action, x, y })
                .await
        }
        InputCommand::Clear => {
            view.clear();
            write_stdout("~ canvas cleared").await?;
            client.send_control(ControlEvent::Clear).await
        }
    };

    // The receive loop reports the disconnect that follows a failed send.
    if let Err(err) = sent {
        write_stderr(&format!("!!! {err}")).await?;
    }
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn render_update(update: ViewUpdate) -> io::Result<()> {
    match update {
        ViewUpdate::Line(entry) => match entry.origin {
            Origin::Own => write_stdout(&format!("(me) {}", entry.text)).await,
            Origin::Remote | Origin::System => write_stdout(&entry.text).await,
        },
        ViewUpdate::Segment(segment) => write_stdout(&render_segment(segment)).await,
        ViewUpdate::Cleared => write_stdout("~ canvas cleared").await,
        ViewUpdate::Disconnected => write_stdout("*** disconnected from server").await,
    }
}

fn render_segment(segment: Segment) -> String {
    format!(
        "~ ({},{}) -> ({},{})",
        segment.from.x, segment.from.y, segment.to.x, segment.to.y
    )
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_draw_commands_case_insensitively() {
        assert_eq!(
            InputCommand::parse("/draw start 10 10").expect("draw"),
            InputCommand::Draw {
                action: DrawAction::Start,
                x: 10,
                y: 10
            }
        );
        assert_eq!(
            InputCommand::parse("/DRAW Move -3 7\n").expect("draw"),
            InputCommand::Draw {
                action: DrawAction::Move,
                x: -3,
                y: 7
            }
        );
    }

    #[test]
    fn parses_meta_commands() {
        assert_eq!(InputCommand::parse("/clear").expect("clear"), InputCommand::Clear);
        assert_eq!(InputCommand::parse("/Quit").expect("quit"), InputCommand::Quit);
        assert_eq!(InputCommand::parse("   ").expect("empty"), InputCommand::Empty);
    }

    #[test]
    fn plain_text_is_chat() {
        assert_eq!(
            InputCommand::parse("hello there").expect("chat"),
            InputCommand::Chat("hello there".into())
        );
        assert_eq!(
            InputCommand::parse("//draw is a command").expect("escaped"),
            InputCommand::Chat("/draw is a command".into())
        );
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!(InputCommand::parse("/draw").is_err());
        assert!(InputCommand::parse("/draw start 1").is_err());
        assert!(InputCommand::parse("/draw wiggle 1 2").is_err());
        assert!(InputCommand::parse("/draw start x 2").is_err());
        assert!(InputCommand::parse("/dance").is_err());
    }
}
