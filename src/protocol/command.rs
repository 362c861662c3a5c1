//! Command grammar
//!
//! A trimmed line beginning with `#` is a command. The command word is the
//! first whitespace-separated token; the remaining tokens are arguments.
//! Parsing is purely syntactic; name lookups, room checks, and permissions
//! all happen in the dispatcher.

/// Default number of messages returned by `#history`.
const HISTORY_DEFAULT: usize = 10;
/// Upper bound on `#history` requests.
const HISTORY_MAX: usize = 50;
/// Default mute duration in seconds when `#mute` omits one.
const MUTE_DEFAULT_SECS: u64 = 60;

/// A fully parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Rooms,
    Join(String),
    Create(String),
    Leave,
    Online,
    Whisper { target: String, text: String },
    History(usize),
    Kick(String),
    Ban(String),
    Mute { target: String, seconds: u64 },
    Exit,
}

/// Why a command line failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Required arguments were missing; the payload is the usage line to
    /// send back verbatim.
    Usage(&'static str),
    /// The command word itself was not recognized.
    Unknown(String),
}

/// Parse a trimmed line that starts with `#` into a [`Command`].
pub fn parse(line: &str) -> Result<Command, ParseError> {
    let mut tokens = line.split_whitespace();
    let word = tokens.next().unwrap_or("");

    match word {
        "#help" => Ok(Command::Help),
        "#rooms" => Ok(Command::Rooms),
        "#join" => match tokens.next() {
            Some(room) => Ok(Command::Join(room.to_string())),
            None => Err(ParseError::Usage("Usage: #join <room_name>")),
        },
        "#create" => match tokens.next() {
            Some(room) => Ok(Command::Create(room.to_string())),
            None => Err(ParseError::Usage("Usage: #create <room_name>")),
        },
        "#leave" => Ok(Command::Leave),
        "#online" => Ok(Command::Online),
        "#whisper" => parse_whisper(line),
        "#history" => {
            let count = tokens
                .next()
                .and_then(|t| t.parse::<usize>().ok())
                .unwrap_or(HISTORY_DEFAULT);
            Ok(Command::History(clamp_history(count)))
        }
        "#kick" => match tokens.next() {
            Some(target) => Ok(Command::Kick(target.to_string())),
            None => Err(ParseError::Usage("Usage: #kick <username>")),
        },
        "#ban" => match tokens.next() {
            Some(target) => Ok(Command::Ban(target.to_string())),
            None => Err(ParseError::Usage("Usage: #ban <username>")),
        },
        "#mute" => {
            let target = match tokens.next() {
                Some(t) => t.to_string(),
                None => return Err(ParseError::Usage("Usage: #mute <username> [seconds]")),
            };
            let seconds = tokens
                .next()
                .and_then(|t| t.parse::<u64>().ok())
                .unwrap_or(MUTE_DEFAULT_SECS);
            Ok(Command::Mute { target, seconds })
        }
        "#exit" => Ok(Command::Exit),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}

/// `#whisper <user> <text…>`: the text is everything after the target token
/// with leading whitespace removed, interior spacing preserved.
fn parse_whisper(line: &str) -> Result<Command, ParseError> {
    const USAGE: &str = "Usage: #whisper <username> <message>";

    let rest = line["#whisper".len()..].trim_start();
    let (target, text) = rest.split_once(char::is_whitespace).ok_or(ParseError::Usage(USAGE))?;
    let text = text.trim_start();
    if target.is_empty() || text.is_empty() {
        return Err(ParseError::Usage(USAGE));
    }
    Ok(Command::Whisper {
        target: target.to_string(),
        text: text.to_string(),
    })
}

/// Out-of-range history counts fall back to the default (`0`) or saturate
/// at the maximum.
fn clamp_history(count: usize) -> usize {
    if count < 1 {
        HISTORY_DEFAULT
    } else if count > HISTORY_MAX {
        HISTORY_MAX
    } else {
        count
    }
}
